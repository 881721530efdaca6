use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use colloquy_contracts::{
    Context, Intent, RequestEnvelope, Response, SkillCall, SkillHook, SkillReply, Slot,
};
use colloquy_kernel::{DialogIntent, DialogModel};
use reqwest::Client;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill transport failed: {0}")]
    Transport(String),
    #[error("skill answered with http status {0}")]
    Status(u16),
    #[error("skill reply could not be decoded: {0}")]
    Decode(String),
    #[error("skill failed: {0}")]
    Failed(String),
}

/// What a skill returns for an intent turn. `context` replaces the outgoing
/// context the engine would otherwise start from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentReply {
    pub response: Response,
    pub context: Option<Context>,
}

impl IntentReply {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            context: None,
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }
}

#[async_trait]
pub trait Skill: Send + Sync {
    /// Dialog model for this turn's intent requests. `None` keeps the model
    /// the engine was built with.
    fn dialog_model(&self, _context: &Context) -> Option<Arc<DialogModel>> {
        None
    }

    async fn on_session_started(&self, _envelope: &RequestEnvelope) -> Result<(), SkillError> {
        Ok(())
    }

    async fn on_launch(&self, envelope: &RequestEnvelope) -> Result<Response, SkillError>;

    async fn on_intent(&self, envelope: &RequestEnvelope) -> Result<IntentReply, SkillError>;

    async fn on_session_ended(&self, _envelope: &RequestEnvelope) -> Result<(), SkillError> {
        Ok(())
    }
}

pub struct RemoteSkill {
    endpoint: String,
    retry_max_attempts: usize,
    retry_backoff: Duration,
    client: Client,
}

impl RemoteSkill {
    pub fn new(cfg: &colloquy_config::Skill) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            endpoint: cfg.endpoint.clone(),
            retry_max_attempts: cfg.retry_max_attempts.max(1),
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
            client,
        })
    }

    async fn call(
        &self,
        hook: SkillHook,
        envelope: &RequestEnvelope,
    ) -> Result<SkillReply, SkillError> {
        let call = SkillCall {
            hook,
            envelope: envelope.clone(),
        };
        let mut last_error = SkillError::Transport("no attempt made".to_string());
        for attempt in 0..self.retry_max_attempts {
            if attempt > 0 && self.retry_backoff > Duration::ZERO {
                sleep(self.retry_backoff).await;
            }
            let response = match self.client.post(&self.endpoint).json(&call).send().await {
                Ok(v) => v,
                Err(err) => {
                    warn!(?hook, attempt, error = %err, "skill request failed");
                    last_error = SkillError::Transport(err.to_string());
                    continue;
                }
            };
            let status = response.status();
            if !status.is_success() {
                warn!(?hook, attempt, status = status.as_u16(), "skill answered with error status");
                last_error = SkillError::Status(status.as_u16());
                if status.is_client_error() {
                    break;
                }
                continue;
            }
            return response
                .json::<SkillReply>()
                .await
                .map_err(|e| SkillError::Decode(e.to_string()));
        }
        Err(last_error)
    }
}

#[async_trait]
impl Skill for RemoteSkill {
    async fn on_session_started(&self, envelope: &RequestEnvelope) -> Result<(), SkillError> {
        self.call(SkillHook::SessionStarted, envelope).await.map(|_| ())
    }

    async fn on_launch(&self, envelope: &RequestEnvelope) -> Result<Response, SkillError> {
        let reply = self.call(SkillHook::Launch, envelope).await?;
        Ok(reply.response.unwrap_or_default())
    }

    async fn on_intent(&self, envelope: &RequestEnvelope) -> Result<IntentReply, SkillError> {
        let reply = self.call(SkillHook::Intent, envelope).await?;
        Ok(IntentReply {
            response: reply.response.unwrap_or_default(),
            context: reply.context,
        })
    }

    async fn on_session_ended(&self, envelope: &RequestEnvelope) -> Result<(), SkillError> {
        self.call(SkillHook::SessionEnded, envelope).await.map(|_| ())
    }
}

/// Slot-specific validation hook. Gets the incoming slot and the reconstructed
/// intent; a non-empty return is asked back to the user and ends the turn.
pub type SlotHandler = Arc<dyn Fn(&Slot, &mut Intent) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("slot handler `{0}` is declared in the dialog model but not registered")]
pub struct UnregisteredHandler(pub String);

#[derive(Clone, Default)]
pub struct SlotHandlers {
    handlers: HashMap<String, SlotHandler>,
}

impl fmt::Debug for SlotHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("SlotHandlers").field("names", &names).finish()
    }
}

impl SlotHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Slot, &mut Intent) -> Option<String> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn validate(&self, model: &DialogModel) -> Result<(), UnregisteredHandler> {
        match model
            .handler_names()
            .into_iter()
            .find(|name| !self.handlers.contains_key(*name))
        {
            Some(missing) => Err(UnregisteredHandler(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Runs the handler of every incoming slot that declares one, in slot
    /// name order. Returns the first non-empty prompt.
    pub(crate) fn run(
        &self,
        schema: &DialogIntent,
        incoming: &Intent,
        intent: &mut Intent,
    ) -> Option<String> {
        for slot in incoming.slots.values() {
            let Some(name) = schema
                .slot(&slot.name)
                .and_then(|s| s.handler.as_deref())
                .filter(|h| !h.is_empty())
            else {
                continue;
            };
            let Some(handler) = self.handlers.get(name) else {
                warn!(handler = name, slot = %slot.name, "slot handler not registered");
                continue;
            };
            if let Some(ask) = handler(slot, intent).filter(|ask| !ask.is_empty()) {
                debug!(handler = name, slot = %slot.name, "slot handler asked back");
                return Some(ask);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use colloquy_contracts::{Context, Request, System};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn launch_envelope() -> RequestEnvelope {
        serde_json::from_value(serde_json::json!({
            "version": "2.0",
            "context": {"system": {
                "user": {"userId": "u1", "appId": "a1"},
                "device": {"deviceId": "d1"},
                "skill": {"skillId": "s1"}
            }},
            "request": {"type": "LaunchRequest", "requestId": "r1", "timestamp": ""}
        }))
        .unwrap()
    }

    fn skill_config(endpoint: String, attempts: usize) -> colloquy_config::Skill {
        colloquy_config::Skill {
            endpoint,
            timeout_ms: 1_000,
            retry_max_attempts: attempts,
            retry_backoff_ms: 1,
        }
    }

    async fn spawn(app: Router) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/skill"), handle)
    }

    #[tokio::test]
    async fn remote_skill_posts_hook_and_envelope() {
        async fn answer(Json(call): Json<SkillCall>) -> Json<SkillReply> {
            assert_eq!(call.hook, SkillHook::Launch);
            assert!(matches!(call.envelope.request, Request::LaunchRequest(_)));
            Json(SkillReply {
                response: Some(Response::ask("Welcome to trip planner")),
                context: Some(Context::default().with_system(System::new("u", "a", "d", "s"))),
            })
        }
        let (endpoint, handle) = spawn(Router::new().route("/skill", post(answer))).await;
        let skill = RemoteSkill::new(&skill_config(endpoint, 1)).unwrap();

        let response = skill.on_launch(&launch_envelope()).await.unwrap();
        assert_eq!(
            response.results[0].first_plain_text(),
            Some("Welcome to trip planner")
        );
        handle.abort();
    }

    #[tokio::test]
    async fn remote_skill_retries_server_errors() {
        async fn flaky(State(hits): State<Arc<AtomicUsize>>) -> (StatusCode, Json<SkillReply>) {
            if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                (StatusCode::SERVICE_UNAVAILABLE, Json(SkillReply::default()))
            } else {
                (
                    StatusCode::OK,
                    Json(SkillReply {
                        response: Some(Response::tell("done")),
                        context: None,
                    }),
                )
            }
        }
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/skill", post(flaky))
            .with_state(hits.clone());
        let (endpoint, handle) = spawn(app).await;
        let skill = RemoteSkill::new(&skill_config(endpoint, 3)).unwrap();

        let reply = skill.on_intent(&launch_envelope()).await.unwrap();
        assert!(reply.response.should_end_session);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        handle.abort();
    }

    #[tokio::test]
    async fn remote_skill_does_not_retry_client_errors() {
        async fn reject(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
            hits.fetch_add(1, Ordering::SeqCst);
            StatusCode::BAD_REQUEST
        }
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/skill", post(reject))
            .with_state(hits.clone());
        let (endpoint, handle) = spawn(app).await;
        let skill = RemoteSkill::new(&skill_config(endpoint, 3)).unwrap();

        let err = skill.on_intent(&launch_envelope()).await.unwrap_err();
        assert!(matches!(err, SkillError::Status(400)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn remote_skill_reports_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let skill = RemoteSkill::new(&skill_config(format!("http://{addr}/skill"), 2)).unwrap();
        let err = skill.on_session_started(&launch_envelope()).await.unwrap_err();
        assert!(matches!(err, SkillError::Transport(_)));
    }

    fn handler_model() -> DialogModel {
        serde_json::from_value(serde_json::json!({
            "dialog": {"intents": [{
                "name": "PlanMyTrip",
                "slots": [
                    {"name": "travelDate", "handler": "checkDate"},
                    {"name": "toCity"}
                ]
            }]},
            "prompts": []
        }))
        .unwrap()
    }

    #[test]
    fn validate_requires_every_declared_handler() {
        let model = handler_model();
        assert_eq!(
            SlotHandlers::new().validate(&model),
            Err(UnregisteredHandler("checkDate".into()))
        );
        let handlers = SlotHandlers::new().register("checkDate", |_, _| None);
        assert_eq!(handlers.validate(&model), Ok(()));
    }

    #[test]
    fn run_returns_first_non_empty_prompt() {
        let model = handler_model();
        let schema = model.intent("PlanMyTrip").unwrap();
        let handlers = SlotHandlers::new().register("checkDate", |slot: &Slot, intent: &mut Intent| {
            if slot.string_value() == Some("yesterday") {
                intent.set_slot(Slot::new("travelDate"));
                Some("Please pick a future date.".to_string())
            } else {
                Some(String::new())
            }
        });

        let mut intent = Intent::new("PlanMyTrip");
        let ok = Intent::new("PlanMyTrip")
            .with_slot(Slot::new("travelDate").with_string_value("2018-04-11"))
            .with_slot(Slot::new("toCity").with_string_value("Seattle"));
        assert_eq!(handlers.run(schema, &ok, &mut intent), None);

        let bad = Intent::new("PlanMyTrip")
            .with_slot(Slot::new("travelDate").with_string_value("yesterday"));
        assert_eq!(
            handlers.run(schema, &bad, &mut intent).as_deref(),
            Some("Please pick a future date.")
        );
        assert!(intent.slot("travelDate").is_some());
    }
}
