use std::sync::Arc;

use colloquy_contracts::{
    status_code, Context, Directive, Intent, IntentRequest, Request, RequestEnvelope,
    Response, ResponseEnvelope, Status,
};
use colloquy_kernel::dialog;
use colloquy_kernel::template;
use colloquy_kernel::{DialogIntent, DialogModel, Identity, Session};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::skill::{IntentReply, Skill, SkillError, SlotHandlers, UnregisteredHandler};
use crate::store::SessionStore;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request malformed: {0}")]
    RequestMalformed(String),
    #[error("intent `{0}` is not declared in the dialog model")]
    SchemaMismatch(String),
    #[error(transparent)]
    HandlerFailure(#[from] SkillError),
}

impl DispatchError {
    pub fn status(&self) -> Status {
        match self {
            DispatchError::RequestMalformed(_) => {
                Status::failed(status_code::BAD_REQUEST, "request_malformed")
            }
            DispatchError::SchemaMismatch(_) => {
                Status::failed(status_code::SERVICE_MISMATCHED, "service_mismatched")
            }
            DispatchError::HandlerFailure(_) => {
                Status::failed(status_code::INTERNAL, "service_internal_error")
            }
        }
    }
}

#[derive(Debug, Default)]
struct Turn {
    response: Option<Response>,
    context: Option<Context>,
}

impl Turn {
    fn into_envelope(self) -> ResponseEnvelope {
        let (results, directives) = match self.response {
            Some(response) => (response.results, response.directives),
            None => (Vec::new(), Vec::new()),
        };
        ResponseEnvelope::new(Status::ok())
            .with_context(self.context)
            .with_results(results)
            .with_directives(directives)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    model: Arc<DialogModel>,
    store: SessionStore,
    skill: Arc<dyn Skill>,
    slot_handlers: SlotHandlers,
}

impl Dispatcher {
    pub fn new(
        model: Arc<DialogModel>,
        store: SessionStore,
        skill: Arc<dyn Skill>,
        slot_handlers: SlotHandlers,
    ) -> Result<Self, UnregisteredHandler> {
        slot_handlers.validate(&model)?;
        Ok(Self {
            model,
            store,
            skill,
            slot_handlers,
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub async fn handle_call(&self, body: &[u8]) -> Vec<u8> {
        let envelope = self.handle(body).await;
        serde_json::to_vec(&envelope).unwrap_or_else(|err| {
            error!(error = %err, "encode response envelope failed");
            br#"{"version":"2.0","status":{"code":500,"errorDetails":"service_internal_error"}}"#
                .to_vec()
        })
    }

    pub async fn handle(&self, body: &[u8]) -> ResponseEnvelope {
        let envelope = match serde_json::from_slice::<RequestEnvelope>(body) {
            Ok(envelope) => envelope,
            Err(err) => {
                let err = DispatchError::RequestMalformed(err.to_string());
                warn!(error = %err, "rejecting turn");
                return ResponseEnvelope::new(err.status());
            }
        };
        let request_id = match envelope.request.request_id() {
            "" => uuid::Uuid::new_v4().to_string(),
            id => id.to_string(),
        };
        let span = info_span!(
            "turn",
            request_id = %request_id,
            request_type = envelope.request.type_name()
        );
        match self.dispatch(envelope, &request_id).instrument(span).await {
            Ok(turn) => turn.into_envelope(),
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "turn failed");
                ResponseEnvelope::new(err.status())
            }
        }
    }

    async fn dispatch(
        &self,
        envelope: RequestEnvelope,
        request_id: &str,
    ) -> Result<Turn, DispatchError> {
        let identity = Identity::from(envelope.context.identity());
        identity
            .validate()
            .map_err(|e| DispatchError::RequestMalformed(e.to_string()))?;

        let mut session = match self.store.fetch(&identity).await {
            Ok(session) => session,
            Err(degraded) => {
                warn!(error = %degraded.source, "session store degraded, continuing without history");
                degraded.session
            }
        };
        debug!(session_id = %session.id, new = session.new, "session loaded");

        if session.new {
            self.skill.on_session_started(&envelope).await?;
        }

        match &envelope.request {
            Request::SessionStartedRequest(_) => {
                self.save(&session).await;
                Ok(Turn::default())
            }
            Request::LaunchRequest(_) => {
                let launched = self.skill.on_launch(&envelope).await;
                self.save(&session).await;
                Ok(Turn {
                    response: Some(launched?),
                    context: None,
                })
            }
            Request::SessionEndedRequest(ended) => {
                info!(reason = ?ended.reason, "session ended by client");
                let result = self.skill.on_session_ended(&envelope).await;
                session.clear_intents();
                if let Err(err) = self.store.drop_session(&identity).await {
                    warn!(session_id = %session.id, error = %err, "drop session failed");
                }
                result?;
                Ok(Turn::default())
            }
            Request::IntentsRequest(_) => {
                let replied = self.skill.on_intent(&envelope).await;
                self.save(&session).await;
                let reply = replied?;
                Ok(Turn {
                    response: Some(reply.response),
                    context: reply.context.map(|mut ctx| {
                        ctx.clear_system();
                        ctx
                    }),
                })
            }
            Request::IntentRequest(req) => {
                self.handle_intent(&envelope, req, session, request_id)
                    .await
            }
        }
    }

    async fn handle_intent(
        &self,
        envelope: &RequestEnvelope,
        req: &IntentRequest,
        mut session: Session,
        request_id: &str,
    ) -> Result<Turn, DispatchError> {
        let mut incoming = req.intent.clone();
        incoming.normalize();
        let model = self
            .skill
            .dialog_model(&envelope.context)
            .unwrap_or_else(|| Arc::clone(&self.model));
        let schema = model
            .intent(&incoming.name)
            .ok_or_else(|| DispatchError::SchemaMismatch(incoming.name.clone()))?;

        let mut intent = dialog::intent_from_model(schema, &incoming.sub_name);
        if let Some(history) = session.updated_intent(&intent.name) {
            intent.merge(history);
        }
        let started = intent.started();
        intent.merge(&incoming);
        dialog::clean_slots(&mut intent, schema);

        if let Some(ask) = self.slot_handlers.run(schema, &incoming, &mut intent) {
            session.merge_intent(&intent);
            self.save(&session).await;
            return Ok(Turn {
                response: Some(Response::ask(ask)),
                context: Some(outgoing_context(None, &intent, schema)),
            });
        }

        let state = dialog::classify(started, &intent, schema);
        info!(session_id = %session.id, intent = %intent.name, state = ?state, "invoking skill");

        let mut call = envelope.clone();
        call.request = Request::IntentRequest(IntentRequest {
            core: req.core.clone(),
            intent: intent.clone(),
            dialog_state: Some(state),
        });
        let IntentReply {
            mut response,
            context,
        } = match self.skill.on_intent(&call).await {
            Ok(reply) => reply,
            Err(err) => {
                session.merge_intent(&intent);
                self.save(&session).await;
                return Err(err.into());
            }
        };

        if response.has_directives() {
            response = apply_directives(&model, response, &mut intent, &mut session, request_id);
        }
        template::resolve_response(&intent, &mut response);

        if response.should_end_session {
            session.clear_intents();
        } else {
            session.merge_intent(&intent);
        }
        self.save(&session).await;

        Ok(Turn {
            response: Some(response),
            context: Some(outgoing_context(context, &intent, schema)),
        })
    }

    async fn save(&self, session: &Session) {
        if let Err(err) = self.store.save(session).await {
            warn!(session_id = %session.id, error = %err, "session save failed");
        }
    }
}

fn apply_directives(
    model: &DialogModel,
    mut response: Response,
    intent: &mut Intent,
    session: &mut Session,
    request_id: &str,
) -> Response {
    let mut delegated = None;
    let mut passthrough = Vec::new();
    for directive in std::mem::take(&mut response.directives) {
        match directive {
            Directive::Delegate { updated_intent } => {
                if let Some(mut updated) = updated_intent {
                    updated.normalize();
                    if !intent.merge(&updated) {
                        debug!(intent = %intent.name, "delegate carried nothing to merge");
                    }
                }
                session.set_updated_intent(intent.clone());
                debug!(intent = %intent.name, "resolving delegate");
                delegated = Some(dialog::delegate_response(model, intent, request_id));
            }
            other => passthrough.push(other),
        }
    }
    let mut response = delegated.unwrap_or(response);
    response.directives = passthrough;
    response
}

/// Handler context (or a new one) plus every shareable slot value, with the
/// system block removed.
fn outgoing_context(handler: Option<Context>, intent: &Intent, schema: &DialogIntent) -> Context {
    let mut ctx = handler.unwrap_or_default();
    ctx.parameters
        .extend(dialog::shared_parameters(intent, Some(schema)));
    ctx.clear_system();
    ctx
}
