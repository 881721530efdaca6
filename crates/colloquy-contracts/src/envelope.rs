use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::intent::{DialogState, Intent};
use crate::value::Value;

pub const RESPONSE_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillInfo {
    #[serde(rename = "skillId", default)]
    pub skill_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(rename = "appId", default)]
    pub app_id: String,
    #[serde(rename = "accessToken", default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    #[serde(rename = "deviceId", default)]
    pub device_id: String,
    #[serde(
        rename = "supportedInterfaces",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub supported_interfaces: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct System {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<SkillInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
}

impl System {
    pub fn new(user_id: &str, app_id: &str, device_id: &str, skill_id: &str) -> Self {
        Self {
            skill: Some(SkillInfo {
                skill_id: skill_id.to_string(),
            }),
            user: Some(User {
                user_id: user_id.to_string(),
                app_id: app_id.to_string(),
                access_token: None,
            }),
            device: Some(Device {
                device_id: device_id.to_string(),
                supported_interfaces: None,
            }),
            parameters: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityParts {
    pub user_id: String,
    pub app_id: String,
    pub device_id: String,
    pub skill_id: String,
}

/// Request context in, shared slot parameters out. `parameters` is echoed by
/// clients on the next turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<System>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(rename = "lifespanInMs", default, skip_serializing_if = "Option::is_none")]
    pub lifespan_in_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
}

impl Context {
    pub fn with_system(mut self, system: System) -> Self {
        self.system = Some(system);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    pub fn clear_system(&mut self) {
        self.system = None;
    }

    pub fn identity(&self) -> IdentityParts {
        let system = self.system.as_ref();
        let user = system.and_then(|s| s.user.as_ref());
        IdentityParts {
            user_id: user.map(|u| u.user_id.clone()).unwrap_or_default(),
            app_id: user.map(|u| u.app_id.clone()).unwrap_or_default(),
            device_id: system
                .and_then(|s| s.device.as_ref())
                .map(|d| d.device_id.clone())
                .unwrap_or_default(),
            skill_id: system
                .and_then(|s| s.skill.as_ref())
                .map(|s| s.skill_id.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoreRequest {
    #[serde(rename = "requestId", default)]
    pub request_id: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    UserInitiated,
    Error,
    ExceededMaxReprompts,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemError {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEndedRequest {
    #[serde(flatten)]
    pub core: CoreRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SystemError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentRequest {
    #[serde(flatten)]
    pub core: CoreRequest,
    pub intent: Intent,
    #[serde(rename = "dialogState", default, skip_serializing_if = "Option::is_none")]
    pub dialog_state: Option<DialogState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentsRequest {
    #[serde(flatten)]
    pub core: CoreRequest,
    #[serde(default)]
    pub intents: Vec<Intent>,
    #[serde(rename = "dialogState", default, skip_serializing_if = "Option::is_none")]
    pub dialog_state: Option<DialogState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    SessionStartedRequest(CoreRequest),
    SessionEndedRequest(SessionEndedRequest),
    LaunchRequest(CoreRequest),
    IntentRequest(IntentRequest),
    IntentsRequest(IntentsRequest),
}

impl Request {
    pub fn core(&self) -> &CoreRequest {
        match self {
            Request::SessionStartedRequest(core) | Request::LaunchRequest(core) => core,
            Request::SessionEndedRequest(r) => &r.core,
            Request::IntentRequest(r) => &r.core,
            Request::IntentsRequest(r) => &r.core,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.core().request_id
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::SessionStartedRequest(_) => "SessionStartedRequest",
            Request::SessionEndedRequest(_) => "SessionEndedRequest",
            Request::LaunchRequest(_) => "LaunchRequest",
            Request::IntentRequest(_) => "IntentRequest",
            Request::IntentsRequest(_) => "IntentsRequest",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub context: Context,
    pub request: Request,
}

/// Closed set of dialog outcomes a skill may return. Only `Delegate` is acted
/// on by the dispatcher; the rest go back to the client as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Directive {
    #[serde(rename = "Dialog.Delegate")]
    Delegate {
        #[serde(rename = "updatedIntent", default, skip_serializing_if = "Option::is_none")]
        updated_intent: Option<Intent>,
    },
    #[serde(rename = "Dialog.ElicitSlot")]
    ElicitSlot {
        #[serde(rename = "updatedIntent", default, skip_serializing_if = "Option::is_none")]
        updated_intent: Option<Intent>,
        #[serde(rename = "slotToElicit")]
        slot_to_elicit: String,
    },
    #[serde(rename = "Dialog.ConfirmSlot")]
    ConfirmSlot {
        #[serde(rename = "updatedIntent", default, skip_serializing_if = "Option::is_none")]
        updated_intent: Option<Intent>,
        #[serde(rename = "slotToConfirm")]
        slot_to_confirm: String,
    },
    #[serde(rename = "Dialog.ConfirmIntent")]
    ConfirmIntent {
        #[serde(rename = "updatedIntent", default, skip_serializing_if = "Option::is_none")]
        updated_intent: Option<Intent>,
    },
}

impl Directive {
    pub fn delegate(intent: Intent) -> Self {
        Directive::Delegate {
            updated_intent: Some(intent),
        }
    }

    pub fn elicit_slot(slot: impl Into<String>, intent: Intent) -> Self {
        Directive::ElicitSlot {
            updated_intent: Some(intent),
            slot_to_elicit: slot.into(),
        }
    }

    pub fn confirm_slot(slot: impl Into<String>, intent: Intent) -> Self {
        Directive::ConfirmSlot {
            updated_intent: Some(intent),
            slot_to_confirm: slot.into(),
        }
    }

    pub fn confirm_intent(intent: Intent) -> Self {
        Directive::ConfirmIntent {
            updated_intent: Some(intent),
        }
    }

    pub fn updated_intent(&self) -> Option<&Intent> {
        match self {
            Directive::Delegate { updated_intent }
            | Directive::ElicitSlot { updated_intent, .. }
            | Directive::ConfirmSlot { updated_intent, .. }
            | Directive::ConfirmIntent { updated_intent } => updated_intent.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpeechType {
    PlainText,
    #[serde(rename = "SSML")]
    Ssml,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeechItem {
    #[serde(rename = "type")]
    pub speech_type: SpeechType,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeechItems {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<SpeechItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptItem {
    #[serde(rename = "type")]
    pub script_type: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptItems {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ScriptItem>,
}

/// What the device does if the user stays silent for `time_in_ms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeout {
    #[serde(rename = "timeInMs")]
    pub time_in_ms: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Emotion {
    #[serde(rename = "type")]
    pub emotion_type: String,
    #[serde(default)]
    pub level: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultItem {
    #[serde(rename = "formatType", default, skip_serializing_if = "Option::is_none")]
    pub format_type: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hint: String,
    #[serde(rename = "outputSpeech", default, skip_serializing_if = "Option::is_none")]
    pub output_speech: Option<SpeechItems>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<ScriptItems>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Timeout>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emotions: Vec<Emotion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ResultItem {
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn push_speech(&mut self, speech_type: SpeechType, source: impl Into<String>) {
        self.output_speech
            .get_or_insert_with(SpeechItems::default)
            .items
            .push(SpeechItem {
                speech_type,
                source: source.into(),
            });
    }

    pub fn with_plain_text(mut self, text: impl Into<String>) -> Self {
        self.push_speech(SpeechType::PlainText, text);
        self
    }

    pub fn with_script(mut self, script_type: impl Into<String>, source: impl Into<String>) -> Self {
        self.script
            .get_or_insert_with(ScriptItems::default)
            .items
            .push(ScriptItem {
                script_type: script_type.into(),
                source: source.into(),
            });
        self
    }

    pub fn with_timeout(mut self, time_in_ms: i64, action: impl Into<String>) -> Self {
        self.timeout = Some(Timeout {
            time_in_ms,
            action: action.into(),
        });
        self
    }

    pub fn with_emotion(mut self, emotion: Emotion) -> Self {
        self.emotions.push(emotion);
        self
    }

    pub fn first_plain_text(&self) -> Option<&str> {
        self.output_speech
            .as_ref()?
            .items
            .iter()
            .find(|item| item.speech_type == SpeechType::PlainText)
            .map(|item| item.source.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<Directive>,
    #[serde(rename = "shouldEndSession", default)]
    pub should_end_session: bool,
}

impl Response {
    pub fn ask(text: impl Into<String>) -> Self {
        Self::speech(text, false)
    }

    pub fn tell(text: impl Into<String>) -> Self {
        Self::speech(text, true)
    }

    pub fn delegate(directives: Vec<Directive>) -> Self {
        Self {
            results: Vec::new(),
            directives,
            should_end_session: false,
        }
    }

    pub fn with_results(mut self, results: Vec<ResultItem>) -> Self {
        self.results = results;
        self
    }

    pub fn with_should_end_session(mut self, end: bool) -> Self {
        self.should_end_session = end;
        self
    }

    pub fn has_directives(&self) -> bool {
        !self.directives.is_empty()
    }

    fn speech(text: impl Into<String>, end: bool) -> Self {
        Self {
            results: vec![ResultItem::default().with_plain_text(text)],
            directives: Vec::new(),
            should_end_session: end,
        }
    }
}

pub mod status_code {
    pub const SUCCESS: i32 = 0;
    pub const NO_RESULT: i32 = 1;
    pub const BAD_REQUEST: i32 = 400;
    pub const UNAUTHORIZED: i32 = 401;
    pub const INTERNAL: i32 = 500;
    pub const NOT_SUPPORTED: i32 = 501;
    pub const SERVICE_UNAVAILABLE: i32 = 601;
    pub const SERVICE_UNKNOWN_FORMAT: i32 = 602;
    pub const SERVICE_MISMATCHED: i32 = 603;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    pub code: i32,
    #[serde(rename = "errorType", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(rename = "errorDetails", default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(code: i32, detail: &str) -> Self {
        Self {
            code,
            error_type: None,
            error_details: Some(detail.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == status_code::SUCCESS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub version: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ResultItem>,
    /// Directives the skill emitted that the engine does not act on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<Directive>,
}

impl ResponseEnvelope {
    pub fn new(status: Status) -> Self {
        Self {
            version: RESPONSE_VERSION.to_string(),
            status,
            context: None,
            results: Vec::new(),
            directives: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Option<Context>) -> Self {
        self.context = context;
        self
    }

    pub fn with_results(mut self, results: Vec<ResultItem>) -> Self {
        self.results = results;
        self
    }

    pub fn with_directives(mut self, directives: Vec<Directive>) -> Self {
        self.directives = directives;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkillHook {
    SessionStarted,
    Launch,
    Intent,
    SessionEnded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillCall {
    pub hook: SkillHook,
    pub envelope: RequestEnvelope,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SkillReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Slot;
    use serde_json::json;

    #[test]
    fn decodes_intent_request_envelope() {
        let raw = json!({
            "version": "2.0",
            "context": {
                "system": {
                    "user": {"userId": "u1", "appId": "a1"},
                    "device": {"deviceId": "d1"},
                    "skill": {"skillId": "s1"}
                }
            },
            "request": {
                "type": "IntentRequest",
                "requestId": "12345",
                "timestamp": "2018-04-06T15:30:02+08:00",
                "intent": {
                    "name": "PlanMyTrip",
                    "confirmationStatus": "CONFIRMED",
                    "slots": {
                        "fromCity": {
                            "name": "fromCity",
                            "value": {"orgin": null, "normType": "String", "norm": "Beijing"},
                            "confirmationStatus": "CONFIRMED"
                        }
                    }
                },
                "dialogState": "COMPLETED"
            }
        });
        let envelope: RequestEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.request.request_id(), "12345");
        let Request::IntentRequest(req) = &envelope.request else {
            panic!("expected IntentRequest");
        };
        assert_eq!(req.dialog_state, Some(DialogState::Completed));
        assert_eq!(req.intent.slot("fromCity").unwrap().string_value(), Some("Beijing"));

        let id = envelope.context.identity();
        assert_eq!(id.user_id, "u1");
        assert_eq!(id.app_id, "a1");
        assert_eq!(id.device_id, "d1");
        assert_eq!(id.skill_id, "s1");
    }

    #[test]
    fn decodes_session_ended_request() {
        let req: Request = serde_json::from_value(json!({
            "type": "SessionEndedRequest",
            "requestId": "12345",
            "timestamp": "2018-04-06T15:30:02+08:00",
            "reason": "USER_INITIATED",
            "error": {"type": "INTERNAL_SERVICE_ERROR", "message": "boom"}
        }))
        .unwrap();
        let Request::SessionEndedRequest(ended) = req else {
            panic!("expected SessionEndedRequest");
        };
        assert_eq!(ended.reason, Some(EndReason::UserInitiated));
        assert_eq!(ended.error.unwrap().error_type, "INTERNAL_SERVICE_ERROR");
    }

    #[test]
    fn unknown_request_type_is_rejected() {
        let res: Result<Request, _> =
            serde_json::from_value(json!({"type": "AudioPlayerRequest", "requestId": "1"}));
        assert!(res.is_err());
    }

    #[test]
    fn directive_wire_form() {
        let intent = Intent::new("PlanMyTrip").with_slot(Slot::new("toCity"));
        let d = Directive::elicit_slot("toCity", intent.clone());
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["type"], "Dialog.ElicitSlot");
        assert_eq!(v["slotToElicit"], "toCity");
        assert_eq!(v["updatedIntent"]["name"], "PlanMyTrip");

        let back: Directive = serde_json::from_value(json!({"type": "Dialog.Delegate"})).unwrap();
        assert_eq!(back, Directive::Delegate { updated_intent: None });
        assert_eq!(Directive::delegate(intent.clone()).updated_intent(), Some(&intent));
    }

    #[test]
    fn ask_and_tell_responses() {
        let ask = Response::ask("Where to?");
        assert!(!ask.should_end_session);
        assert_eq!(ask.results[0].first_plain_text(), Some("Where to?"));
        assert!(Response::tell("Bye").should_end_session);
    }

    #[test]
    fn response_envelope_omits_empty_parts() {
        let env = ResponseEnvelope::new(Status::ok());
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({"version": "2.0", "status": {"code": 0}})
        );
        let env = ResponseEnvelope::new(Status::failed(status_code::INTERNAL, "service_internal_error"));
        assert_eq!(
            serde_json::to_value(&env).unwrap()["status"],
            json!({"code": 500, "errorDetails": "service_internal_error"})
        );
    }

    #[test]
    fn result_item_carries_script_timeout_and_emotions() {
        let wire = json!({
            "outputSpeech": {"items": [{"type": "PlainText", "source": "Seattle it is"}]},
            "script": {"items": [{"type": "H5", "source": "https://example.com/trip"}]},
            "timeout": {"timeInMs": 3000, "action": "Reprompt"},
            "emotions": [{"type": "happy", "level": 2, "code": "B001"}]
        });
        let item: ResultItem = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(item.timeout.as_ref().map(|t| t.time_in_ms), Some(3000));
        assert_eq!(item.emotions[0].code, "B001");
        assert_eq!(serde_json::to_value(&item).unwrap(), wire);

        let built = ResultItem::default()
            .with_plain_text("Seattle it is")
            .with_script("H5", "https://example.com/trip")
            .with_timeout(3000, "Reprompt")
            .with_emotion(Emotion {
                emotion_type: "happy".to_string(),
                level: 2,
                code: "B001".to_string(),
            });
        assert_eq!(built, item);
    }
}
