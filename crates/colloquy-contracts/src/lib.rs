mod envelope;
mod intent;
mod resolution;
mod value;

pub use envelope::{
    status_code, Context, CoreRequest, Device, Directive, Emotion, EndReason, IdentityParts,
    IntentRequest, IntentsRequest, Request, RequestEnvelope, Response, ResponseEnvelope,
    ResultItem, ScriptItem, ScriptItems, SessionEndedRequest, SkillCall, SkillHook, SkillInfo,
    SkillReply, SpeechItem, SpeechItems, SpeechType, Status, System, SystemError, Timeout, User,
    RESPONSE_VERSION,
};
pub use intent::{ConfirmationStatus, DialogState, Intent, Slot};
pub use resolution::{
    Resolution, ResolutionCode, ResolutionStatus, ResolutionValue, Resolutions, ResolvedEntity,
};
pub use value::{Value, ValueError, ValueKind};

pub const API_VERSION: &str = "1.0.0";

#[derive(Debug, Clone)]
pub struct ContractSchemaManifest {
    pub path: &'static str,
    pub sha256: &'static str,
    pub body: &'static str,
}

#[derive(Debug, Clone)]
pub struct ContractsManifest {
    pub openapi_sha256: &'static str,
    pub contracts_set_sha256: &'static str,
    pub generated_at: &'static str,
    pub schemas: Vec<ContractSchemaManifest>,
}

impl ContractsManifest {
    pub fn schema(&self, file_name: &str) -> Option<&ContractSchemaManifest> {
        self.schemas
            .iter()
            .find(|s| s.path.rsplit('/').next() == Some(file_name))
    }
}

include!(concat!(env!("OUT_DIR"), "/generated_contracts.rs"));

pub fn contracts_manifest_v1() -> ContractsManifest {
    ContractsManifest {
        openapi_sha256: GENERATED_OPENAPI_SHA256,
        contracts_set_sha256: GENERATED_CONTRACTS_SET_SHA256,
        generated_at: GENERATED_AT_RFC3339,
        schemas: GENERATED_CONTRACT_SCHEMAS
            .iter()
            .map(|(path, sha256, body)| ContractSchemaManifest { path, sha256, body })
            .collect(),
    }
}
