pub mod dialog;
pub mod model;
pub mod session;
pub mod template;

use sha2::{Digest, Sha256};

pub use dialog::DelegateStep;
pub use model::{DialogIntent, DialogModel, DialogSlot, Prompt, PromptIds, Variation, VerifyError};
pub use session::{session_id, Identity, IdentityError, Session, SessionRecord};
pub use template::TemplateError;

pub(crate) fn hash_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    format!("{prefix}_{}", hex(&hasher.finalize()))
}

/// Stable index in `0..len` derived from `seed`. `len` must be non-zero.
pub(crate) fn seeded_index(seed: &str, len: usize) -> usize {
    let digest = Sha256::digest(seed.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % len as u64) as usize
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::model::DialogModel;
    use serde_json::json;

    pub(crate) fn trip_model() -> DialogModel {
        serde_json::from_str(&json!({
            "dialog": {
                "intents": [{
                    "name": "PlanMyTrip",
                    "confirmationRequired": false,
                    "resultRequired": false,
                    "slots": [
                        {"name": "toCity", "type": "CITY", "elicitationRequired": true,
                         "prompts": {"elicitation": "Elicit.Slot.toCity"}},
                        {"name": "fromCity", "type": "CITY"},
                        {"name": "travelDate", "type": "DATE", "handler": "checkDate"}
                    ]
                }]
            },
            "prompts": [{
                "id": "Elicit.Slot.toCity",
                "variations": [{"type": "PlainText", "value": ["Where are you traveling to?"]}]
            }]
        }).to_string())
        .unwrap()
    }
}
