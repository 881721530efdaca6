use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DialogModel {
    #[serde(default)]
    pub dialog: Dialog,
    #[serde(default)]
    pub prompts: Vec<Prompt>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dialog {
    #[serde(default)]
    pub intents: Vec<DialogIntent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DialogIntent {
    pub name: String,
    #[serde(rename = "confirmationRequired", default)]
    pub confirmation_required: bool,
    #[serde(rename = "resultRequired", default)]
    pub result_required: bool,
    #[serde(default)]
    pub prompts: PromptIds,
    #[serde(default)]
    pub slots: Vec<DialogSlot>,
}

impl DialogIntent {
    pub fn slot(&self, name: &str) -> Option<&DialogSlot> {
        self.slots.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DialogSlot {
    pub name: String,
    #[serde(rename = "type", default)]
    pub slot_type: String,
    #[serde(rename = "confirmationRequired", default)]
    pub confirmation_required: bool,
    #[serde(rename = "elicitationRequired", default)]
    pub elicitation_required: bool,
    #[serde(rename = "concealRequired", default)]
    pub conceal_required: bool,
    #[serde(default)]
    pub prompts: PromptIds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    #[serde(default)]
    pub variations: Vec<Variation>,
}

/// One output channel of a prompt. Each entry of `value` is raw JSON decoded
/// according to `type` when the prompt is rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variation {
    #[serde(rename = "type")]
    pub variation_type: String,
    #[serde(default)]
    pub value: Vec<Box<RawValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("intent `{intent}` requires confirmation but has no confirmation prompt")]
    IntentConfirmation { intent: String },
    #[error("intent `{intent}` requires a result but has no result prompt")]
    IntentResult { intent: String },
    #[error("slot `{intent}.{slot}` requires elicitation but has no elicitation prompt")]
    SlotElicitation { intent: String, slot: String },
    #[error("slot `{intent}.{slot}` requires confirmation but has no confirmation prompt")]
    SlotConfirmation { intent: String, slot: String },
}

impl DialogModel {
    pub fn intent(&self, name: &str) -> Option<&DialogIntent> {
        self.dialog.intents.iter().find(|i| i.name == name)
    }

    pub fn slot(&self, intent: &str, slot: &str) -> Option<&DialogSlot> {
        self.intent(intent)?.slot(slot)
    }

    pub fn prompt(&self, id: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id == id)
    }

    pub fn slot_elicitation(&self, intent: &str, slot: &str) -> Option<&Prompt> {
        self.prompt(self.slot(intent, slot)?.prompts.elicitation.as_deref()?)
    }

    pub fn slot_confirmation(&self, intent: &str, slot: &str) -> Option<&Prompt> {
        self.prompt(self.slot(intent, slot)?.prompts.confirmation.as_deref()?)
    }

    pub fn intent_confirmation(&self, intent: &str) -> Option<&Prompt> {
        self.prompt(self.intent(intent)?.prompts.confirmation.as_deref()?)
    }

    pub fn intent_result(&self, intent: &str) -> Option<&Prompt> {
        self.prompt(self.intent(intent)?.prompts.result.as_deref()?)
    }

    /// Checks that every required prompt resolves. Stops at the first
    /// offender in declaration order.
    pub fn verify(&self) -> Result<(), VerifyError> {
        for intent in &self.dialog.intents {
            let name = &intent.name;
            if intent.confirmation_required && self.intent_confirmation(name).is_none() {
                return Err(VerifyError::IntentConfirmation {
                    intent: name.clone(),
                });
            }
            if intent.result_required && self.intent_result(name).is_none() {
                return Err(VerifyError::IntentResult {
                    intent: name.clone(),
                });
            }
            for slot in &intent.slots {
                if slot.elicitation_required && self.slot_elicitation(name, &slot.name).is_none() {
                    return Err(VerifyError::SlotElicitation {
                        intent: name.clone(),
                        slot: slot.name.clone(),
                    });
                }
                if slot.confirmation_required
                    && self.slot_confirmation(name, &slot.name).is_none()
                {
                    return Err(VerifyError::SlotConfirmation {
                        intent: name.clone(),
                        slot: slot.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn handler_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .dialog
            .intents
            .iter()
            .flat_map(|i| i.slots.iter())
            .filter_map(|s| s.handler.as_deref())
            .filter(|h| !h.is_empty())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
