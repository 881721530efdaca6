use std::collections::BTreeMap;

use colloquy_contracts::{IdentityParts, Intent};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::hash_id;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub user_id: String,
    pub app_id: String,
    pub device_id: String,
    pub skill_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("identity field `{0}` is empty")]
pub struct IdentityError(pub &'static str);

impl Identity {
    pub fn new(user_id: &str, app_id: &str, device_id: &str, skill_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            app_id: app_id.to_string(),
            device_id: device_id.to_string(),
            skill_id: skill_id.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), IdentityError> {
        for (field, value) in [
            ("userId", &self.user_id),
            ("appId", &self.app_id),
            ("deviceId", &self.device_id),
            ("skillId", &self.skill_id),
        ] {
            if value.is_empty() {
                return Err(IdentityError(field));
            }
        }
        Ok(())
    }
}

impl From<IdentityParts> for Identity {
    fn from(parts: IdentityParts) -> Self {
        Self {
            user_id: parts.user_id,
            app_id: parts.app_id,
            device_id: parts.device_id,
            skill_id: parts.skill_id,
        }
    }
}

pub fn session_id(identity: &Identity) -> String {
    hash_id(
        "session",
        &[
            identity.user_id.as_str(),
            identity.app_id.as_str(),
            identity.device_id.as_str(),
            identity.skill_id.as_str(),
        ],
    )
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    #[serde(rename = "updatedIntent", default)]
    pub updated_intent: BTreeMap<String, Intent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub new: bool,
    pub identity: Identity,
    pub updated_intents: BTreeMap<String, Intent>,
}

impl Session {
    pub fn fresh(identity: Identity) -> Self {
        Self {
            id: session_id(&identity),
            new: true,
            identity,
            updated_intents: BTreeMap::new(),
        }
    }

    pub fn from_record(identity: Identity, record: SessionRecord) -> Self {
        let mut updated_intents = record.updated_intent;
        for intent in updated_intents.values_mut() {
            intent.normalize();
        }
        Self {
            id: session_id(&identity),
            new: false,
            identity,
            updated_intents,
        }
    }

    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            updated_intent: self.updated_intents.clone(),
        }
    }

    pub fn updated_intent(&self, name: &str) -> Option<&Intent> {
        self.updated_intents.get(name)
    }

    pub fn set_updated_intent(&mut self, intent: Intent) {
        self.updated_intents.insert(intent.name.clone(), intent);
    }

    /// Folds `intent` into the stored entry of the same name, creating an
    /// empty entry first when there is none.
    pub fn merge_intent(&mut self, intent: &Intent) {
        let stored = self
            .updated_intents
            .entry(intent.name.clone())
            .or_insert_with(|| Intent::new(intent.name.clone()));
        if !stored.merge(intent) {
            debug!(session_id = %self.id, intent = %intent.name, "nothing to merge into session");
        }
    }

    pub fn clear_intents(&mut self) {
        self.updated_intents.clear();
    }
}
