use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resolution::Resolutions;
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationStatus {
    #[default]
    None,
    Confirmed,
    Denied,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DialogState {
    Started,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(rename = "confirmationStatus", default)]
    pub confirmation_status: ConfirmationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolutions: Option<Resolutions>,
}

impl Slot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            confirmation_status: ConfirmationStatus::None,
            resolutions: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_string_value(self, v: impl Into<String>) -> Self {
        self.with_value(Value::string(v))
    }

    pub fn with_status(mut self, status: ConfirmationStatus) -> Self {
        self.confirmation_status = status;
        self
    }

    pub fn with_resolutions(mut self, resolutions: Resolutions) -> Self {
        self.resolutions = Some(resolutions);
        self
    }

    pub fn has_value(&self) -> bool {
        self.value.as_ref().map(Value::has_value).unwrap_or(false)
    }

    pub fn can_elicit(&self) -> bool {
        !self.has_value()
    }

    pub fn can_confirm(&self) -> bool {
        self.has_value() && self.confirmation_status == ConfirmationStatus::None
    }

    pub fn string_value(&self) -> Option<&str> {
        self.value.as_ref().and_then(|v| v.string_value().ok())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    pub name: String,
    #[serde(rename = "subName", default, skip_serializing_if = "String::is_empty")]
    pub sub_name: String,
    #[serde(rename = "confirmationStatus", default)]
    pub confirmation_status: ConfirmationStatus,
    #[serde(default)]
    pub slots: BTreeMap<String, Slot>,
}

impl Intent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_sub_name(mut self, sub_name: impl Into<String>) -> Self {
        self.sub_name = sub_name.into();
        self
    }

    pub fn with_status(mut self, status: ConfirmationStatus) -> Self {
        self.confirmation_status = status;
        self
    }

    /// Slots without a name are ignored.
    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.set_slot(slot);
        self
    }

    pub fn set_slot(&mut self, slot: Slot) {
        if slot.name.is_empty() {
            return;
        }
        self.slots.insert(slot.name.clone(), slot);
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    pub fn slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.slots.get_mut(name)
    }

    pub fn started(&self) -> bool {
        !self.slots.values().any(Slot::has_value)
    }

    /// A missing slot counts as absent, so it can be elicited.
    pub fn can_elicit(&self, slot_name: &str) -> bool {
        self.slot(slot_name).map(Slot::can_elicit).unwrap_or(true)
    }

    pub fn can_confirm(&self, slot_name: &str) -> bool {
        self.slot(slot_name).map(Slot::can_confirm).unwrap_or(false)
    }

    pub fn normalize(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        for (key, mut slot) in slots {
            if slot.name.is_empty() {
                slot.name = key;
            }
            self.slots.insert(slot.name.clone(), slot);
        }
    }

    /// Folds `source` into `self`.
    ///
    /// Every valued slot in `source` replaces the same-named slot wholesale,
    /// confirmation status included. The intent status is taken from `source`
    /// only while ours is still `None`. Refuses (returns false, no change) when
    /// the names differ or `source` has no slots. Never removes a value.
    pub fn merge(&mut self, source: &Intent) -> bool {
        if self.name != source.name || source.slots.is_empty() {
            return false;
        }
        for (key, slot) in &source.slots {
            if slot.has_value() {
                self.slots.insert(key.clone(), slot.clone());
            }
        }
        if self.confirmation_status == ConfirmationStatus::None {
            self.confirmation_status = source.confirmation_status;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trip() -> Intent {
        Intent::new("PlanMyTrip")
            .with_slot(Slot::new("fromCity"))
            .with_slot(Slot::new("toCity"))
            .with_slot(Slot::new("travelDate"))
    }

    #[test]
    fn slot_predicates() {
        let empty = Slot::new("toCity");
        assert!(empty.can_elicit());
        assert!(!empty.can_confirm());

        let valued = Slot::new("toCity").with_string_value("Seattle");
        assert!(!valued.can_elicit());
        assert!(valued.can_confirm());

        let confirmed = valued.clone().with_status(ConfirmationStatus::Confirmed);
        assert!(!confirmed.can_confirm());

        let intent = Intent::new("PlanMyTrip");
        assert!(intent.can_elicit("missing"));
        assert!(!intent.can_confirm("missing"));
    }

    #[test]
    fn merge_refuses_valueless_or_mismatched_source() {
        let mut target = trip().with_slot(Slot::new("fromCity").with_string_value("Beijing"));
        let before = target.clone();

        assert!(!target.merge(&Intent::new("PlanMyTrip")));
        assert_eq!(target, before);

        let other = Intent::new("Weather").with_slot(Slot::new("city").with_string_value("x"));
        assert!(!target.merge(&other));
        assert_eq!(target, before);
    }

    #[test]
    fn merge_with_only_empty_slots_changes_nothing() {
        let mut target = trip().with_slot(Slot::new("fromCity").with_string_value("Beijing"));
        let before = target.clone();
        assert!(target.merge(&trip()));
        assert_eq!(target, before);
    }

    #[test]
    fn merge_replaces_whole_slot() {
        let mut target = trip().with_slot(
            Slot::new("toCity")
                .with_string_value("Sanya")
                .with_status(ConfirmationStatus::Confirmed),
        );
        let source = Intent::new("PlanMyTrip").with_slot(Slot::new("toCity").with_string_value("Seattle"));

        assert!(target.merge(&source));
        assert_eq!(target.slot("toCity"), source.slot("toCity"));
        assert_eq!(
            target.slot("toCity").unwrap().confirmation_status,
            ConfirmationStatus::None
        );
        // untouched slots survive
        assert!(target.slot("travelDate").is_some());
    }

    #[test]
    fn merge_carries_slot_resolutions() {
        let wire = json!({
            "name": "toCity",
            "value": {"orgin": "sea", "normType": "String", "norm": "Seattle"},
            "confirmationStatus": "NONE",
            "resolutions": {"resolutionsPerAuthority": [{
                "authority": "city.builtin",
                "status": {"code": "ER_SUCCESS_MATCH"},
                "values": [{"value": {"name": "Seattle", "id": "SEA"}}]
            }]}
        });
        let slot: Slot = serde_json::from_value(wire.clone()).unwrap();
        let mut target = trip();
        assert!(target.merge(&Intent::new("PlanMyTrip").with_slot(slot)));

        let merged = target.slot("toCity").unwrap();
        assert_eq!(
            merged.resolutions.as_ref().and_then(|r| r.first_match()).map(|e| e.id.as_str()),
            Some("SEA")
        );
        assert_eq!(serde_json::to_value(merged).unwrap(), wire);
    }

    #[test]
    fn merge_intent_status_only_fills_none() {
        let source = Intent::new("PlanMyTrip")
            .with_status(ConfirmationStatus::Denied)
            .with_slot(Slot::new("toCity").with_string_value("Seattle"));

        let mut target = trip();
        target.merge(&source);
        assert_eq!(target.confirmation_status, ConfirmationStatus::Denied);

        let mut target = trip().with_status(ConfirmationStatus::Confirmed);
        target.merge(&source);
        assert_eq!(target.confirmation_status, ConfirmationStatus::Confirmed);
    }

    #[test]
    fn started_tracks_any_value() {
        let mut intent = trip();
        assert!(intent.started());
        intent.set_slot(Slot::new("travelDate").with_string_value("2018-04-11"));
        assert!(!intent.started());
    }

    #[test]
    fn normalize_fills_missing_slot_names() {
        let mut intent: Intent = serde_json::from_value(json!({
            "name": "PlanMyTrip",
            "slots": {
                "toCity": {"value": {"normType": "String", "norm": "Seattle"}}
            }
        }))
        .unwrap();
        intent.normalize();
        assert_eq!(intent.slot("toCity").unwrap().name, "toCity");
        assert_eq!(intent.confirmation_status, ConfirmationStatus::None);
    }

    #[test]
    fn wire_form() {
        let intent = Intent::new("PlanMyTrip")
            .with_slot(Slot::new("toCity").with_string_value("Seattle"));
        assert_eq!(
            serde_json::to_value(&intent).unwrap(),
            json!({
                "name": "PlanMyTrip",
                "confirmationStatus": "NONE",
                "slots": {
                    "toCity": {
                        "name": "toCity",
                        "value": {"orgin": null, "normType": "String", "norm": "Seattle"},
                        "confirmationStatus": "NONE"
                    }
                }
            })
        );
        assert_eq!(
            serde_json::to_value(DialogState::InProgress).unwrap(),
            json!("IN_PROGRESS")
        );
    }
}
