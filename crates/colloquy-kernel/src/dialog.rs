use std::collections::BTreeMap;

use colloquy_contracts::{
    ConfirmationStatus, DialogState, Intent, Response, ResultItem, Slot, SpeechType, Value,
};
use serde_json::value::RawValue;
use tracing::warn;

use crate::model::{DialogIntent, DialogModel, Prompt};
use crate::seeded_index;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateStep {
    ElicitSlot(String),
    ConfirmSlot(String),
    Result,
    Nothing,
}

pub fn intent_from_model(schema: &DialogIntent, sub_name: &str) -> Intent {
    schema.slots.iter().fold(
        Intent::new(schema.name.clone()).with_sub_name(sub_name),
        |intent, slot| intent.with_slot(Slot::new(slot.name.clone())),
    )
}

pub fn slots_confirmed(intent: &Intent, schema: &DialogIntent) -> bool {
    schema.slots.iter().all(|slot| {
        !(slot.elicitation_required && intent.can_elicit(&slot.name))
            && !(slot.confirmation_required && intent.can_confirm(&slot.name))
    })
}

/// All slot requirements met. When the intent itself needs confirmation, it
/// must not have been answered yet.
pub fn completed(intent: &Intent, schema: &DialogIntent) -> bool {
    if !slots_confirmed(intent, schema) {
        return false;
    }
    !schema.confirmation_required || intent.confirmation_status == ConfirmationStatus::None
}

/// `started` is taken before the turn's input is merged; completion is judged
/// on the merged intent.
pub fn classify(started: bool, intent: &Intent, schema: &DialogIntent) -> DialogState {
    if completed(intent, schema) {
        DialogState::Completed
    } else if started {
        DialogState::Started
    } else {
        DialogState::InProgress
    }
}

/// Drops valueless slots nobody has to elicit. Undeclared slots count as not
/// required.
pub fn clean_slots(intent: &mut Intent, schema: &DialogIntent) {
    intent.slots.retain(|name, slot| {
        slot.has_value()
            || schema
                .slot(name)
                .map(|s| s.elicitation_required)
                .unwrap_or(false)
    });
}

pub fn next_step(intent: &Intent, schema: &DialogIntent) -> DelegateStep {
    if let Some(slot) = schema
        .slots
        .iter()
        .find(|s| s.elicitation_required && intent.can_elicit(&s.name))
    {
        return DelegateStep::ElicitSlot(slot.name.clone());
    }
    if let Some(slot) = schema
        .slots
        .iter()
        .find(|s| s.confirmation_required && intent.can_confirm(&s.name))
    {
        return DelegateStep::ConfirmSlot(slot.name.clone());
    }
    if schema.result_required {
        DelegateStep::Result
    } else {
        DelegateStep::Nothing
    }
}

pub fn delegate_response(model: &DialogModel, intent: &Intent, seed: &str) -> Response {
    let Some(schema) = model.intent(&intent.name) else {
        return Response::default();
    };
    let (prompt, end) = match next_step(intent, schema) {
        DelegateStep::ElicitSlot(slot) => (model.slot_elicitation(&intent.name, &slot), false),
        DelegateStep::ConfirmSlot(slot) => (model.slot_confirmation(&intent.name, &slot), false),
        DelegateStep::Result => (model.intent_result(&intent.name), true),
        DelegateStep::Nothing => (None, false),
    };
    let results = prompt
        .map(|p| result_from_prompt(p, seed))
        .into_iter()
        .collect();
    Response::default()
        .with_results(results)
        .with_should_end_session(end)
}

/// Renders a prompt, picking one value per variation. The same seed always
/// picks the same values.
pub fn result_from_prompt(prompt: &Prompt, seed: &str) -> ResultItem {
    let mut result = ResultItem::default();
    for variation in &prompt.variations {
        if variation.value.is_empty() {
            continue;
        }
        let speech_type = match variation.variation_type.as_str() {
            "PlainText" => SpeechType::PlainText,
            "SSML" => SpeechType::Ssml,
            "Audio" => SpeechType::Audio,
            other => {
                warn!(prompt = %prompt.id, variation = other, "unsupported prompt variation");
                continue;
            }
        };
        let raw = &variation.value[seeded_index(seed, variation.value.len())];
        let Some(text) = decode_text(raw) else {
            warn!(prompt = %prompt.id, value = raw.get(), "prompt value is not a JSON string");
            continue;
        };
        if speech_type == SpeechType::PlainText && result.hint.is_empty() {
            result.hint = text.clone();
        }
        result.push_speech(speech_type, text);
    }
    result
}

pub fn shared_parameters(intent: &Intent, schema: Option<&DialogIntent>) -> BTreeMap<String, Value> {
    intent
        .slots
        .iter()
        .filter(|(name, _)| {
            !schema
                .and_then(|s| s.slot(name))
                .map(|s| s.conceal_required)
                .unwrap_or(false)
        })
        .filter_map(|(name, slot)| {
            slot.value
                .as_ref()
                .filter(|v| v.has_value())
                .map(|v| (name.clone(), v.clone()))
        })
        .collect()
}

fn decode_text(raw: &RawValue) -> Option<String> {
    serde_json::from_str::<String>(raw.get()).ok()
}
