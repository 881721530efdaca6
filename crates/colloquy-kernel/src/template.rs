use std::collections::BTreeMap;

use colloquy_contracts::{Intent, Response, SpeechType};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("invalid placeholder format")]
    InvalidFormat,
    #[error("unknown placeholder `{0}`")]
    UnknownParam(String),
}

/// Substitutes `{$name}` placeholders from `params`.
///
/// A `{$` seen while a placeholder is already open restarts it; the text in
/// between is kept literally. Every `}` must close an open placeholder.
pub fn resolve_placeholders(
    text: &str,
    params: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut start = 0;
    let mut open = false;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '{' && chars.get(i + 1) == Some(&'$') {
            out.extend(&chars[start..i]);
            start = i + 2;
            open = true;
            i += 2;
            continue;
        }
        if chars[i] == '}' {
            if !open {
                return Err(TemplateError::InvalidFormat);
            }
            let name: String = chars[start..i].iter().collect();
            let value = params
                .get(&name)
                .ok_or(TemplateError::UnknownParam(name))?;
            out.push_str(value);
            start = i + 1;
            open = false;
        }
        i += 1;
    }
    if open {
        return Err(TemplateError::InvalidFormat);
    }
    out.extend(&chars[start..]);
    Ok(out)
}

pub fn intent_params(intent: &Intent) -> BTreeMap<String, String> {
    intent
        .slots
        .iter()
        .map(|(name, slot)| {
            let text = slot
                .value
                .as_ref()
                .map(|v| v.display_text())
                .unwrap_or_default();
            (name.clone(), text)
        })
        .collect()
}

/// Resolves placeholders in every hint and plain-text speech item. Strings
/// that fail to resolve are left as they were.
pub fn resolve_response(intent: &Intent, response: &mut Response) {
    if response.results.is_empty() {
        return;
    }
    let params = intent_params(intent);
    for result in &mut response.results {
        resolve_in_place(&mut result.hint, &params);
        if let Some(speech) = result.output_speech.as_mut() {
            for item in speech
                .items
                .iter_mut()
                .filter(|item| item.speech_type == SpeechType::PlainText)
            {
                resolve_in_place(&mut item.source, &params);
            }
        }
    }
}

fn resolve_in_place(text: &mut String, params: &BTreeMap<String, String>) {
    if text.is_empty() {
        return;
    }
    match resolve_placeholders(text, params) {
        Ok(resolved) => *text = resolved,
        Err(err) => warn!(error = %err, text = %text, "placeholder resolution failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_contracts::{ResultItem, Slot, Value};

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_params() {
        let p = params(&[("toCity", "Seattle"), ("date", "2018-04-11")]);
        assert_eq!(
            resolve_placeholders("trip to {$toCity} on {$date}", &p).unwrap(),
            "trip to Seattle on 2018-04-11"
        );
        assert_eq!(resolve_placeholders("", &p).unwrap(), "");
        assert_eq!(resolve_placeholders("no params", &p).unwrap(), "no params");
        assert_eq!(resolve_placeholders("{$date}", &p).unwrap(), "2018-04-11");
    }

    #[test]
    fn reopened_placeholder_keeps_text_between() {
        let p = params(&[("b", "B")]);
        assert_eq!(resolve_placeholders("x{$a{$b}y", &p).unwrap(), "xaBy");
        assert_eq!(
            resolve_placeholders("{$a{$b}}", &p),
            Err(TemplateError::InvalidFormat)
        );
    }

    #[test]
    fn rejects_unbalanced_and_unknown() {
        let p = params(&[("a", "A")]);
        assert_eq!(
            resolve_placeholders("oops }", &p),
            Err(TemplateError::InvalidFormat)
        );
        assert_eq!(
            resolve_placeholders("open {$a", &p),
            Err(TemplateError::InvalidFormat)
        );
        assert_eq!(
            resolve_placeholders("{$missing}", &p),
            Err(TemplateError::UnknownParam("missing".into()))
        );
        // a lone brace without `$` is plain text until a `}` shows up
        assert_eq!(resolve_placeholders("{a", &p).unwrap(), "{a");
    }

    #[test]
    fn handles_multibyte_text() {
        let p = params(&[("city", "北京")]);
        assert_eq!(
            resolve_placeholders("去{$city}的旅行", &p).unwrap(),
            "去北京的旅行"
        );
    }

    #[test]
    fn resolves_hints_and_plain_text_only() {
        let intent = Intent::new("PlanMyTrip")
            .with_slot(Slot::new("toCity").with_value(Value::string("SEA").with_origin("Seattle")))
            .with_slot(Slot::new("travelDate").with_string_value("2018-04-11"))
            .with_slot(Slot::new("fromCity"));
        let mut result = ResultItem::default()
            .with_hint("to {$toCity}")
            .with_plain_text("to {$toCity} on {$travelDate}{$fromCity}");
        result.push_speech(SpeechType::Ssml, "<speak>{$toCity}</speak>");
        let mut unresolved = ResultItem::default().with_plain_text("see {$weather}");
        unresolved.hint = "broken }".into();
        let mut response = Response::ask("").with_results(vec![result, unresolved]);

        resolve_response(&intent, &mut response);

        let first = &response.results[0];
        assert_eq!(first.hint, "to Seattle");
        let items = &first.output_speech.as_ref().unwrap().items;
        assert_eq!(items[0].source, "to Seattle on 2018-04-11");
        assert_eq!(items[1].source, "<speak>{$toCity}</speak>");

        let second = &response.results[1];
        assert_eq!(second.hint, "broken }");
        assert_eq!(second.first_plain_text(), Some("see {$weather}"));
    }
}
