//! Chat export parsing: turns a raw transcript export into normalized records
//!
//! Exports come either as a bare list of message objects or as an object
//! with a `messages` list (the Telegram Desktop `result.json` layout). Field
//! names are an external contract, so every field is probed defensively
//! and only the message id is mandatory.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;

use crate::{CoreError, NormalizedRecord, Result};

/// Local timestamps as Telegram writes them, plus common variants
const LOCAL_DATE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
/// Fractional seconds are kept only when present
const NORMALIZED_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// One entry of the export, as found on disk
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    /// Numeric (or string) id; required
    #[serde(default)]
    pub id: Option<Value>,

    /// `message`, `service`, ... (informational only)
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    /// Display name of the author
    #[serde(default)]
    pub from: Option<String>,

    /// Author of service events
    #[serde(default)]
    pub actor: Option<String>,

    #[serde(default)]
    pub sender: Option<String>,

    /// Local ISO timestamp, e.g. `2023-01-02T10:00:00`
    #[serde(default)]
    pub date: Option<String>,

    /// Seconds since the epoch; Telegram writes it as a string
    #[serde(default)]
    pub date_unixtime: Option<Value>,

    /// Flat string, list of fragments, or absent
    #[serde(default)]
    pub text: Value,

    #[serde(default, alias = "reply_to")]
    pub reply_to_message_id: Option<Value>,
}

/// The shapes a message `text` field can take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawText {
    Empty,
    Plain(String),
    Fragments(Vec<TextFragment>),
}

/// One piece of a rich-text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextFragment {
    Plain(String),
    /// Styled span (bold, link, mention...); only its text matters
    Span(String),
}

impl RawText {
    /// Decide which variant a raw `text` value is.
    pub fn from_value(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::Null => Ok(RawText::Empty),
            Value::String(text) => Ok(RawText::Plain(text.clone())),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::String(text) => Ok(TextFragment::Plain(text.clone())),
                    Value::Object(span) => match span.get("text") {
                        None | Some(Value::Null) => Ok(TextFragment::Span(String::new())),
                        Some(Value::String(text)) => Ok(TextFragment::Span(text.clone())),
                        Some(other) => Err(format!(
                            "text fragment {} has a non-string `text` ({})",
                            i, other
                        )),
                    },
                    other => Err(format!("text fragment {} has unsupported shape ({})", i, other)),
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(RawText::Fragments),
            other => Err(format!("unsupported `text` value ({})", other)),
        }
    }

    /// Concatenate all fragments without separators, then collapse
    /// whitespace runs to single spaces and trim.
    pub fn flatten(&self) -> String {
        let joined = match self {
            RawText::Empty => return String::new(),
            RawText::Plain(text) => text.clone(),
            RawText::Fragments(fragments) => fragments
                .iter()
                .map(|fragment| match fragment {
                    TextFragment::Plain(text) | TextFragment::Span(text) => text.as_str(),
                })
                .collect::<String>(),
        };
        normalize_whitespace(&joined)
    }
}

/// Result of parsing one export
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Chat name, when the export envelope carries one
    pub name: Option<String>,
    /// Records in export order, empty-text messages removed
    pub records: Vec<NormalizedRecord>,
    /// Number of raw messages seen
    pub total_messages: usize,
}

impl Transcript {
    /// Messages dropped because their flattened text was empty
    pub fn skipped(&self) -> usize {
        self.total_messages - self.records.len()
    }
}

/// Parser for exported chat transcripts. Pure and deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranscriptParser;

impl TranscriptParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse an export from its JSON text
    pub fn parse_str(&self, json: &str) -> Result<Transcript> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| CoreError::Format(format!("export is not valid JSON: {}", e)))?;
        self.parse(&value)
    }

    /// Parse an already-decoded export document
    pub fn parse(&self, export: &Value) -> Result<Transcript> {
        let (name, messages) = match export {
            Value::Array(items) => (None, items),
            Value::Object(envelope) => match envelope.get("messages") {
                Some(Value::Array(items)) => (
                    envelope
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    items,
                ),
                _ => {
                    return Err(CoreError::Format(
                        "export object has no `messages` list".into(),
                    ))
                }
            },
            _ => {
                return Err(CoreError::Format(
                    "export must be a list of messages or an object with a `messages` list"
                        .into(),
                ))
            }
        };

        let mut records = Vec::with_capacity(messages.len());
        let mut seen = HashSet::with_capacity(messages.len());

        for (position, item) in messages.iter().enumerate() {
            if !item.is_object() {
                return Err(CoreError::Format(format!(
                    "message at position {} is not an object",
                    position
                )));
            }

            let raw: RawMessage = serde_json::from_value(item.clone()).map_err(|e| {
                CoreError::Format(format!("message at position {} is malformed: {}", position, e))
            })?;

            if let Some(record) = normalize_message(position, &raw)? {
                if !seen.insert(record.id.clone()) {
                    return Err(CoreError::Format(format!(
                        "duplicate message id {} at position {}",
                        record.id, position
                    )));
                }
                records.push(record);
            }
        }

        Ok(Transcript {
            name,
            records,
            total_messages: messages.len(),
        })
    }
}

/// Turn one raw message into a record, or `None` when it has no text.
pub fn normalize_message(position: usize, raw: &RawMessage) -> Result<Option<NormalizedRecord>> {
    let id = match raw.id.as_ref().map(id_to_string) {
        Some(Some(id)) => id,
        Some(None) => {
            return Err(CoreError::Format(format!(
                "message at position {} has an invalid id",
                position
            )))
        }
        None => {
            return Err(CoreError::Format(format!(
                "message at position {} has no id",
                position
            )))
        }
    };

    let text = RawText::from_value(&raw.text)
        .map_err(|e| CoreError::Format(format!("message {}: {}", id, e)))?
        .flatten();
    if text.is_empty() {
        return Ok(None);
    }

    let sender = raw
        .from
        .as_deref()
        .or(raw.actor.as_deref())
        .or(raw.sender.as_deref())
        .unwrap_or_default()
        .trim()
        .to_string();

    let mut record = NormalizedRecord::new(id, text)
        .with_sender(sender)
        .with_timestamp(normalize_timestamp(
            raw.date.as_deref(),
            raw.date_unixtime.as_ref(),
        ));

    if let Some(reply_to) = raw.reply_to_message_id.as_ref().and_then(id_to_string) {
        record = record.with_reply_to(reply_to);
    }

    Ok(Some(record))
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(|v| v.to_string())
            .or_else(|| n.as_u64().map(|v| v.to_string())),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Prefer the ISO `date`, then the unix timestamp. A `date` in neither
/// shape is kept verbatim rather than dropped.
fn normalize_timestamp(date: Option<&str>, unix: Option<&Value>) -> String {
    let date = date.map(str::trim).filter(|d| !d.is_empty());
    if let Some(date) = date {
        for format in LOCAL_DATE_FORMATS {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(date, format) {
                return parsed.format(NORMALIZED_DATE_FORMAT).to_string();
            }
        }
        if let Ok(parsed) = DateTime::parse_from_rfc3339(date) {
            return parsed.to_rfc3339();
        }
    }

    let seconds = match unix {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    seconds
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .or_else(|| date.map(str::to_string))
        .unwrap_or_default()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    fn parse(value: Value) -> Result<Transcript> {
        TranscriptParser::new().parse(&value)
    }

    #[test]
    fn test_flatten_structured_spans() {
        let text = RawText::from_value(&json!([{"text": "a"}, {"text": "b"}])).unwrap();
        assert_eq!(text.flatten(), "ab");
    }

    #[test]
    fn test_flatten_plain_string() {
        let text = RawText::from_value(&json!("hello")).unwrap();
        assert_eq!(text.flatten(), "hello");
    }

    #[test]
    fn test_flatten_mixed_fragments_ignores_styling() {
        let value = json!([
            "see ",
            {"type": "link", "text": "https://example.com"},
            {"type": "bold", "text": "  now  "},
            {"type": "custom_emoji", "document_id": "x"}
        ]);
        let text = RawText::from_value(&value).unwrap();
        assert_eq!(text.flatten(), "see https://example.com now");
    }

    #[test]
    fn test_flatten_collapses_whitespace() {
        let text = RawText::from_value(&json!("  line one\n\n  line\ttwo  ")).unwrap();
        assert_eq!(text.flatten(), "line one line two");
    }

    #[test]
    fn test_three_message_scenario() {
        let transcript = parse(json!([
            {"id": 1, "text": "hi"},
            {"id": 2, "text": ""},
            {"id": 3, "text": [{"text": "bye"}]}
        ]))
        .unwrap();

        let ids: Vec<&str> = transcript.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(transcript.records[1].text, "bye");
        assert_eq!(transcript.total_messages, 3);
        assert_eq!(transcript.skipped(), 1);
    }

    #[test]
    fn test_telegram_envelope() {
        let transcript = parse(json!({
            "name": "Family",
            "type": "private_group",
            "messages": [
                {
                    "id": 10,
                    "type": "message",
                    "date": "2023-01-02T10:00:00",
                    "date_unixtime": "1672653600",
                    "from": "Alice",
                    "text": "morning",
                    "reply_to_message_id": 9
                },
                {
                    "id": 11,
                    "type": "service",
                    "date": "2023-01-02T10:01:00",
                    "actor": "Bob",
                    "action": "pin_message",
                    "text": ""
                },
                {
                    "id": 12,
                    "type": "message",
                    "from": "Bob",
                    "photo": "photos/1.jpg",
                    "text": ""
                }
            ]
        }))
        .unwrap();

        assert_eq!(transcript.name.as_deref(), Some("Family"));
        assert_eq!(transcript.records.len(), 1);
        let record = &transcript.records[0];
        assert_eq!(record.sender, "Alice");
        assert_eq!(record.timestamp, "2023-01-02T10:00:00");
        assert_eq!(record.reply_to.as_deref(), Some("9"));
    }

    #[test]
    fn test_missing_timestamp_is_tolerated() {
        let transcript = parse(json!([{"id": 1, "text": "no date"}])).unwrap();
        assert_eq!(transcript.records[0].timestamp, "");
    }

    #[test]
    fn test_fractional_and_spaced_dates_are_kept() {
        let transcript = parse(json!([
            {"id": 1, "date": "2023-01-02T10:00:00.5", "text": "fraction"},
            {"id": 2, "date": "2023-01-02 10:00:01", "text": "space"},
            {"id": 3, "date": "yesterday-ish", "text": "odd"},
            {"id": 4, "date": "yesterday-ish", "date_unixtime": "0", "text": "odd with unix"}
        ]))
        .unwrap();

        let stamps: Vec<&str> = transcript.records.iter().map(|r| r.timestamp.as_str()).collect();
        assert_eq!(
            stamps,
            vec![
                "2023-01-02T10:00:00.500",
                "2023-01-02T10:00:01",
                "yesterday-ish",
                "1970-01-01T00:00:00Z"
            ]
        );
    }

    #[test]
    fn test_unixtime_fallback() {
        let transcript = parse(json!([{"id": 1, "date_unixtime": "0", "text": "epoch"}])).unwrap();
        assert_eq!(transcript.records[0].timestamp, "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_missing_id_fails_whole_parse() {
        let err = parse(json!([
            {"id": 1, "text": "fine"},
            {"text": "no id here"}
        ]))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("position 1"));
    }

    #[test]
    fn test_missing_id_fails_even_for_empty_text() {
        let err = parse(json!([{"text": ""}])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_top_level_must_be_list() {
        assert_eq!(parse(json!("messages")).unwrap_err().kind(), ErrorKind::Format);
        assert_eq!(parse(json!({"name": "x"})).unwrap_err().kind(), ErrorKind::Format);
        assert_eq!(parse(json!([1, 2])).unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn test_invalid_text_shape_names_message() {
        let err = parse(json!([{"id": 4, "text": 42}])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("message 4"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = parse(json!([
            {"id": 1, "text": "a"},
            {"id": 1, "text": "b"}
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate message id 1"));
    }

    #[test]
    fn test_order_preserved_and_deterministic() {
        let export = json!([
            {"id": 5, "text": "e"},
            {"id": 3, "text": "c"},
            {"id": 4, "text": ""},
            {"id": 1, "text": ["a", {"text": "!"}]}
        ]);
        let first = parse(export.clone()).unwrap();
        let second = parse(export).unwrap();

        let ids: Vec<&str> = first.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["5", "3", "1"]);
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn test_parse_str_rejects_invalid_json() {
        let err = TranscriptParser::new().parse_str("{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
