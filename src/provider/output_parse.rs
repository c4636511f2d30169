use serde_json::Value;

/// Assistant text and error messages recovered from a JSON-lines event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEvents {
    pub messages: Vec<String>,
    pub errors: Vec<String>,
    pub skipped_lines: usize,
}

impl ParsedEvents {
    /// All assistant messages in emission order. A short acknowledgement is
    /// often emitted before the substantive answer, so no single event wins.
    pub fn response_text(&self) -> Option<String> {
        let joined = self.messages.join("\n").trim().to_string();
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn extract_text(item: &Value) -> Option<String> {
    if let Some(text) = item.get("text").and_then(Value::as_str) {
        if let Some(text) = non_empty(text) {
            return Some(text);
        }
    }

    if let Some(message) = item.get("message").and_then(Value::as_str) {
        if let Some(message) = non_empty(message) {
            return Some(message);
        }
    }

    if let Some(content) = item.get("content") {
        if let Some(content_string) = content.as_str() {
            return non_empty(content_string);
        }

        if let Some(arr) = content.as_array() {
            let lines: Vec<String> = arr
                .iter()
                .filter_map(|entry| entry.get("text").and_then(Value::as_str))
                .filter_map(non_empty)
                .collect();
            if !lines.is_empty() {
                return Some(lines.join("\n"));
            }
        }
    }

    None
}

fn extract_error(value: &Value) -> Option<String> {
    if let Some(message) = value.get("message").and_then(Value::as_str) {
        return non_empty(message);
    }
    let error = value.get("error")?;
    if let Some(message) = error.as_str() {
        return non_empty(message);
    }
    error
        .get("message")
        .and_then(Value::as_str)
        .and_then(non_empty)
        .or_else(|| non_empty(&error.to_string()))
}

enum Event {
    Message { text: String, delta: bool },
    Error(String),
    Other,
}

fn classify_event(value: &Value) -> Event {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "item.completed" => {
            let Some(item) = value.get("item") else {
                return Event::Other;
            };
            match item.get("type").and_then(Value::as_str) {
                Some("agent_message") | Some("assistant_message") => extract_text(item)
                    .map(|text| Event::Message { text, delta: false })
                    .unwrap_or(Event::Other),
                Some("error") => extract_error(item).map(Event::Error).unwrap_or(Event::Other),
                _ => Event::Other,
            }
        }
        "agent_message" => extract_text(value)
            .map(|text| Event::Message { text, delta: false })
            .unwrap_or(Event::Other),
        "message" => {
            if value.get("role").and_then(Value::as_str) != Some("assistant") {
                return Event::Other;
            }
            let delta = value.get("delta").and_then(Value::as_bool).unwrap_or(false);
            let text = match value.get("content").and_then(Value::as_str) {
                Some(raw) if delta => Some(raw.to_string()).filter(|raw| !raw.is_empty()),
                _ => extract_text(value),
            };
            text.map(|text| Event::Message { text, delta })
                .unwrap_or(Event::Other)
        }
        "error" | "turn.failed" => extract_error(value)
            .map(Event::Error)
            .unwrap_or_else(|| Event::Error(value.to_string())),
        "result" => {
            let status = value.get("status").and_then(Value::as_str);
            if matches!(status, Some("error") | Some("failed")) {
                extract_error(value)
                    .map(Event::Error)
                    .unwrap_or_else(|| Event::Error(value.to_string()))
            } else {
                Event::Other
            }
        }
        _ => Event::Other,
    }
}

/// Lines that are not JSON objects (progress chatter, banners) are skipped.
pub fn parse_event_stream(stdout: &str) -> ParsedEvents {
    let mut parsed = ParsedEvents::default();
    let mut last_was_delta = false;

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            parsed.skipped_lines += 1;
            continue;
        };
        if !value.is_object() {
            parsed.skipped_lines += 1;
            continue;
        }

        match classify_event(&value) {
            Event::Message { text, delta } => {
                match parsed.messages.last_mut() {
                    Some(previous) if delta && last_was_delta => previous.push_str(&text),
                    _ => parsed.messages.push(text),
                }
                last_was_delta = delta;
            }
            Event::Error(message) => {
                parsed.errors.push(message);
                last_was_delta = false;
            }
            Event::Other => {}
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_all_agent_messages_in_order() {
        let data = r#"
{"type":"thread.started","thread_id":"t1"}
{"type":"item.completed","item":{"type":"agent_message","text":"On it."}}
{"type":"item.completed","item":{"type":"agent_message","content":[{"text":"Full answer"}]}}
"#;
        let parsed = parse_event_stream(data);
        assert_eq!(parsed.response_text().as_deref(), Some("On it.\nFull answer"));
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn skips_non_json_progress_lines() {
        let data = "Loading model...\n[2/3] warming up\n{\"type\":\"agent_message\",\"message\":\"hello\"}\n";
        let parsed = parse_event_stream(data);
        assert_eq!(parsed.response_text().as_deref(), Some("hello"));
        assert_eq!(parsed.skipped_lines, 2);
    }

    #[test]
    fn joins_assistant_delta_chunks_without_separator() {
        let data = r#"
{"type":"init","model":"gemini-2.5-pro"}
{"type":"message","role":"user","content":"question"}
{"type":"message","role":"assistant","content":"Hel","delta":true}
{"type":"message","role":"assistant","content":"lo","delta":true}
{"type":"result","status":"success"}
"#;
        let parsed = parse_event_stream(data);
        assert_eq!(parsed.response_text().as_deref(), Some("Hello"));
    }

    #[test]
    fn collects_error_events() {
        let data = r#"
{"type":"error","message":"model_not_found: m1"}
{"type":"turn.failed","error":{"message":"429 Too Many Requests"}}
{"type":"result","status":"error","error":{"message":"quota exceeded"}}
"#;
        let parsed = parse_event_stream(data);
        assert_eq!(
            parsed.errors,
            vec![
                "model_not_found: m1".to_string(),
                "429 Too Many Requests".to_string(),
                "quota exceeded".to_string()
            ]
        );
        assert!(parsed.response_text().is_none());
    }
}
