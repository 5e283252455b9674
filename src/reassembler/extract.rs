use serde_json::Value;

/// Pulls a text fragment out of one shape of inbound event.
pub(crate) type Extractor = fn(&Value) -> Option<&str>;

/// Shapes tried in order; the first non-empty match wins.
pub(crate) const EXTRACTORS: &[(&str, Extractor)] = &[
    ("transcript", top_level_transcript),
    ("delta", top_level_delta),
    ("text", top_level_text),
    ("part.transcript", part_transcript),
    ("response.output[0].text", response_output_text),
    ("item.content", item_content),
];

const TERMINAL_TYPES: &[&str] = &["response.end", "conversation.item.create.complete"];
const FINAL_TRANSCRIPT_PART: &str = "final_transcript";
const USER_ROLE: &str = "user";

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn top_level_transcript(event: &Value) -> Option<&str> {
    non_empty(event.get("transcript"))
}

fn top_level_delta(event: &Value) -> Option<&str> {
    non_empty(event.get("delta"))
}

fn top_level_text(event: &Value) -> Option<&str> {
    non_empty(event.get("text"))
}

fn part_transcript(event: &Value) -> Option<&str> {
    non_empty(event.pointer("/part/transcript"))
}

fn response_output_text(event: &Value) -> Option<&str> {
    non_empty(event.pointer("/response/output/0/text"))
}

fn text_or_transcript(value: &Value) -> Option<&str> {
    non_empty(value.get("text")).or_else(|| non_empty(value.get("transcript")))
}

fn item_content(event: &Value) -> Option<&str> {
    match event.pointer("/item/content")? {
        Value::Array(parts) => parts.iter().find_map(text_or_transcript),
        content @ Value::Object(_) => text_or_transcript(content),
        _ => None,
    }
}

/// The first fragment any extractor finds, with the name of the shape that matched.
pub(crate) fn extract_text(event: &Value) -> Option<(&'static str, &str)> {
    EXTRACTORS
        .iter()
        .find_map(|(shape, extractor)| extractor(event).map(|text| (*shape, text)))
}

pub(crate) fn event_type(event: &Value) -> &str {
    event.get("type").and_then(Value::as_str).unwrap_or_default()
}

/// User-originated events are echoes of what was said, not assistant output.
pub(crate) fn is_user_echo(event: &Value) -> bool {
    event_type(event).contains(USER_ROLE)
        || event.get("role").and_then(Value::as_str) == Some(USER_ROLE)
        || event.pointer("/item/role").and_then(Value::as_str) == Some(USER_ROLE)
}

pub(crate) fn is_terminal(event: &Value) -> bool {
    TERMINAL_TYPES.contains(&event_type(event))
        || event.pointer("/part/type").and_then(Value::as_str) == Some(FINAL_TRANSCRIPT_PART)
}
