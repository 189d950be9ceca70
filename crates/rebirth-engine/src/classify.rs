use rebirth_contracts::media::DEFAULT_IMAGE_MIME;
use rebirth_contracts::GenerationOutcome;
use serde_json::Value;
use tracing::{debug, warn};

pub const RAW_PREVIEW_CHARS: usize = 1600;

pub(crate) type Accessor = for<'a> fn(&'a Value) -> Option<&'a Value>;

fn snake_inline_data(part: &Value) -> Option<&Value> {
    part.get("inline_data")
}

fn camel_inline_data(part: &Value) -> Option<&Value> {
    part.get("inlineData")
}

fn snake_mime_type(inline: &Value) -> Option<&Value> {
    inline.get("mime_type")
}

fn camel_mime_type(inline: &Value) -> Option<&Value> {
    inline.get("mimeType")
}

fn nested_error_message(body: &Value) -> Option<&Value> {
    body.get("error").and_then(|error| error.get("message"))
}

fn flat_error_message(body: &Value) -> Option<&Value> {
    body.get("error")
}

fn top_level_message(body: &Value) -> Option<&Value> {
    body.get("message")
}

/// Deployments disagree on key casing for the same slot.
pub(crate) const INLINE_DATA_ACCESSORS: &[Accessor] = &[snake_inline_data, camel_inline_data];
pub(crate) const MIME_TYPE_ACCESSORS: &[Accessor] = &[snake_mime_type, camel_mime_type];
const ERROR_MESSAGE_ACCESSORS: &[Accessor] =
    &[nested_error_message, flat_error_message, top_level_message];

pub(crate) fn lookup<'a>(value: &'a Value, accessors: &[Accessor]) -> Option<&'a Value> {
    accessors.iter().find_map(|accessor| accessor(value))
}

fn lookup_str<'a>(value: &'a Value, accessors: &[Accessor]) -> Option<&'a str> {
    accessors
        .iter()
        .filter_map(|accessor| accessor(value))
        .find_map(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

pub(crate) fn inline_image_of(part: &Value) -> Option<(Option<&str>, &str)> {
    INLINE_DATA_ACCESSORS
        .iter()
        .filter_map(|accessor| accessor(part))
        .find_map(|inline| {
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .filter(|data| !data.is_empty())?;
            let mime = lookup_str(inline, MIME_TYPE_ACCESSORS);
            Some((mime, data))
        })
}

fn candidate_parts(body: &Value) -> impl Iterator<Item = &Value> {
    body.get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| candidate.get("content"))
        .filter_map(|content| content.get("parts"))
        .filter_map(Value::as_array)
        .flatten()
}

/// Maps a provider HTTP response onto exactly one outcome.
pub fn classify(http_status: u16, raw_body: &str) -> GenerationOutcome {
    let body: Value = match serde_json::from_str(raw_body) {
        Ok(value) => value,
        Err(err) => {
            warn!(http_status, error = %err, "response body is not JSON");
            return GenerationOutcome::MalformedResponse {
                http_status,
                raw_body: truncate_text(raw_body, RAW_PREVIEW_CHARS),
            };
        }
    };

    if !(200..300).contains(&http_status) {
        let message = lookup_str(&body, ERROR_MESSAGE_ACCESSORS)
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed ({http_status})"));
        warn!(http_status, %message, "generation endpoint returned an error");
        return GenerationOutcome::RemoteError {
            http_status,
            message,
            raw_body: truncate_text(raw_body, RAW_PREVIEW_CHARS),
        };
    }

    if let Some((mime, data)) = candidate_parts(&body).find_map(inline_image_of) {
        let mime_type = mime.unwrap_or(DEFAULT_IMAGE_MIME).to_string();
        debug!(%mime_type, chars = data.len(), "inline image found");
        return GenerationOutcome::Success {
            mime_type,
            base64_data: data.to_string(),
        };
    }

    let text = candidate_parts(&body)
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .filter(|text| !text.is_empty())
        .collect::<Vec<&str>>()
        .join("\n");
    let text = text.trim();
    if !text.is_empty() {
        debug!(chars = text.len(), "model answered with text only");
        return GenerationOutcome::TextOnly {
            text: text.to_string(),
        };
    }

    warn!(http_status, "success response carried neither image nor text");
    GenerationOutcome::MalformedResponse {
        http_status,
        raw_body: truncate_text(raw_body, RAW_PREVIEW_CHARS),
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
