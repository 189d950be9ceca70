use serde::{Deserialize, Serialize};

use crate::media::DEFAULT_IMAGE_MIME;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Success {
        mime_type: String,
        base64_data: String,
    },
    TextOnly { text: String },
    RemoteError {
        http_status: u16,
        message: String,
        raw_body: String,
    },
    MalformedResponse { http_status: u16, raw_body: String },
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationOutcome::Success { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenerationOutcome::Success { .. } => "success",
            GenerationOutcome::TextOnly { .. } => "text_only",
            GenerationOutcome::RemoteError { .. } => "remote_error",
            GenerationOutcome::MalformedResponse { .. } => "malformed_response",
        }
    }

    pub fn data_url(&self) -> Option<String> {
        match self {
            GenerationOutcome::Success {
                mime_type,
                base64_data,
            } => {
                let mime = if mime_type.trim().is_empty() {
                    DEFAULT_IMAGE_MIME
                } else {
                    mime_type.as_str()
                };
                Some(format!("data:{mime};base64,{base64_data}"))
            }
            _ => None,
        }
    }

    pub fn to_boundary(&self) -> BoundaryResult {
        match self {
            GenerationOutcome::Success { .. } => BoundaryResult {
                ok: true,
                image: self.data_url(),
                ..BoundaryResult::default()
            },
            GenerationOutcome::TextOnly { text } => BoundaryResult {
                ok: false,
                text: Some(text.clone()),
                ..BoundaryResult::default()
            },
            GenerationOutcome::RemoteError {
                http_status,
                message,
                raw_body,
            } => BoundaryResult {
                ok: false,
                error: Some(message.clone()),
                status: Some(*http_status),
                raw: Some(raw_body.clone()),
                ..BoundaryResult::default()
            },
            GenerationOutcome::MalformedResponse {
                http_status,
                raw_body,
            } => BoundaryResult {
                ok: false,
                error: Some(malformed_message(*http_status, raw_body)),
                status: Some(*http_status),
                raw: Some(raw_body.clone()),
                ..BoundaryResult::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub model: String,
    #[serde(flatten)]
    pub result: BoundaryResult,
}

impl CheckReport {
    pub fn from_outcome(model: impl Into<String>, outcome: &GenerationOutcome) -> Self {
        let result = match outcome {
            GenerationOutcome::TextOnly { text } => BoundaryResult {
                ok: true,
                text: Some(text.clone()),
                ..BoundaryResult::default()
            },
            other => other.to_boundary(),
        };
        Self {
            model: model.into(),
            result,
        }
    }

    pub fn http_status(&self) -> u16 {
        match (self.result.ok, self.result.status) {
            (false, Some(status)) => status,
            _ => 200,
        }
    }
}

fn malformed_message(http_status: u16, raw_body: &str) -> String {
    let is_html = raw_body
        .trim_start()
        .get(..5)
        .is_some_and(|head| head.eq_ignore_ascii_case("<!doc") || head.eq_ignore_ascii_case("<html"));
    if is_html {
        format!(
            "Endpoint returned HTML instead of JSON; the route is likely missing or the wrong server answered (status {http_status})."
        )
    } else {
        format!("Malformed response from generation endpoint (status {http_status}).")
    }
}

pub fn remediation_hint(status: u16) -> Option<&'static str> {
    match status {
        400 => Some("The provider rejected the request; check the prompt and image formats."),
        401 => Some("The API credential was rejected; check GEMINI_API_KEY."),
        403 => Some(
            "The credential lacks access to this model; enable image generation for the key or choose another model.",
        ),
        404 => Some(
            "The route or model was not found; check the relay URL or the model identifier.",
        ),
        413 => Some("The upload is too large; pick a smaller image or lower the byte budget."),
        429 => Some("Quota or rate limit reached; wait before trying again."),
        500..=599 => Some("The provider failed to handle the request; try again later."),
        _ => None,
    }
}
