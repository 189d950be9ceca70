use thiserror::Error;

/// Failures that abort an invocation. Remote failures and unusable
/// responses are not errors; they come back as a `GenerationOutcome`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    InputValidation(String),

    #[error("failed to decode image '{source_name}': {source}")]
    Decode {
        source_name: String,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to re-encode image '{source_name}': {source}")]
    Encode {
        source_name: String,
        #[source]
        source: image::ImageError,
    },

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::InputValidation(_) => "input_validation",
            PipelineError::Decode { .. } => "decode",
            PipelineError::Encode { .. } => "encode",
            PipelineError::Transport { .. } => "transport",
        }
    }

    pub fn help_text(&self) -> Option<&'static str> {
        match self {
            PipelineError::Configuration(_) => {
                Some("Set GEMINI_API_KEY (or GOOGLE_API_KEY) and a non-empty GEMINI_IMAGE_MODEL.")
            }
            PipelineError::InputValidation(_) => {
                Some("Provide every required image, or pick a smaller one.")
            }
            PipelineError::Decode { .. } => {
                Some("The file is not a readable image; try a PNG or JPEG export.")
            }
            PipelineError::Transport { source, .. } if source.is_timeout() => {
                Some("The generation service did not answer in time; try again.")
            }
            PipelineError::Transport { .. } => {
                Some("Check your network connection and the endpoint URL, then try again.")
            }
            PipelineError::Encode { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
