use rebirth_contracts::{Composition, MediaAsset};
use serde_json::json;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::check::{check_credentials, is_check_route};
use crate::client::GenerationClient;
use crate::config::EngineConfig;
use crate::error::{PipelineError, Result};
use crate::transport::{decode_multipart, RequestBuilder, Transport, JSON_CONTENT_TYPE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl RelayResponse {
    /// Relay-side failures use the provider's error envelope so callers can
    /// classify every response the same way.
    pub fn json_error(status: u16, message: impl AsRef<str>) -> Self {
        let body = json!({ "error": { "message": message.as_ref() } });
        Self {
            status,
            content_type: JSON_CONTENT_TYPE.to_string(),
            body: body.to_string().into_bytes(),
        }
    }

    fn from_error(err: &PipelineError) -> Self {
        let status = match err {
            PipelineError::Configuration(_) => 500,
            PipelineError::InputValidation(_)
            | PipelineError::Decode { .. }
            | PipelineError::Encode { .. } => 400,
            PipelineError::Transport { .. } => 502,
        };
        let message = match err {
            PipelineError::Configuration(message) | PipelineError::InputValidation(message) => {
                message.clone()
            }
            other => other.to_string(),
        };
        Self::json_error(status, message)
    }
}

#[derive(Debug, Clone)]
pub struct RelayHandler {
    config: EngineConfig,
    client: GenerationClient,
}

impl RelayHandler {
    pub fn new(config: EngineConfig) -> Self {
        let client = GenerationClient::new(config.request_timeout);
        Self { config, client }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn body_limit(&self) -> usize {
        self.config.compression.hard_stop_bytes
    }

    pub fn handle(
        &self,
        method: &str,
        path: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> RelayResponse {
        if is_check_route(path) {
            if !(method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("POST")) {
                return RelayResponse::json_error(405, "Use GET or POST");
            }
            return self.check();
        }
        let Some(composition) = Composition::from_route(path) else {
            return RelayResponse::json_error(404, format!("route not found: {path}"));
        };
        if !method.eq_ignore_ascii_case("POST") {
            return RelayResponse::json_error(405, "Use POST");
        }
        if body.len() > self.body_limit() {
            warn!(bytes = body.len(), limit = self.body_limit(), "relay body too large");
            return RelayResponse::json_error(
                413,
                format!("Request body exceeds {} bytes", self.body_limit()),
            );
        }

        let request_id = Uuid::new_v4();
        let span = info_span!("relay", %request_id, route = composition.route());
        let _entered = span.enter();

        match self.forward(composition, content_type.unwrap_or_default(), body) {
            Ok(response) => {
                info!(status = response.status, "relayed provider response");
                response
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "relay request rejected");
                RelayResponse::from_error(&err)
            }
        }
    }

    fn check(&self) -> RelayResponse {
        let report = match check_credentials(&self.config, &self.client) {
            Ok(report) => report,
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "credential check failed");
                return RelayResponse::from_error(&err);
            }
        };
        match serde_json::to_vec(&report) {
            Ok(body) => RelayResponse {
                status: report.http_status(),
                content_type: JSON_CONTENT_TYPE.to_string(),
                body,
            },
            Err(err) => RelayResponse::json_error(500, format!("failed to render check: {err}")),
        }
    }

    fn forward(
        &self,
        composition: Composition,
        content_type: &str,
        body: &[u8],
    ) -> Result<RelayResponse> {
        let api_key = self.config.require_api_key()?;
        let model = self.config.require_model()?;

        let mut upload = decode_multipart(content_type, body)?;
        let fields = composition.image_fields();
        let mut images: Vec<(&str, MediaAsset)> = Vec::with_capacity(fields.len());
        for field in fields {
            let position = upload
                .files
                .iter()
                .position(|(name, asset)| name == field && asset.byte_len() > 0)
                .ok_or_else(|| {
                    PipelineError::InputValidation(composition.missing_images_message())
                })?;
            let (_, asset) = upload.files.swap_remove(position);
            images.push((field, asset));
        }

        let prompt = upload
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
            .unwrap_or(composition.default_prompt());
        let request = images
            .into_iter()
            .fold(RequestBuilder::new(prompt), |builder, (field, asset)| {
                builder.named_image(field, asset)
            })
            .build(Transport::JsonInline)?;

        let endpoint = self.config.endpoint_for_model(model);
        let upstream = self.client.send(&endpoint, &[("key", api_key)], &request)?;
        Ok(RelayResponse {
            status: upstream.status,
            content_type: upstream
                .content_type
                .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string()),
            body: upstream.body.into_bytes(),
        })
    }
}
