use rebirth_contracts::{Composition, GenerationOutcome, MediaAsset};
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::classify::classify;
use crate::client::GenerationClient;
use crate::compress::compress;
use crate::config::EngineConfig;
use crate::error::{PipelineError, Result};
use crate::transport::{RequestBuilder, Transport};

#[derive(Debug, Clone)]
pub struct Invocation {
    pub composition: Composition,
    /// Falls back to the composition's default prompt when absent or blank.
    pub prompt: Option<String>,
    pub images: Vec<MediaAsset>,
    pub transport: Transport,
}

impl Invocation {
    pub fn new(composition: Composition, images: Vec<MediaAsset>, transport: Transport) -> Self {
        Self {
            composition,
            prompt: None,
            images,
            transport,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn resolved_prompt(&self) -> String {
        self.prompt
            .as_deref()
            .map(str::trim)
            .filter(|prompt| !prompt.is_empty())
            .unwrap_or(self.composition.default_prompt())
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: EngineConfig,
    client: GenerationClient,
}

impl Pipeline {
    pub fn new(config: EngineConfig) -> Self {
        let client = GenerationClient::new(config.request_timeout);
        Self { config, client }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    pub fn generate(&self, invocation: Invocation) -> Result<GenerationOutcome> {
        let invocation_id = Uuid::new_v4();
        let span = info_span!(
            "generate",
            %invocation_id,
            composition = invocation.composition.route(),
            transport = invocation.transport.as_str()
        );
        let _entered = span.enter();

        let target = &self.config.compression;
        target.validate()?;
        let (endpoint, query) = self.resolve_endpoint(invocation.composition, invocation.transport)?;

        let fields = invocation.composition.image_fields();
        if invocation.images.len() != fields.len()
            || invocation.images.iter().any(|asset| asset.byte_len() == 0)
        {
            return Err(PipelineError::InputValidation(
                invocation.composition.missing_images_message(),
            ));
        }

        let prompt = invocation.resolved_prompt();
        let mut builder = RequestBuilder::new(prompt);
        for (field, asset) in fields.into_iter().zip(invocation.images) {
            let compressed = compress(asset, target)?;
            if target.exceeds_hard_stop(&compressed) {
                warn!(
                    field,
                    bytes = compressed.byte_len(),
                    hard_stop = target.hard_stop_bytes,
                    "image still over the hard stop after compression"
                );
                return Err(PipelineError::InputValidation(format!(
                    "{field} image is {} bytes after compression; the limit is {} bytes",
                    compressed.byte_len(),
                    target.hard_stop_bytes
                )));
            }
            builder = builder.named_image(field, compressed);
        }

        let request = builder.build(invocation.transport)?;
        let response = self.client.send(&endpoint, &query, &request)?;
        let outcome = classify(response.status, &response.body);
        info!(
            outcome = outcome.kind(),
            status = response.status,
            "generation finished"
        );
        Ok(outcome)
    }

    fn resolve_endpoint(
        &self,
        composition: Composition,
        transport: Transport,
    ) -> Result<(String, Vec<(&'static str, &str)>)> {
        match transport {
            Transport::JsonInline => {
                let api_key = self.config.require_api_key()?;
                let model = self.config.require_model()?;
                Ok((self.config.endpoint_for_model(model), vec![("key", api_key)]))
            }
            Transport::Multipart => {
                let relay_base = self.config.require_relay_base()?;
                Ok((format!("{relay_base}{}", composition.route()), Vec::new()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use mockito::{Matcher, Server};

    use super::*;
    use crate::compress::CompressionTarget;

    const IMAGE_RESPONSE: &str = r#"{"candidates":[{"content":{"parts":[{"text":"done"},{"inlineData":{"mimeType":"image/png","data":"QQ=="}}]}}]}"#;

    fn person() -> MediaAsset {
        MediaAsset::new(vec![1u8, 1, 1], "image/jpeg", "person.jpg")
    }

    fn bag() -> MediaAsset {
        MediaAsset::new(vec![2u8, 2, 2], "image/png", "bag.png")
    }

    fn config_for(server: &Server) -> EngineConfig {
        EngineConfig::default()
            .with_api_key("test-key")
            .with_model("test-model")
            .with_api_base(server.url())
            .with_relay_base(server.url())
    }

    #[test]
    fn json_transport_returns_inline_image() -> anyhow::Result<()> {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/models/test-model:generateContent")
            .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
            .match_body(Matcher::Regex("make the person hold the bag".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(IMAGE_RESPONSE)
            .create();

        let pipeline = Pipeline::new(config_for(&server));
        let outcome = pipeline.generate(Invocation::new(
            Composition::TryOn,
            vec![person(), bag()],
            Transport::JsonInline,
        ))?;

        mock.assert();
        assert_eq!(
            outcome,
            GenerationOutcome::Success {
                mime_type: "image/png".to_string(),
                base64_data: "QQ==".to_string(),
            }
        );
        Ok(())
    }

    #[test]
    fn multipart_transport_posts_to_composition_route() -> anyhow::Result<()> {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/api/generate-bag")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=".to_string()),
            )
            .match_body(Matcher::Regex(
                "(?s)name=\"prompt\".*denim please.*name=\"bag\".*name=\"fabric\"".to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"I can only describe it."}]}}]}"#)
            .create();

        let pipeline = Pipeline::new(config_for(&server));
        let invocation =
            Invocation::new(Composition::TextureWrap, vec![bag(), person()], Transport::Multipart)
                .with_prompt("denim please");
        let outcome = pipeline.generate(invocation)?;

        mock.assert();
        assert_eq!(
            outcome,
            GenerationOutcome::TextOnly {
                text: "I can only describe it.".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn remote_failures_come_back_as_outcomes() -> anyhow::Result<()> {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/models/test-model:generateContent")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"message":"model access denied"}}"#)
            .create();

        let pipeline = Pipeline::new(config_for(&server));
        let outcome = pipeline.generate(Invocation::new(
            Composition::TryOn,
            vec![person(), bag()],
            Transport::JsonInline,
        ))?;
        match outcome {
            GenerationOutcome::RemoteError {
                http_status,
                message,
                ..
            } => {
                assert_eq!(http_status, 403);
                assert_eq!(message, "model access denied");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn missing_credential_fails_before_any_request() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create();
        let mut config = config_for(&server);
        config.api_key = None;

        let err = Pipeline::new(config)
            .generate(Invocation::new(
                Composition::TryOn,
                vec![person(), bag()],
                Transport::JsonInline,
            ))
            .unwrap_err();

        mock.assert();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn missing_image_fails_before_any_request() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create();

        let pipeline = Pipeline::new(config_for(&server));
        let err = pipeline
            .generate(Invocation::new(
                Composition::TryOn,
                vec![person()],
                Transport::JsonInline,
            ))
            .unwrap_err();
        let empty = pipeline
            .generate(Invocation::new(
                Composition::TextureWrap,
                vec![bag(), MediaAsset::new(Vec::new(), "image/png", "fabric.png")],
                Transport::Multipart,
            ))
            .unwrap_err();

        mock.assert();
        assert_eq!(err.to_string(), "invalid input: Missing person or bag image");
        assert_eq!(empty.kind(), "input_validation");
    }

    #[test]
    fn image_over_hard_stop_blocks_submission() -> anyhow::Result<()> {
        let mut server = Server::new();
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create();

        let mut state: u32 = 7;
        let noise = RgbImage::from_fn(120, 90, |_, _| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let bytes = state.to_le_bytes();
            Rgb([bytes[1], bytes[2], bytes[3]])
        });
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(noise).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let mut config = config_for(&server);
        config.compression = CompressionTarget {
            target_bytes: 64,
            hard_stop_bytes: 128,
            max_dimension: 100,
            min_dimension: 80,
            ..CompressionTarget::default()
        };
        let err = Pipeline::new(config)
            .generate(Invocation::new(
                Composition::TryOn,
                vec![MediaAsset::new(png, "image/png", "person.png"), bag()],
                Transport::JsonInline,
            ))
            .unwrap_err();

        mock.assert();
        assert_eq!(err.kind(), "input_validation");
        assert!(err.to_string().contains("person image"));
        Ok(())
    }

    #[test]
    fn undecodable_oversized_image_aborts_with_decode_error() {
        let server = Server::new();
        let mut config = config_for(&server);
        config.compression = CompressionTarget {
            target_bytes: 8,
            hard_stop_bytes: 16,
            ..CompressionTarget::default()
        };
        let err = Pipeline::new(config)
            .generate(Invocation::new(
                Composition::TryOn,
                vec![
                    MediaAsset::new(b"corrupt image bytes".to_vec(), "image/jpeg", "p.jpg"),
                    bag(),
                ],
                Transport::JsonInline,
            ))
            .unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[test]
    fn blank_prompt_uses_composition_default() {
        let invocation =
            Invocation::new(Composition::TextureWrap, Vec::new(), Transport::JsonInline)
                .with_prompt("   ");
        assert_eq!(
            invocation.resolved_prompt(),
            "wrap the bag of image 1 in the texture of image 2"
        );
    }
}
