use std::time::Duration;

use rebirth_contracts::media::guess_image_mime;
use rebirth_contracts::MediaAsset;
use percent_encoding::percent_decode_str;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::transport::OutgoingRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct GenerationClient {
    http: HttpClient,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn send(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        request: &OutgoingRequest,
    ) -> Result<RawResponse> {
        debug!(
            endpoint,
            transport = request.transport().as_str(),
            bytes = request.body().len(),
            "dispatching generation request"
        );
        let response = self
            .http
            .post(endpoint)
            .query(query)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, request.content_type())
            .body(request.body().to_vec())
            .send()
            .map_err(|source| transport_error(endpoint, source))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .map_err(|source| transport_error(endpoint, source))?;
        debug!(endpoint, status, bytes = body.len(), "generation response received");
        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }

    pub fn fetch_asset(&self, url: &str) -> Result<MediaAsset> {
        let parsed = Url::parse(url.trim()).map_err(|err| {
            PipelineError::InputValidation(format!("invalid image URL '{url}': {err}"))
        })?;
        let endpoint = parsed.to_string();
        let response = self
            .http
            .get(parsed.clone())
            .timeout(self.timeout)
            .send()
            .map_err(|source| transport_error(&endpoint, source))?;
        let status = response.status();
        if !status.is_success() {
            warn!(%endpoint, status = status.as_u16(), "catalog image fetch failed");
            return Err(PipelineError::InputValidation(format!(
                "Failed to load image {url} ({})",
                status.as_u16()
            )));
        }

        let source_name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
            .filter(|value| value.starts_with("image/"))
            .unwrap_or_else(|| guess_image_mime(&source_name).to_string());
        let bytes = response
            .bytes()
            .map_err(|source| transport_error(&endpoint, source))?;
        Ok(MediaAsset::new(bytes.to_vec(), mime, source_name))
    }
}

fn transport_error(endpoint: &str, source: reqwest::Error) -> PipelineError {
    let endpoint = strip_query(endpoint);
    warn!(%endpoint, error = %source, "transport failure");
    PipelineError::Transport {
        endpoint,
        source: source.without_url(),
    }
}

/// Query strings may carry the API key.
fn strip_query(endpoint: &str) -> String {
    endpoint.split('?').next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;
    use crate::transport::{build, Transport};

    fn png_asset() -> MediaAsset {
        MediaAsset::new(vec![1u8, 2, 3], "image/png", "bag.png")
    }

    #[test]
    fn send_posts_body_with_content_type_and_query() -> anyhow::Result<()> {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/models/m:generateContent")
            .match_query(Matcher::UrlEncoded("key".into(), "secret".into()))
            .match_header("content-type", "application/json")
            .match_body(Matcher::Regex(r#""role":"user""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{\"ok\":1}")
            .create();

        let client = GenerationClient::new(Duration::from_secs(5));
        let request = build("p", &[png_asset()], Transport::JsonInline)?;
        let endpoint = format!("{}/models/m:generateContent", server.url());
        let response = client.send(&endpoint, &[("key", "secret")], &request)?;

        mock.assert();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(response.body, "{\"ok\":1}");
        Ok(())
    }

    #[test]
    fn non_success_status_is_returned_not_raised() -> anyhow::Result<()> {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/relay")
            .with_status(413)
            .with_body("Request Entity Too Large")
            .create();

        let client = GenerationClient::new(Duration::from_secs(5));
        let request = build("p", &[png_asset()], Transport::Multipart)?;
        let response = client.send(&format!("{}/relay", server.url()), &[], &request)?;
        assert_eq!(response.status, 413);
        assert_eq!(response.body, "Request Entity Too Large");
        Ok(())
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_error() -> anyhow::Result<()> {
        let client = GenerationClient::new(Duration::from_secs(2));
        let request = build("p", &[png_asset()], Transport::JsonInline)?;
        let err = client
            .send("http://127.0.0.1:9/generate?key=secret", &[], &request)
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert!(!err.to_string().contains("secret"));
        Ok(())
    }

    #[test]
    fn fetch_asset_encodes_spaces_and_reads_mime() -> anyhow::Result<()> {
        let mut server = Server::new();
        let mock = server
            .mock(
                "GET",
                Matcher::Regex(r"^/assets/Black(%20| )Large(%20| )Bambino\.png$".to_string()),
            )
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body([9u8, 8, 7])
            .create();

        let client = GenerationClient::new(Duration::from_secs(5));
        let asset =
            client.fetch_asset(&format!("{}/assets/Black Large Bambino.png", server.url()))?;

        mock.assert();
        assert_eq!(asset.bytes(), &[9u8, 8, 7]);
        assert_eq!(asset.mime_type(), "image/png");
        assert_eq!(asset.source_name(), "Black Large Bambino.png");
        Ok(())
    }

    #[test]
    fn fetch_asset_reports_missing_catalog_images() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/assets/missing.png")
            .with_status(404)
            .create();

        let client = GenerationClient::new(Duration::from_secs(5));
        let err = client
            .fetch_asset(&format!("{}/assets/missing.png", server.url()))
            .unwrap_err();
        assert_eq!(err.kind(), "input_validation");
        assert!(err.to_string().contains("404"));
    }
}
