use rebirth_contracts::CheckReport;
use tracing::info;

use crate::classify::classify;
use crate::client::GenerationClient;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::transport::text_request;

pub const CHECK_ROUTE: &str = "/api/test-gemini";
pub const CHECK_PROMPT: &str = "Say OK in one word. Then list the model you are using.";

pub fn is_check_route(path: &str) -> bool {
    path.split('?').next().unwrap_or_default().trim_end_matches('/') == CHECK_ROUTE
}

pub fn check_credentials(config: &EngineConfig, client: &GenerationClient) -> Result<CheckReport> {
    let api_key = config.require_api_key()?;
    let model = config.require_text_model()?;
    let endpoint = config.endpoint_for_model(model);

    let response = client.send(&endpoint, &[("key", api_key)], &text_request(CHECK_PROMPT))?;
    let outcome = classify(response.status, &response.body);
    info!(model, status = response.status, outcome = outcome.kind(), "credential check finished");
    Ok(CheckReport::from_outcome(model, &outcome))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server};

    use super::*;

    fn config_for(server: &Server) -> EngineConfig {
        EngineConfig::default()
            .with_api_key("check-key")
            .with_text_model("text-model")
            .with_api_base(server.url())
    }

    #[test]
    fn text_answer_passes_the_check() -> anyhow::Result<()> {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/models/text-model:generateContent")
            .match_query(Matcher::UrlEncoded("key".into(), "check-key".into()))
            .match_body(Matcher::Regex("Say OK in one word".to_string()))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"OK"},{"text":"gemini"}]}}]}"#)
            .create();

        let client = GenerationClient::new(Duration::from_secs(5));
        let report = check_credentials(&config_for(&server), &client)?;

        mock.assert();
        assert!(report.result.ok);
        assert_eq!(report.model, "text-model");
        assert_eq!(report.result.text.as_deref(), Some("OK\ngemini"));
        Ok(())
    }

    #[test]
    fn rejected_key_keeps_the_remote_status() -> anyhow::Result<()> {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/models/text-model:generateContent")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"message":"API key not valid"}}"#)
            .create();

        let client = GenerationClient::new(Duration::from_secs(5));
        let report = check_credentials(&config_for(&server), &client)?;

        assert!(!report.result.ok);
        assert_eq!(report.http_status(), 400);
        assert_eq!(report.result.error.as_deref(), Some("API key not valid"));
        Ok(())
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let client = GenerationClient::new(Duration::from_secs(5));
        let err = check_credentials(&EngineConfig::default(), &client).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn route_match_ignores_query_and_trailing_slash() {
        assert!(is_check_route("/api/test-gemini"));
        assert!(is_check_route("/api/test-gemini/?x=1"));
        assert!(!is_check_route("/api/try-on"));
    }
}
