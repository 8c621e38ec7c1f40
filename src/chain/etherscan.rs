//! Minimal Etherscan-compatible API client.
//!
//! Both the ABI lookup and the gas tracker use the same `?module=…&action=…&apikey=…`
//! GET convention and the same `{status, message, result}` envelope. The V2 API
//! serves every chain from one endpoint, so each query names its `chainid`.

use serde::Deserialize;
use std::time::Duration;

use crate::config::ExplorerConfig;

/// Envelope returned by every explorer endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    /// A string for `getabi` and errors, an object for `gasoracle`.
    pub result: serde_json::Value,
}

impl ExplorerResponse {
    /// Returns `result` when `status == "1"`, otherwise a readable reason.
    pub fn into_result(self) -> Result<serde_json::Value, String> {
        if self.status == "1" {
            return Ok(self.result);
        }
        let detail = match &self.result {
            serde_json::Value::String(s) if !s.is_empty() => s.clone(),
            _ => "no details".to_string(),
        };
        Err(format!("{} ({detail})", self.message))
    }
}

#[derive(Clone)]
pub struct EtherscanClient {
    http: reqwest::Client,
    api_url: String,
    chain_id: String,
    api_key: String,
}

impl EtherscanClient {
    pub fn new(
        config: &ExplorerConfig,
        chain_id: u64,
        api_key: String,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            chain_id: chain_id.to_string(),
            api_key,
        })
    }

    /// Run one GET query and unwrap the envelope.
    ///
    /// Request URLs carry the API key, so they are stripped from transport errors.
    pub async fn query(&self, params: &[(&str, &str)]) -> Result<serde_json::Value, String> {
        let response = self
            .request(params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.without_url().to_string())?;

        let body: ExplorerResponse = response
            .json()
            .await
            .map_err(|e| format!("invalid explorer response: {}", e.without_url()))?;

        body.into_result()
    }

    fn request(&self, params: &[(&str, &str)]) -> reqwest::RequestBuilder {
        self.http
            .get(&self.api_url)
            .query(&[("chainid", self.chain_id.as_str())])
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
    }
}

impl std::fmt::Debug for EtherscanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtherscanClient")
            .field("api_url", &self.api_url)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope_returns_result() {
        let body: ExplorerResponse =
            serde_json::from_str(r#"{"status":"1","message":"OK","result":"[]"}"#).unwrap();
        assert_eq!(body.into_result().unwrap(), serde_json::json!("[]"));
    }

    #[test]
    fn test_error_envelope_includes_message_and_detail() {
        let body: ExplorerResponse = serde_json::from_str(
            r#"{"status":"0","message":"NOTOK","result":"Contract source code not verified"}"#,
        )
        .unwrap();
        assert_eq!(
            body.into_result().unwrap_err(),
            "NOTOK (Contract source code not verified)"
        );
    }

    #[test]
    fn test_query_names_chain_and_key() {
        let client = EtherscanClient::new(
            &ExplorerConfig::default(),
            11155111,
            "KEY123".to_string(),
        )
        .unwrap();
        let request = client
            .request(&[("module", "contract"), ("action", "getabi")])
            .build()
            .unwrap();

        let url = request.url();
        assert_eq!(url.path(), "/v2/api");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("chainid".to_string(), "11155111".to_string()),
                ("module".to_string(), "contract".to_string()),
                ("action".to_string(), "getabi".to_string()),
                ("apikey".to_string(), "KEY123".to_string()),
            ]
        );
        assert!(!format!("{client:?}").contains("KEY123"));
    }

    #[test]
    fn test_error_envelope_without_detail() {
        let body: ExplorerResponse =
            serde_json::from_str(r#"{"status":"0","message":"NOTOK","result":null}"#).unwrap();
        assert_eq!(body.into_result().unwrap_err(), "NOTOK (no details)");
    }
}
