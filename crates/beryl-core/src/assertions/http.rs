//! Assertion execution over the directory check endpoint.

use async_trait::async_trait;
use serde::Deserialize;

use super::{AssertionError, AssertionExecutor};

const CHECK_PATH: &str = "/api/v3/directory/check";

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    check: bool,
}

/// Executor posting check requests to the REST gateway.
pub struct HttpAssertionExecutor {
    http: reqwest::Client,
    base: String,
}

impl HttpAssertionExecutor {
    /// Creates an executor against `base`, e.g. `https://localhost:9393`.
    pub fn new(http: reqwest::Client, base: impl Into<String>) -> Self {
        Self { http, base: base.into().trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl AssertionExecutor for HttpAssertionExecutor {
    async fn execute(&self, check: &serde_json::Value) -> Result<bool, AssertionError> {
        let response = self
            .http
            .post(format!("{}{CHECK_PATH}", self.base))
            .json(check)
            .send()
            .await
            .map_err(|err| AssertionError::Query { message: err.to_string() })?;
        if !response.status().is_success() {
            return Err(AssertionError::Query {
                message: format!("check endpoint returned {}", response.status()),
            });
        }
        let verdict: CheckResponse = response
            .json()
            .await
            .map_err(|err| AssertionError::Query { message: err.to_string() })?;
        Ok(verdict.check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_response_defaults_to_false() {
        let parsed: CheckResponse = serde_json::from_str("{}").unwrap();
        assert!(!parsed.check);
        let parsed: CheckResponse = serde_json::from_str(r#"{"check": true}"#).unwrap();
        assert!(parsed.check);
    }
}
