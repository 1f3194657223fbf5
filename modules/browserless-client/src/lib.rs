pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use tracing::debug;

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        Self::with_timeout(base_url, token, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BrowserlessError::Config(format!(
                "base url must be http(s): {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrowserlessError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{path}", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    /// Fetch fully-rendered HTML content for a URL via the /content endpoint.
    pub async fn content(&self, url: &str) -> Result<String> {
        let body = serde_json::json!({ "url": url });

        let resp = self
            .client
            .post(self.endpoint("content"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }

    /// Cheap liveness probe against the service's /pressure endpoint. Any
    /// HTTP answer means the service is up; only transport failures count.
    pub async fn ping(&self) -> Result<()> {
        let resp = self.client.get(self.endpoint("pressure")).send().await?;
        debug!(status = resp.status().as_u16(), "Browserless ping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_passed_as_query() {
        let client = BrowserlessClient::new("http://browserless:3000/", Some("s3cret")).unwrap();
        assert_eq!(client.base_url(), "http://browserless:3000");
        assert_eq!(
            client.endpoint("content"),
            "http://browserless:3000/content?token=s3cret"
        );
    }

    #[test]
    fn non_http_urls_are_rejected() {
        assert!(matches!(
            BrowserlessClient::new("browserless:3000", None),
            Err(BrowserlessError::Config(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_disconnect() {
        // Port 9 (discard) on loopback is closed in test environments.
        let client = BrowserlessClient::with_timeout(
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(err.is_disconnect(), "unexpected error: {err}");
    }
}
