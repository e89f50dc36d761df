use log::{debug, warn};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::auth::Token;
use crate::config::AzureDevOpsConfig;
use crate::error::{Result, ScanError};

const USER_AGENT: &str = concat!("adoscan/", env!("CARGO_PKG_VERSION"));

/// Blocking-style Azure DevOps REST transport.
///
/// Every call is awaited by the caller before the next one starts. Transient
/// failures (connection errors, 429 and 5xx) are retried with exponential
/// backoff; every other non-success status is returned as [`ScanError::ApiError`]
/// carrying the response body.
pub struct AzureDevOpsClient {
    client: Client,
    api_url: Url,
    vssps_url: Url,
    organization: String,
    token: Token,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl AzureDevOpsClient {
    pub fn new(config: &AzureDevOpsConfig, organization: &str, token: Token) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ScanError::Config(format!("Failed to create HTTP client: {e}")))?;

        let api_url = organization_url(&config.api_base_url, organization)?;
        let vssps_url = organization_url(&config.vssps_base_url, organization)?;

        Ok(Self {
            client,
            api_url,
            vssps_url,
            organization: organization.to_string(),
            token,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// `{api}/{org}/_apis/{path}`
    pub fn org_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        build_url(&self.api_url, &format!("_apis/{path}"), query)
    }

    /// `{api}/{org}/{project}/_apis/{path}`
    pub fn project_url(&self, project: &str, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        build_url(&self.api_url, &format!("{project}/_apis/{path}"), query)
    }

    /// `{vssps}/{org}/_apis/{path}`
    pub fn identity_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        build_url(&self.vssps_url, &format!("_apis/{path}"), query)
    }

    /// GET a JSON document, unwrapping the `{"count": n, "value": [...]}` envelope.
    pub async fn fetch(&self, url: &Url) -> Result<Value> {
        let (value, _) = self.fetch_with_headers(url).await?;
        Ok(value)
    }

    /// GET a JSON document together with the response headers (for continuation tokens).
    pub async fn fetch_with_headers(&self, url: &Url) -> Result<(Value, HeaderMap)> {
        let response = self.send_with_retry(|| self.client.get(url.clone())).await?;
        let headers = response.headers().clone();
        let body = response.text().await?;
        let value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)?
        };
        Ok((unwrap_envelope(value), headers))
    }

    /// GET a raw text body, such as a build log.
    pub async fn fetch_text(&self, url: &Url) -> Result<String> {
        let response = self.send_with_retry(|| self.client.get(url.clone())).await?;
        Ok(response.text().await?)
    }

    /// POST a JSON body. Failures carry the platform's `message` field when present.
    pub async fn post(&self, url: &Url, body: &Value) -> Result<Value> {
        let response = self
            .send_with_retry(|| self.client.post(url.clone()).json(body))
            .await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retry_count = 0;
        loop {
            let request = self.token.authorize(build());
            let delay = self
                .retry_base_delay
                .saturating_mul(2u32.saturating_pow(retry_count));

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    if retry_count >= self.max_retries {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({e}), retrying in {}ms ({}/{})...",
                        delay.as_millis(),
                        retry_count + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            debug!("{} {}", status.as_u16(), response.url());

            if is_transient(status) {
                if retry_count >= self.max_retries {
                    return Err(ScanError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: self.max_retries,
                    });
                }
                warn!(
                    "Azure DevOps API error (status {status}). Waiting {}ms before retry {}/{}...",
                    delay.as_millis(),
                    retry_count + 1,
                    self.max_retries
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(ScanError::ApiError {
                    status: status.as_u16(),
                    message: error_message(&error_text),
                });
            }

            return Ok(response);
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

fn organization_url(base: &str, organization: &str) -> Result<Url> {
    let base = Url::parse(base).map_err(|e| ScanError::Config(format!("Invalid base URL {base}: {e}")))?;
    if base.cannot_be_a_base() {
        return Err(ScanError::Config(format!("Base URL {base} cannot hold a path")));
    }
    base.join(&format!("{organization}/"))
        .map_err(|e| ScanError::Config(format!("Invalid organization URL: {e}")))
}

fn build_url(base: &Url, path: &str, query: &[(&str, &str)]) -> Result<Url> {
    let mut url = base
        .join(path)
        .map_err(|e| ScanError::Config(format!("Invalid API URL {path}: {e}")))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Collections come back as `{"count": n, "value": [...]}`; single records do not.
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("value") => {
            map.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn test_config(base: &str) -> AzureDevOpsConfig {
        AzureDevOpsConfig {
            api_base_url: base.to_string(),
            vssps_base_url: base.to_string(),
            max_retries: 2,
            retry_base_delay_ms: 1,
            ..AzureDevOpsConfig::default()
        }
    }

    #[test]
    fn unwraps_value_envelope() {
        let unwrapped = unwrap_envelope(json!({"count": 1, "value": [{"id": 1}]}));
        assert_eq!(unwrapped, json!([{"id": 1}]));

        let record = unwrap_envelope(json!({"id": 7}));
        assert_eq!(record, json!({"id": 7}));
    }

    #[test]
    fn extracts_platform_error_message() {
        assert_eq!(error_message(r#"{"message": "Project not found"}"#), "Project not found");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn builds_project_scoped_urls() {
        let client = AzureDevOpsClient::new(
            &test_config("https://dev.azure.com/"),
            "Contoso",
            Token::from("pat"),
        )
        .unwrap();

        let url = client
            .project_url("p1", "git/repositories", &[("api-version", "7.1")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://dev.azure.com/Contoso/p1/_apis/git/repositories?api-version=7.1"
        );

        let identity = client.identity_url("graph/users", &[]).unwrap();
        assert_eq!(identity.as_str(), "https://dev.azure.com/Contoso/_apis/graph/users");
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = AzureDevOpsClient::new(&test_config("not a url"), "Contoso", Token::from("pat"));
        assert!(matches!(result, Err(ScanError::Config(_))));
    }

    #[tokio::test]
    async fn retries_transient_status_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        // the 503 mock stops matching once its single expected hit is used up
        let failing = server
            .mock("GET", "/Contoso/_apis/projects")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/Contoso/_apis/projects")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"count": 1, "value": [{"id": "p1"}]}"#)
            .create_async()
            .await;

        let client =
            AzureDevOpsClient::new(&test_config(&server.url()), "Contoso", Token::from("pat"))
                .unwrap();
        let url = client.org_url("projects", &[]).unwrap();

        let value = client.fetch(&url).await.unwrap();
        assert_eq!(value, json!([{"id": "p1"}]));
        failing.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Contoso/_apis/projects")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let client =
            AzureDevOpsClient::new(&test_config(&server.url()), "Contoso", Token::from("pat"))
                .unwrap();
        let url = client.org_url("projects", &[]).unwrap();

        let result = client.fetch(&url).await;
        assert!(matches!(
            result,
            Err(ScanError::ApiErrorAfterRetries { status: 500, retries: 2 })
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Contoso/p9/_apis/git/repositories")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"message": "TF200016: project does not exist"}"#)
            .expect(1)
            .create_async()
            .await;

        let client =
            AzureDevOpsClient::new(&test_config(&server.url()), "Contoso", Token::from("pat"))
                .unwrap();
        let url = client.project_url("p9", "git/repositories", &[]).unwrap();

        let err = client.fetch(&url).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("TF200016"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sends_pat_as_basic_credentials() {
        let mut server = mockito::Server::new_async().await;
        // base64(":pat")
        let mock = server
            .mock("GET", "/Contoso/_apis/projects")
            .match_query(Matcher::Any)
            .match_header("authorization", "Basic OnBhdA==")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client =
            AzureDevOpsClient::new(&test_config(&server.url()), "Contoso", Token::from("pat"))
                .unwrap();
        let url = client.org_url("projects", &[]).unwrap();
        client.fetch(&url).await.unwrap();
        mock.assert_async().await;
    }
}
