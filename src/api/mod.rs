pub mod error;

use crate::model::{Snapshot, LAST_UPDATE_KEY};
use crate::resolve;
use async_trait::async_trait;
use chrono::Local;
pub use error::Error;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

/// Total allowance for one GET, connect and body included.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Producer of device snapshots. The coordinator only knows this seam, so
/// tests can drive it without a live device.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Snapshot, Error>;
}

/// HTTP client bound to one configured device endpoint.
pub struct ApiClient {
    endpoint: Url,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(endpoint: Url) -> Result<ApiClient, Error> {
        let client = reqwest::ClientBuilder::new()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(ApiClient { endpoint, client })
    }

    /// GET against the configured endpoint, with the `.local` host resolved
    /// first when possible. An unresolved name degrades to the original URL.
    async fn get(&self) -> Result<reqwest::Response, Error> {
        let url = match resolve::resolve_local_url(&self.endpoint).await {
            Some(resolved) => resolved,
            None => {
                log::debug!(
                    "Could not resolve {}, trying the original URL",
                    self.endpoint
                );
                self.endpoint.clone()
            }
        };

        self.client.get(url).send().await.map_err(map_fetch_err)
    }

    /// Connectivity check used before the service starts polling: did the
    /// device answer with anything below 400?
    pub async fn probe(&self) -> bool {
        match self.get().await {
            Ok(response) => {
                log::debug!("Probe of {} returned {}", self.endpoint, response.status());
                response.status() < http::StatusCode::BAD_REQUEST
            }
            Err(error) => {
                log::debug!("Probe of {} failed: {}", self.endpoint, error);
                false
            }
        }
    }
}

#[async_trait]
impl SnapshotSource for ApiClient {
    async fn fetch(&self) -> Result<Snapshot, Error> {
        let response = self.get().await?.error_for_status().map_err(map_fetch_err)?;
        log::debug!("Received response with status {}", response.status());

        let body = response.text().await.map_err(map_fetch_err)?;
        let value: Value =
            serde_json::from_str(&body).map_err(|e| Error::Parse(e.to_string()))?;
        let mut data = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::Parse(format!(
                    "expected a JSON object, got {}",
                    type_name(&other)
                )))
            }
        };

        /* Record when this payload was fetched; local wall clock, no zone suffix. */
        let stamp = Local::now()
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        data.insert(LAST_UPDATE_KEY.to_string(), Value::String(stamp));

        Ok(Snapshot::new(data))
    }
}

fn map_fetch_err(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout
    } else if let Some(status) = error.status() {
        Error::Transport(format!("device responded {}", status))
    } else {
        Error::Transport(error.to_string())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use mockito::Server;

    fn client_for(url: &str) -> ApiClient {
        ApiClient::new(Url::parse(url).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn fetch_returns_body_keys_plus_last_update_stamp() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"solarReadingTotal": {"current": 120, "total": 12345000}}"#)
            .create_async()
            .await;

        let before = Local::now().naive_local();
        let snapshot = client_for(&server.url()).fetch().await.unwrap();
        let after = Local::now().naive_local();

        let mut keys: Vec<&str> = snapshot.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![LAST_UPDATE_KEY, "solarReadingTotal"]);

        let stamp = snapshot.last_update().unwrap();
        let parsed = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S%.f").unwrap();
        assert!(parsed >= before - chrono::Duration::seconds(1));
        assert!(parsed <= after + chrono::Duration::seconds(1));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_classifies_server_errors_as_transport() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(500)
            .create_async()
            .await;

        let result = client_for(&server.url()).fetch().await;

        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn fetch_classifies_connection_failures_as_transport() {
        /* Port 9 (discard) is closed; the connection is refused immediately. */
        let result = client_for("http://127.0.0.1:9").fetch().await;

        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn fetch_rejects_malformed_json() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("not json at all")
            .create_async()
            .await;

        let result = client_for(&server.url()).fetch().await;

        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn fetch_rejects_non_object_payloads() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("[1, 2, 3]")
            .create_async()
            .await;

        let result = client_for(&server.url()).fetch().await;

        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn probe_accepts_any_status_below_400() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        assert!(client_for(&server.url()).probe().await);
    }

    #[tokio::test]
    async fn probe_rejects_server_errors_and_unreachable_hosts() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(500)
            .create_async()
            .await;

        assert!(!client_for(&server.url()).probe().await);
        assert!(!client_for("http://127.0.0.1:9").probe().await);
    }
}
