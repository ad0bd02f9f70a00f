use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::error::{CustomError, FetchError};

/// Typed `GET` helper bound to one base URL.
///
/// Every failure is reported as a [`FetchError`]; callers that only want to show an
/// error use [`FetchError::to_custom_error`].
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Joins `path` onto the base URL, keeping any path prefix the base carries.
    pub fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        let full_url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&full_url).map_err(|e| FetchError::InvalidUrl(format!("{full_url}: {e}")))
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(url = %url, "Sending GET request.");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(FetchError::Status(error_from_body(status, &body)));
        }

        serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
            status: status.as_u16(),
            source,
        })
    }
}

#[derive(Deserialize)]
struct ErrorMessageBody {
    error: String,
}

/// Builds the error shape for a non-2xx response. Accepts a `{message, statusCode}`
/// body, an `{error}` body, or plain text, falling back to the reason phrase.
fn error_from_body(status: StatusCode, body: &[u8]) -> CustomError {
    if let Ok(custom) = serde_json::from_slice::<CustomError>(body) {
        return custom;
    }
    if let Ok(ErrorMessageBody { error }) = serde_json::from_slice::<ErrorMessageBody>(body) {
        return CustomError {
            message: error,
            status_code: status.as_u16(),
        };
    }

    let text = String::from_utf8_lossy(body).trim().to_string();
    let message = if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    } else {
        text
    };
    CustomError {
        message,
        status_code: status.as_u16(),
    }
}
