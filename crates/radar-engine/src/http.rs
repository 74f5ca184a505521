use std::time::Duration;

/// Errors reported by the HTTP collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("http {status}: {body}")]
    Status {
        /// Response status.
        status: reqwest::StatusCode,
        /// Response body, possibly empty.
        body: String,
    },
    /// The server accepted the request but reported a failure in its payload.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Shared HTTP client for every collaborator.
pub fn build_http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .user_agent(concat!("malradar/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Turn non-success statuses into a [`ClientError::Status`].
pub(crate) async fn ensure_success(res: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(ClientError::Status { status, body }.into());
    }
    Ok(res)
}
