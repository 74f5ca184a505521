use reqwest::Url;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, error};

use crate::api::{Notification, Notifier, Priority};
use crate::http::{ClientError, ensure_success};

#[derive(Debug, Deserialize)]
struct MessageResponse {
    status: i32,
    #[serde(default)]
    errors: Vec<String>,
}

/// Pushover message API client.
#[derive(Debug, Clone)]
pub struct PushoverClient {
    http: reqwest::Client,
    endpoint: Url,
    application_key: String,
    user_key: String,
}

impl PushoverClient {
    /// Message submission endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.pushover.net/1/messages.json";

    /// Client sending as `application_key` to `user_key`.
    pub fn new(
        http: reqwest::Client,
        endpoint: Url,
        application_key: impl Into<String>,
        user_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint,
            application_key: application_key.into(),
            user_key: user_key.into(),
        }
    }

    async fn download(&self, url: &str) -> anyhow::Result<Part> {
        let res = ensure_success(self.http.get(url).send().await?).await?;
        let mime = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = res.bytes().await?;
        let name = url.rsplit('/').next().unwrap_or("image.jpg").to_string();
        Ok(Part::bytes(bytes.to_vec()).file_name(name).mime_str(&mime)?)
    }

    fn form(&self, notification: &Notification) -> Form {
        let mut form = Form::new()
            .text("token", self.application_key.clone())
            .text("user", self.user_key.clone())
            .text("title", notification.title.clone())
            .text("message", notification.message.clone())
            .text("priority", priority_value(notification.priority).to_string());
        if notification.html {
            form = form.text("html", "1");
        }
        if let Some(url) = &notification.url {
            form = form.text("url", url.clone());
        }
        if let Some(url_title) = &notification.url_title {
            form = form.text("url_title", url_title.clone());
        }
        if let Some(timestamp) = notification.timestamp {
            form = form.text("timestamp", timestamp.to_string());
        }
        form
    }
}

fn priority_value(priority: Priority) -> i8 {
    match priority {
        Priority::Low => -1,
        Priority::Normal => 0,
        Priority::High => 1,
    }
}

#[async_trait::async_trait]
impl Notifier for PushoverClient {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let mut form = self.form(notification);
        if let Some(image_url) = &notification.image_url {
            match self.download(image_url).await {
                Ok(part) => form = form.part("attachment", part),
                Err(err) => {
                    error!(url = %image_url, "can't download image, sending without it: {err:#}");
                }
            }
        }

        debug!(title = %notification.title, "sending pushover notification");
        let res = self.http.post(self.endpoint.clone()).multipart(form).send().await?;
        let res = ensure_success(res).await?;
        let body: MessageResponse = res.json().await?;
        if body.status != 1 {
            return Err(ClientError::Rejected(body.errors.join(", ")).into());
        }
        Ok(())
    }
}
