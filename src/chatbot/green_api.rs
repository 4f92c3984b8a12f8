//! Green API client: the WhatsApp gateway.
//!
//! Every endpoint has the shape `{host}/waInstance{id}/{method}/{token}`.
//! Uploads go to the per-instance media host instead of the main API host.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::chatbot::services::{Gateway, GatewayMessage};
use crate::config::GreenApiConfig;
use crate::error::{Error, Result};

/// Uploads and downloads of media get a longer budget than JSON calls.
const MEDIA_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GreenApiClient {
    client: reqwest::Client,
    api_url: String,
    media_url: String,
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    message: &'a str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    id_message: Option<String>,
}

impl GreenApiClient {
    pub fn new(config: &GreenApiConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: format!("{}/waInstance{}", config.host, config.instance_id),
            media_url: format!("{}/waInstance{}", config.media_host, config.instance_id),
            token: config.token.clone(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}/{}", self.api_url, method, self.token)
    }

    fn media_endpoint(&self, method: &str) -> String {
        format!("{}/{}/{}", self.media_url, method, self.token)
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.endpoint(method))
            .json(body)
            .send()
            .await
            .map_err(Error::from_request)?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Turn a non-2xx response into [`Error::Api`].
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Api { status: status.as_u16(), body })
}

/// MIME type for an upload, from the file extension.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Gateway for GreenApiClient {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        let request = SendMessageRequest { chat_id, message: text };
        let response = self
            .client
            .post(self.endpoint("sendMessage"))
            .json(&request)
            .send()
            .await
            .map_err(Error::from_request)?;
        let sent: SendResponse = check_status(response).await?.json().await?;
        debug!("📤 Sent message to {chat_id} ({:?})", sent.id_message);
        Ok(())
    }

    async fn send_file_upload(&self, chat_id: &str, path: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let size = bytes.len();

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(mime_for(path))?;
        let mut form = Form::new().text("chatId", chat_id.to_string()).part("file", part);
        if !caption.is_empty() {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .client
            .post(self.media_endpoint("sendFileByUpload"))
            .timeout(MEDIA_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(Error::from_request)?;
        check_status(response).await?;
        info!("📎 Uploaded {file_name} ({size} bytes) to {chat_id}");
        Ok(())
    }

    async fn download_to_file(&self, url: &str, path: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .timeout(MEDIA_TIMEOUT)
            .send()
            .await
            .map_err(Error::from_request)?;
        let bytes = check_status(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::EmptyResponse);
        }
        tokio::fs::write(path, &bytes).await?;
        debug!("📥 Downloaded {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    async fn get_message(&self, chat_id: &str, message_id: &str) -> Result<Option<GatewayMessage>> {
        let body = json!({ "chatId": chat_id, "idMessage": message_id });
        match self.post_json::<GatewayMessage>("getMessage", &body).await {
            Ok(message) => Ok(Some(message)),
            Err(Error::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn recent_history(&self, chat_id: &str, count: usize) -> Result<Vec<GatewayMessage>> {
        let body = json!({ "chatId": chat_id, "count": count });
        self.post_json("getChatHistory", &body).await
    }

    async fn health(&self) -> Result<String> {
        let response = self
            .client
            .get(self.endpoint("getSettings"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(Error::from_request)?;
        match check_status(response).await {
            Ok(_) => Ok("Green API connected".to_string()),
            Err(e) => {
                warn!("Green API health check failed: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GreenApiConfig {
        GreenApiConfig {
            instance_id: "7105123456".into(),
            token: "tok".into(),
            host: "https://api.green-api.com".into(),
            media_host: "https://7105.api.greenapi.com".into(),
        }
    }

    #[test]
    fn test_endpoints() {
        let client = GreenApiClient::new(&config(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.endpoint("sendMessage"),
            "https://api.green-api.com/waInstance7105123456/sendMessage/tok"
        );
        assert_eq!(
            client.media_endpoint("sendFileByUpload"),
            "https://7105.api.greenapi.com/waInstance7105123456/sendFileByUpload/tok"
        );
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("/tmp/a.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("x.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("clip.mp4")), "video/mp4");
        assert_eq!(mime_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_history_entry_parses() {
        let raw = r#"[
            {"type": "outgoing", "idMessage": "1", "typeMessage": "textMessage", "textMessage": "hello"},
            {"type": "incoming", "idMessage": "2", "typeMessage": "imageMessage",
             "senderName": "Aida", "downloadUrl": "https://cdn/x.jpg", "caption": "look"}
        ]"#;
        let messages: Vec<GatewayMessage> = serde_json::from_str(raw).unwrap();
        assert!(messages[0].is_outgoing());
        assert_eq!(messages[0].text_message.as_deref(), Some("hello"));
        assert!(!messages[1].is_outgoing());
        assert_eq!(messages[1].caption.as_deref(), Some("look"));
    }
}
