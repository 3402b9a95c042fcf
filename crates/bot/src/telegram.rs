//! Telegram Bot API client: long polling in, chat operations out.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bot_api::{ChatTransport, Keyboard, TransformCatalog};
use reqwest::{multipart, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use shared::{
    domain::{ChatAction, ChatId, MessageId, UserId},
    protocol::{Inbound, TransformEvent},
};
use url::Url;

// Headroom on top of the long-poll timeout before the request itself gives up.
const REQUEST_SLACK: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct File {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: [&'static str; 2],
}

#[derive(Debug, Serialize)]
struct KeyboardButton<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct ReplyKeyboardMarkup<'a> {
    keyboard: Vec<Vec<KeyboardButton<'a>>>,
    resize_keyboard: bool,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyKeyboardMarkup<'a>>,
}

/// Converts a polled update into an event for the dispatcher.
///
/// Updates without a sender (channel posts, service messages) yield `None`.
/// A photo wins over any caption; the largest size is the one downloaded.
pub fn to_inbound(update: Update, catalog: &TransformCatalog) -> Option<Inbound> {
    let message = update.message.or(update.edited_message)?;
    let from = message.from?;
    let largest_photo = message
        .photo
        .unwrap_or_default()
        .into_iter()
        .max_by_key(|size| u64::from(size.width) * u64::from(size.height));

    let event = match (largest_photo, message.text) {
        (Some(photo), _) => TransformEvent::PhotoUpload {
            file_id: photo.file_id,
        },
        (None, Some(text)) => catalog.classify(&text),
        (None, None) => TransformEvent::Unknown { text: None },
    };

    Some(Inbound {
        user_id: UserId(from.id),
        chat_id: ChatId(message.chat.id),
        message_id: MessageId(message.message_id),
        event,
    })
}

#[derive(Clone)]
pub struct TelegramTransport {
    http: Client,
    api_url: String,
    token: String,
}

impl TelegramTransport {
    pub fn new(api_url: &str, token: &str, poll_timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(api_url)
            .with_context(|| format!("invalid telegram_api_url '{api_url}'"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("telegram_api_url must be http or https, got '{api_url}'");
        }
        let http = Client::builder()
            .timeout(poll_timeout + REQUEST_SLACK)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_url, self.token, file_path)
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let res = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("{method} request failed"))?;
        Self::parse(method, res).await
    }

    async fn parse<T: DeserializeOwned>(method: &str, res: reqwest::Response) -> Result<T> {
        let status = res.status();
        let body: ApiResponse<T> = res
            .json()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("{method} returned an unreadable body ({status})"))?;
        if !body.ok {
            bail!(
                "{method} rejected: {}",
                body.description.unwrap_or_else(|| status.to_string())
            );
        }
        body.result
            .ok_or_else(|| anyhow!("{method} returned no result"))
    }

    /// Confirms the token and returns the bot's own account.
    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", &json!({})).await
    }

    pub async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &GetUpdatesRequest {
                offset,
                timeout: timeout_secs,
                allowed_updates: ["message", "edited_message"],
            },
        )
        .await
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageId> {
        let reply_markup = keyboard.map(|rows| ReplyKeyboardMarkup {
            keyboard: rows
                .iter()
                .map(|row| row.iter().map(|label| KeyboardButton { text: label }).collect())
                .collect(),
            resize_keyboard: true,
        });
        let sent: Message = self
            .call(
                "sendMessage",
                &SendMessageRequest {
                    chat_id: chat_id.0,
                    text,
                    reply_to_message_id: reply_to.map(|id| id.0),
                    reply_markup,
                },
            )
            .await?;
        Ok(MessageId(sent.message_id))
    }

    async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &json!({ "chat_id": chat_id.0, "message_id": message_id.0, "text": text }),
            )
            .await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                &json!({ "chat_id": chat_id.0, "message_id": message_id.0 }),
            )
            .await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        photo: Vec<u8>,
    ) -> Result<MessageId> {
        let part = multipart::Part::bytes(photo).file_name("dream.jpg");
        let mut form = multipart::Form::new()
            .text("chat_id", chat_id.0.to_string())
            .part("photo", part);
        if let Some(reply_to) = reply_to {
            form = form.text("reply_to_message_id", reply_to.0.to_string());
        }
        let res = self
            .http
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("sendPhoto request failed")?;
        let sent: Message = Self::parse("sendPhoto", res).await?;
        Ok(MessageId(sent.message_id))
    }

    async fn send_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        let _: bool = self
            .call(
                "sendChatAction",
                &json!({ "chat_id": chat_id.0, "action": action.as_str() }),
            )
            .await?;
        Ok(())
    }

    async fn download_photo(&self, file_id: &str) -> Result<Vec<u8>> {
        let file: File = self
            .call("getFile", &json!({ "file_id": file_id }))
            .await?;
        let file_path = file
            .file_path
            .ok_or_else(|| anyhow!("file {file_id} is not available for download"))?;
        let bytes = self
            .http
            .get(self.file_url(&file_path))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| e.without_url())
            .context("photo download failed")?
            .bytes()
            .await
            .map_err(|e| e.without_url())?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
#[path = "tests/telegram_tests.rs"]
mod tests;
