use crate::config::Settings;
use crate::notify::{DeliveryReceipt, Notifier, OutboundMessage};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let (bot_token, chat_id) = settings.require_telegram()?;
        let api_base =
            std::env::var("TELEGRAM_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build Telegram http client")?;

        Ok(Self {
            http,
            api_base,
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_base.trim_end_matches('/'),
            self.bot_token,
            method
        )
    }

    async fn call<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T> {
        let res = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Telegram {method} request failed"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read Telegram {method} response"))?;
        let parsed = serde_json::from_str::<ApiResponse<T>>(&text)
            .with_context(|| format!("unexpected Telegram {method} response (HTTP {status})"))?;

        if !parsed.ok {
            anyhow::bail!(
                "Telegram {method} failed (HTTP {status}): {}",
                parsed.description.unwrap_or_default()
            );
        }
        parsed
            .result
            .with_context(|| format!("Telegram {method} returned no result"))
    }

    /// Acknowledges a button press so the client stops its spinner.
    pub async fn answer_callback_query(&self, callback_query_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "callback_query_id": callback_query_id,
            "text": text,
        });
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    fn channel_name(&self) -> &'static str {
        "telegram"
    }

    fn default_recipient(&self) -> &str {
        &self.chat_id
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt> {
        let body = SendMessage::from_outbound(message);
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(DeliveryReceipt {
            message_id: sent.message_id.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup<'a>>,
}

#[derive(Debug, Clone, Serialize)]
struct InlineKeyboardMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineKeyboardButton<'a>>>,
}

#[derive(Debug, Clone, Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

impl<'a> SendMessage<'a> {
    fn from_outbound(message: &'a OutboundMessage) -> Self {
        let reply_markup = if message.actions.is_empty() {
            None
        } else {
            Some(InlineKeyboardMarkup {
                inline_keyboard: vec![message
                    .actions
                    .iter()
                    .map(|a| InlineKeyboardButton {
                        text: &a.label,
                        callback_data: &a.data,
                    })
                    .collect()],
            })
        };
        Self {
            chat_id: &message.recipient,
            text: &message.text,
            disable_web_page_preview: true,
            reply_markup,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Incoming webhook update. Only button presses are of interest.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<CallbackMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMessage {
    pub chat: Chat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{CallbackAction, MessageAction};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn send_message_body_has_inline_keyboard() {
        let id = Uuid::new_v4();
        let msg = OutboundMessage {
            recipient: "12345".to_string(),
            text: "BUY ACME".to_string(),
            actions: vec![
                MessageAction::for_recommendation(CallbackAction::Approve, id),
                MessageAction::for_recommendation(CallbackAction::Reject, id),
            ],
        };
        let v = serde_json::to_value(SendMessage::from_outbound(&msg)).unwrap();
        assert_eq!(v["chat_id"], "12345");
        let row = &v["reply_markup"]["inline_keyboard"][0];
        assert_eq!(row[0]["text"], "Approve");
        assert_eq!(row[0]["callback_data"], format!("approve:{id}"));
        assert_eq!(row[1]["callback_data"], format!("reject:{id}"));
    }

    #[test]
    fn plain_text_has_no_markup() {
        let msg = OutboundMessage {
            recipient: "1".to_string(),
            text: "hello".to_string(),
            actions: vec![],
        };
        let v = serde_json::to_value(SendMessage::from_outbound(&msg)).unwrap();
        assert!(v.get("reply_markup").is_none());
    }

    #[test]
    fn parses_callback_update() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 1,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 9},
                "data": "approve:3f0c9f2e-8a8e-4c43-9d1e-0a5d3b8e2f11",
                "message": {"message_id": 5, "chat": {"id": 12345, "type": "private"}}
            }
        }))
        .unwrap();
        let cb = update.callback_query.unwrap();
        assert_eq!(cb.id, "cb-1");
        assert_eq!(cb.message.unwrap().chat.id, 12345);
    }

    #[test]
    fn failed_api_response_is_detected() {
        let parsed: ApiResponse<SentMessage> =
            serde_json::from_value(json!({"ok": false, "description": "chat not found"})).unwrap();
        assert!(!parsed.ok);
        assert!(parsed.result.is_none());
    }
}
