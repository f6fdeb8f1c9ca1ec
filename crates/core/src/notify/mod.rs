pub mod format;
pub mod telegram;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackAction {
    Approve,
    Reject,
}

impl CallbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Button attached to a message. `data` travels back on press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAction {
    pub label: String,
    pub data: String,
}

impl MessageAction {
    pub fn for_recommendation(action: CallbackAction, id: Uuid) -> Self {
        let label = match action {
            CallbackAction::Approve => "Approve",
            CallbackAction::Reject => "Reject",
        };
        Self {
            label: label.to_string(),
            data: callback_data(action, id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient: String,
    pub text: String,
    pub actions: Vec<MessageAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn channel_name(&self) -> &'static str;

    /// Default recipient for prompts and operator alerts.
    fn default_recipient(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt>;

    async fn send_text(&self, text: &str) -> Result<DeliveryReceipt> {
        let message = OutboundMessage {
            recipient: self.default_recipient().to_string(),
            text: text.to_string(),
            actions: Vec::new(),
        };
        self.send(&message).await
    }
}

pub fn callback_data(action: CallbackAction, id: Uuid) -> String {
    format!("{}:{}", action.as_str(), id)
}

pub fn parse_callback_data(data: &str) -> Option<(CallbackAction, Uuid)> {
    let (action, id) = data.trim().split_once(':')?;
    let action = match action {
        "approve" => CallbackAction::Approve,
        "reject" => CallbackAction::Reject,
        _ => return None,
    };
    let id = Uuid::parse_str(id).ok()?;
    Some((action, id))
}
