use crate::content::message::MessageItem;

/// A conversation item. Only plain messages are sent by this client.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Item {
    #[serde(rename = "message")]
    Message(MessageItem),
}

impl Item {
    pub fn message(&self) -> &MessageItem {
        match self {
            Item::Message(message) => message,
        }
    }
}
