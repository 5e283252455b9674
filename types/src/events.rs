pub mod client;

use client::*;

/// Messages this client writes to the control channel.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate(SessionUpdateEvent),
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate(ConversationItemCreateEvent),
    #[serde(rename = "response.create")]
    ResponseCreate(ResponseCreateEvent),
}

impl ClientEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate(_) => "session.update",
            ClientEvent::ConversationItemCreate(_) => "conversation.item.create",
            ClientEvent::ResponseCreate(_) => "response.create",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Voice;
    use crate::{Item, MessageItem, MessageRole, Session};
    use serde_json::json;

    #[test]
    fn session_update_wire_shape() {
        let session = Session::new()
            .with_modalities_enable_audio()
            .with_voice(Voice::Verse)
            .with_temperature(0.5)
            .with_instructions("Speak like a dog.")
            .build();
        let event = ClientEvent::SessionUpdate(SessionUpdateEvent::new(session));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "session.update",
                "session": {
                    "modalities": ["text", "audio"],
                    "voice": "verse",
                    "temperature": 0.5,
                    "instructions": "Speak like a dog."
                }
            })
        );
    }

    #[test]
    fn conversation_item_wire_shape() {
        let item = MessageItem::builder()
            .with_role(MessageRole::User)
            .with_input_text("Hello there!")
            .build();
        let create = ConversationItemCreateEvent::new(Item::Message(item));
        let event = ClientEvent::ConversationItemCreate(create);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": "Hello there!"}]
                }
            })
        );
    }

    #[test]
    fn response_create_carries_empty_object() {
        let event = ClientEvent::ResponseCreate(ResponseCreateEvent::new());
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(text, r#"{"type":"response.create","response":{}}"#);
    }
}
