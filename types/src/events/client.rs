use crate::audio::Modality;
use crate::session::Session;
use crate::Item;

/// `session.update` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct SessionUpdateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The session configuration to update
    session: Session,
}

impl SessionUpdateEvent {
    pub fn new(session: Session) -> Self {
        Self {
            event_id: None,
            session,
        }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// `conversation.item.create` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ConversationItemCreateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The ID of the preceding item after which the new item will be inserted
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_item_id: Option<String>,

    /// The item to add to the conversation
    item: Item,
}

impl ConversationItemCreateEvent {
    pub fn new(item: Item) -> Self {
        Self {
            event_id: None,
            previous_item_id: None,
            item,
        }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn with_previous_item_id(mut self, previous_item_id: &str) -> Self {
        self.previous_item_id = Some(previous_item_id.to_string());
        self
    }

    pub fn item(&self) -> &Item {
        &self.item
    }
}

/// Per-response overrides. Serializes to `{}` when nothing is overridden.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ResponseOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    modalities: Option<Vec<Modality>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

/// `response.create` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ResponseCreateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// Configuration for the response
    response: ResponseOptions,
}

impl Default for ResponseCreateEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCreateEvent {
    pub fn new() -> Self {
        Self {
            event_id: None,
            response: ResponseOptions::default(),
        }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.response.modalities = Some(modalities);
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.response.instructions = Some(instructions.to_string());
        self
    }
}
