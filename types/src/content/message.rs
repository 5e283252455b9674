#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct MessageItem {
    /// The unique ID of the item, optional for client events
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,

    /// The role of the message sender: "user", "assistant", "system"
    role: MessageRole,

    /// The content of the message
    content: Vec<Content>,
}

impl MessageItem {
    pub fn builder() -> MessageItemBuilder {
        MessageItemBuilder::new()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn role(&self) -> MessageRole {
        self.role.clone()
    }

    pub fn content(&self) -> &[Content] {
        &self.content
    }
}

pub struct MessageItemBuilder {
    item: MessageItem,
}

impl Default for MessageItemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageItemBuilder {
    pub fn new() -> Self {
        Self {
            item: MessageItem {
                id: None,
                role: MessageRole::User,
                content: Vec::new(),
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.item.id = Some(id.to_string());
        self
    }

    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.item.role = role;
        self
    }

    pub fn with_input_text(mut self, text: &str) -> Self {
        self.item.content.push(Content::input_text(text));
        self
    }

    pub fn build(self) -> MessageItem {
        self.item
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "system")]
    System,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "input_text")]
    InputText(TextContent),
    #[serde(rename = "text")]
    Text(TextContent),
    #[serde(rename = "audio")]
    Audio(AudioContent),
}

impl Content {
    pub fn input_text(text: &str) -> Self {
        Content::InputText(TextContent::new(text))
    }

    /// The readable text of this part, whichever shape carries it.
    pub fn text(&self) -> &str {
        match self {
            Content::InputText(content) | Content::Text(content) => content.text(),
            Content::Audio(content) => content.transcript(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TextContent {
    text: String,
}

impl TextContent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct AudioContent {
    transcript: String,
}

impl AudioContent {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
        }
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}
