//! Core data models shared by the extractor, orchestrator and scanner.
//!
//! These are the shapes the chat client hands back: resolved chats and
//! history messages. Message content is a closed variant so the extractor
//! matches on what a message actually carries instead of probing optional
//! fields.

use serde::{Deserialize, Serialize};

/// Opaque platform identifier of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chat as resolved by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    #[serde(default)]
    pub title: String,
}

impl Chat {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id: ChatId(id),
            title: title.into(),
        }
    }

    /// Title for reports, falling back to `fallback` when the chat has none.
    pub fn display_title<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.title.is_empty() {
            fallback
        } else {
            &self.title
        }
    }
}

/// A single history message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub content: MessageContent,
    /// Inline keyboard, row by row.
    #[serde(default)]
    pub buttons: Vec<Vec<Button>>,
}

/// What a message body carries. Text messages and media captions are
/// mutually exclusive on the platform; entities belong to whichever is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
        #[serde(default)]
        entities: Vec<Entity>,
    },
    Captioned {
        caption: String,
        #[serde(default)]
        entities: Vec<Entity>,
    },
    #[default]
    Empty,
}

/// A rich-text entity over a message body.
///
/// `offset` and `length` are measured in UTF-16 code units, as the platform
/// reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub offset: usize,
    pub length: usize,
    #[serde(flatten)]
    pub kind: EntityKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    /// A URL typed out in the body; the target is the spanned text.
    Url,
    /// Hyperlinked text with an explicit target.
    TextLink { url: String },
    #[serde(other)]
    Other,
}

/// An inline keyboard button. Only URL buttons matter here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl Message {
    pub fn text(id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            content: MessageContent::Text {
                text: text.into(),
                entities: Vec::new(),
            },
            buttons: Vec::new(),
        }
    }

    pub fn captioned(id: i64, caption: impl Into<String>) -> Self {
        Self {
            id,
            content: MessageContent::Captioned {
                caption: caption.into(),
                entities: Vec::new(),
            },
            buttons: Vec::new(),
        }
    }

    /// Attach entities to the current body. No-op on an empty message.
    pub fn with_entities(mut self, new: Vec<Entity>) -> Self {
        match &mut self.content {
            MessageContent::Text { entities, .. } | MessageContent::Captioned { entities, .. } => {
                *entities = new
            }
            MessageContent::Empty => {}
        }
        self
    }

    pub fn with_button_row(mut self, row: Vec<Button>) -> Self {
        self.buttons.push(row);
        self
    }

    /// The body text: message text or media caption.
    pub fn body(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text { text, .. } => Some(text),
            MessageContent::Captioned { caption, .. } => Some(caption),
            MessageContent::Empty => None,
        }
    }

    pub fn entities(&self) -> &[Entity] {
        match &self.content {
            MessageContent::Text { entities, .. } | MessageContent::Captioned { entities, .. } => {
                entities
            }
            MessageContent::Empty => &[],
        }
    }

    /// Button target URLs across all rows.
    pub fn button_urls(&self) -> impl Iterator<Item = &str> {
        self.buttons
            .iter()
            .flatten()
            .filter_map(|b| b.url.as_deref())
    }
}

impl Entity {
    pub fn url(offset: usize, length: usize) -> Self {
        Self {
            offset,
            length,
            kind: EntityKind::Url,
        }
    }

    pub fn text_link(offset: usize, length: usize, url: impl Into<String>) -> Self {
        Self {
            offset,
            length,
            kind: EntityKind::TextLink { url: url.into() },
        }
    }

    /// The text this entity spans inside `body`, or `None` when the range
    /// falls outside the body or splits a surrogate pair.
    pub fn span(&self, body: &str) -> Option<String> {
        let units: Vec<u16> = body.encode_utf16().collect();
        let end = self.offset.checked_add(self.length)?;
        let slice = units.get(self.offset..end)?;
        String::from_utf16(slice).ok()
    }
}

impl Button {
    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: Some(url.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_span_counts_utf16_units() {
        // The emoji takes two UTF-16 units.
        let body = "😀 see t.me/abcdef now";
        let e = Entity::url(7, 12);
        assert_eq!(e.span(body).as_deref(), Some("t.me/abcdef "));
        let e = Entity::url(7, 11);
        assert_eq!(e.span(body).as_deref(), Some("t.me/abcdef"));
    }

    #[test]
    fn entity_span_out_of_range() {
        assert!(Entity::url(3, 10).span("short").is_none());
    }

    #[test]
    fn body_and_entities_follow_variant() {
        let m = Message::captioned(1, "cap").with_entities(vec![Entity::url(0, 3)]);
        assert_eq!(m.body(), Some("cap"));
        assert_eq!(m.entities().len(), 1);

        let empty = Message::default().with_entities(vec![Entity::url(0, 1)]);
        assert!(empty.body().is_none());
        assert!(empty.entities().is_empty());
    }

    #[test]
    fn deserializes_fixture_shape() {
        let json = r#"{
            "id": 9,
            "content": {"type": "text", "text": "go here",
                        "entities": [{"offset": 0, "length": 2, "type": "text_link", "url": "https://t.me/x_y_z"},
                                     {"offset": 3, "length": 4, "type": "bold"}]},
            "buttons": [[{"text": "Join", "url": "https://t.me/+AAA"}]]
        }"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!(m.entities()[1].kind, EntityKind::Other);
        assert_eq!(m.button_urls().collect::<Vec<_>>(), vec!["https://t.me/+AAA"]);
    }
}
