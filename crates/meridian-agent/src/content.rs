//! Normalized conversation content.
//!
//! A message's content is either plain text or an ordered list of blocks.
//! Provider adapters are the only place where these normalized shapes are
//! translated into provider-specific payloads.

use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One content block inside a block-list message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// Message content: plain text or content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Content {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(t) => Some(t),
            Content::Blocks(_) => None,
        }
    }

    /// Concatenated text of all text blocks (plain text returns itself).
    pub fn joined_text(&self) -> String {
        match self {
            Content::Text(t) => t.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn has_tool_use(&self) -> bool {
        matches!(self, Content::Blocks(blocks)
            if blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })))
    }

    pub fn has_tool_result(&self) -> bool {
        matches!(self, Content::Blocks(blocks)
            if blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. })))
    }
}

/// A single conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Content,
}

impl ChatMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Content::Text(text.into()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    pub fn blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: Content::Blocks(blocks),
        }
    }

    /// Serialize into the normalized wire value passed to adapters.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Read an image file into a base64 [`ContentBlock::Image`].
pub fn encode_image(path: &str) -> std::io::Result<ContentBlock> {
    let bytes = std::fs::read(path)?;
    let media_type = guess_media_type(path);
    Ok(ContentBlock::Image {
        media_type: media_type.to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

fn guess_media_type(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_serializes_as_string() {
        let msg = ChatMessage::user("hello");
        let value = msg.to_value();
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "hello");
    }

    #[test]
    fn block_content_round_trips() {
        let msg = ChatMessage::blocks(
            Role::Assistant,
            vec![
                ContentBlock::Text {
                    text: "checking".into(),
                },
                ContentBlock::ToolUse {
                    id: "c1".into(),
                    name: "get_time".into(),
                    arguments: serde_json::json!({}),
                },
            ],
        );
        let value = msg.to_value();
        assert_eq!(value["content"][1]["type"], "tool_use");

        let back: ChatMessage = serde_json::from_value(value).unwrap();
        assert!(back.content.has_tool_use());
        assert!(!back.content.has_tool_result());
    }

    #[test]
    fn joined_text_skips_non_text_blocks() {
        let content = Content::Blocks(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::Image {
                media_type: "image/png".into(),
                data: "xxxx".into(),
            },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(content.joined_text(), "a b");
    }

    #[test]
    fn media_type_guessing() {
        assert_eq!(guess_media_type("x.jpg"), "image/jpeg");
        assert_eq!(guess_media_type("x.PNG"), "image/png");
        assert_eq!(guess_media_type("x.webp"), "image/webp");
        assert_eq!(guess_media_type("noext"), "image/png");
    }
}
