use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of content a block holds.
///
/// Unknown names read back as [`BlockType::Text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum BlockType {
    #[default]
    Text,
    Todo,
    Heading,
    Heading1,
    Heading2,
    Heading3,
    Subheading,
    Quote,
    CodeBlock,
    Paragraph,
    OrderedList,
    ListItem,
    TaskList,
    HorizontalRule,
    Math,
    Twitter,
    Doc,
    MarkCode,
    BulletList,
    MarkLink,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Todo => "todo",
            BlockType::Heading => "heading",
            BlockType::Heading1 => "heading1",
            BlockType::Heading2 => "heading2",
            BlockType::Heading3 => "heading3",
            BlockType::Subheading => "subheading",
            BlockType::Quote => "quote",
            BlockType::CodeBlock => "codeBlock",
            BlockType::Paragraph => "paragraph",
            BlockType::OrderedList => "orderedList",
            BlockType::ListItem => "listItem",
            BlockType::TaskList => "taskList",
            BlockType::HorizontalRule => "horizontalRule",
            BlockType::Math => "math",
            BlockType::Twitter => "twitter",
            BlockType::Doc => "doc",
            BlockType::MarkCode => "mark_code",
            BlockType::BulletList => "bulletList",
            BlockType::MarkLink => "mark_link",
        }
    }

    /// Heading block for a heading level; levels past 3 collapse to `heading`.
    pub fn heading(level: u64) -> Self {
        match level {
            1 => BlockType::Heading1,
            2 => BlockType::Heading2,
            3 => BlockType::Heading3,
            _ => BlockType::Heading,
        }
    }
}

impl From<&str> for BlockType {
    fn from(value: &str) -> Self {
        match value {
            "todo" => BlockType::Todo,
            "heading" => BlockType::Heading,
            "heading1" => BlockType::Heading1,
            "heading2" => BlockType::Heading2,
            "heading3" => BlockType::Heading3,
            "subheading" => BlockType::Subheading,
            "quote" => BlockType::Quote,
            "codeBlock" | "code" => BlockType::CodeBlock,
            "paragraph" => BlockType::Paragraph,
            "orderedList" => BlockType::OrderedList,
            "listItem" => BlockType::ListItem,
            "taskList" => BlockType::TaskList,
            "horizontalRule" => BlockType::HorizontalRule,
            "math" => BlockType::Math,
            "twitter" => BlockType::Twitter,
            "doc" => BlockType::Doc,
            "mark_code" => BlockType::MarkCode,
            "bulletList" => BlockType::BulletList,
            "mark_link" => BlockType::MarkLink,
            _ => BlockType::Text,
        }
    }
}

impl From<String> for BlockType {
    fn from(value: String) -> Self {
        BlockType::from(value.as_str())
    }
}

impl From<BlockType> for &'static str {
    fn from(value: BlockType) -> Self {
        value.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: u64,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub content: String,
    pub page_id: u64,
    pub order: i64,
    pub checked: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Hash of `content` at the time `embedding` was computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_hash: Option<u64>,

    #[serde(default)]
    pub use_count: u64,
    #[serde(default)]
    pub avg_similarity: f32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Block {
    /// Fold one more retrieval into the usage counters.
    pub fn record_use(&mut self, similarity: f32) {
        let count = self.use_count as f32;
        self.avg_similarity = (self.avg_similarity * count + similarity) / (count + 1.0);
        self.use_count += 1;
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockCreate {
    pub page_id: Option<u64>,
    #[serde(default, rename = "type")]
    pub block_type: Option<BlockType>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub checked: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockUpdate {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub block_type: Option<BlockType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
}

impl BlockUpdate {
    pub fn is_empty(&self) -> bool {
        self.block_type.is_none()
            && self.content.is_none()
            && self.order.is_none()
            && self.checked.is_none()
    }
}
