//! Editor document flattening.
//!
//! The editor saves pages as a ProseMirror-style JSON tree:
//! `{"type": "doc", "content": [{"type": "paragraph", "content": [{"type": "text", "text": "hi"}]}]}`.
//! [`flatten`] walks it depth-first and emits one [`FlatBlock`] per block-level
//! node, numbering them with a running `order`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blocks::BlockType;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DocNode {
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<DocNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// One block derived from the document, before it is matched to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatBlock {
    pub block_type: BlockType,
    pub content: String,
    pub order: i64,
    pub checked: Option<bool>,
}

pub fn parse(content: &str) -> Result<DocNode, serde_json::Error> {
    serde_json::from_str(content)
}

pub fn flatten(doc: &DocNode) -> Vec<FlatBlock> {
    let mut out = Flattener { blocks: vec![] };
    out.walk(doc);
    out.blocks
}

struct Flattener {
    blocks: Vec<FlatBlock>,
}

impl Flattener {
    fn push(&mut self, block_type: BlockType, content: String, checked: Option<bool>) {
        let order = self.blocks.len() as i64;
        self.blocks.push(FlatBlock {
            block_type,
            content,
            order,
            checked,
        });
    }

    fn walk(&mut self, node: &DocNode) {
        match node.node_type.as_str() {
            "doc" | "bulletList" | "orderedList" | "taskList" => {
                node.content.iter().for_each(|child| self.walk(child));
            }
            "heading" => {
                let level = attr(node, "level").and_then(Value::as_u64).unwrap_or(0);
                self.push(BlockType::heading(level), inline_text(node), None);
            }
            "paragraph" => self.push(BlockType::Paragraph, inline_text(node), None),
            "codeBlock" => self.push(BlockType::CodeBlock, inline_text(node), None),
            "blockquote" => self.push(BlockType::Quote, joined_text(&node.content), None),
            "listItem" | "taskItem" => {
                let (nested, own): (Vec<&DocNode>, Vec<&DocNode>) =
                    node.content.iter().partition(|child| is_list(child));

                let text = own
                    .iter()
                    .map(|child| inline_text(child))
                    .collect::<Vec<_>>()
                    .join("\n");

                if node.node_type == "taskItem" {
                    let checked = attr(node, "checked").and_then(Value::as_bool).unwrap_or(false);
                    self.push(BlockType::Todo, text, Some(checked));
                } else {
                    self.push(BlockType::ListItem, text, None);
                }

                nested.into_iter().for_each(|child| self.walk(child));
            }
            "horizontalRule" => self.push(BlockType::HorizontalRule, String::new(), None),
            "math" => self.push(BlockType::Math, attr_string(node, "latex"), None),
            "twitter" => self.push(BlockType::Twitter, attr_string(node, "src"), None),
            "image" | "youtube" => self.push(BlockType::Text, attr_string(node, "src"), None),
            "text" => self.push(BlockType::Text, node.text.clone().unwrap_or_default(), None),
            _ if node.content.iter().any(is_block) => {
                node.content.iter().for_each(|child| self.walk(child));
            }
            _ => {
                let text = inline_text(node);
                if !text.is_empty() {
                    self.push(BlockType::Text, text, None);
                }
            }
        }
    }
}

fn attr<'a>(node: &'a DocNode, name: &str) -> Option<&'a Value> {
    node.attrs.as_ref().and_then(|attrs| attrs.get(name))
}

fn attr_string(node: &DocNode, name: &str) -> String {
    attr(node, name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn is_list(node: &DocNode) -> bool {
    matches!(
        node.node_type.as_str(),
        "bulletList" | "orderedList" | "taskList"
    )
}

fn is_block(node: &DocNode) -> bool {
    !matches!(node.node_type.as_str(), "text" | "hardBreak" | "mention")
}

/// Concatenated text of all inline descendants.
fn inline_text(node: &DocNode) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &DocNode, out: &mut String) {
    match node.node_type.as_str() {
        "text" => out.push_str(node.text.as_deref().unwrap_or_default()),
        "hardBreak" => out.push('\n'),
        _ => node.content.iter().for_each(|child| collect_text(child, out)),
    }
}

fn joined_text(nodes: &[DocNode]) -> String {
    nodes.iter().map(inline_text).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> DocNode {
        serde_json::from_value(value).unwrap()
    }

    fn text(t: &str) -> Value {
        json!({"type": "text", "text": t})
    }

    #[test]
    fn test_flatten_paragraphs_and_headings() {
        let doc = doc(json!({
            "type": "doc",
            "content": [
                {"type": "heading", "attrs": {"level": 2}, "content": [text("Title")]},
                {"type": "paragraph", "content": [
                    text("Hello "),
                    {"type": "text", "marks": [{"type": "bold"}], "text": "world"}
                ]},
                {"type": "paragraph"}
            ]
        }));

        let blocks = flatten(&doc);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].block_type, BlockType::Heading2);
        assert_eq!(blocks[0].content, "Title");
        assert_eq!(blocks[1].content, "Hello world");
        assert_eq!(blocks[1].order, 1);
        assert_eq!(blocks[2].content, "");
        assert_eq!(blocks[2].order, 2);
    }

    #[test]
    fn test_flatten_task_list_and_nested_lists() {
        let doc = doc(json!({
            "type": "doc",
            "content": [
                {"type": "taskList", "content": [
                    {"type": "taskItem", "attrs": {"checked": true}, "content": [
                        {"type": "paragraph", "content": [text("buy milk")]}
                    ]},
                    {"type": "taskItem", "attrs": {"checked": false}, "content": [
                        {"type": "paragraph", "content": [text("call mom")]}
                    ]}
                ]},
                {"type": "bulletList", "content": [
                    {"type": "listItem", "content": [
                        {"type": "paragraph", "content": [text("outer")]},
                        {"type": "bulletList", "content": [
                            {"type": "listItem", "content": [
                                {"type": "paragraph", "content": [text("inner")]}
                            ]}
                        ]}
                    ]}
                ]}
            ]
        }));

        let blocks = flatten(&doc);
        let summary: Vec<_> = blocks
            .iter()
            .map(|b| (b.block_type, b.content.as_str(), b.checked))
            .collect();
        assert_eq!(
            summary,
            vec![
                (BlockType::Todo, "buy milk", Some(true)),
                (BlockType::Todo, "call mom", Some(false)),
                (BlockType::ListItem, "outer", None),
                (BlockType::ListItem, "inner", None),
            ]
        );
        assert_eq!(
            blocks.iter().map(|b| b.order).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn test_flatten_leaf_nodes() {
        let doc = doc(json!({
            "type": "doc",
            "content": [
                {
                    "type": "codeBlock",
                    "attrs": {"language": "rust"},
                    "content": [text("fn main() {}")]
                },
                {"type": "horizontalRule"},
                {"type": "math", "attrs": {"latex": "e^{i\\pi}"}},
                {"type": "twitter", "attrs": {"src": "https://x.com/a/status/1"}},
                {"type": "blockquote", "content": [
                    {"type": "paragraph", "content": [text("line one")]},
                    {"type": "paragraph", "content": [text("line two")]}
                ]},
                {"type": "paragraph", "content": [text("a"), {"type": "hardBreak"}, text("b")]}
            ]
        }));

        let blocks = flatten(&doc);
        assert_eq!(blocks[0].block_type, BlockType::CodeBlock);
        assert_eq!(blocks[0].content, "fn main() {}");
        assert_eq!(blocks[1].block_type, BlockType::HorizontalRule);
        assert_eq!(blocks[2].content, "e^{i\\pi}");
        assert_eq!(blocks[3].block_type, BlockType::Twitter);
        assert_eq!(blocks[4].block_type, BlockType::Quote);
        assert_eq!(blocks[4].content, "line one\nline two");
        assert_eq!(blocks[5].content, "a\nb");
    }

    #[test]
    fn test_parse_empty_doc() {
        let doc = parse(r#"{"type":"doc","content":[]}"#).unwrap();
        assert!(flatten(&doc).is_empty());
        assert!(parse("not json").is_err());
    }
}
