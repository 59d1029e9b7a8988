use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const UNTITLED: &str = "Untitled";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: u64,
    pub user_id: String,
    pub title: String,
    /// Serialized editor document
    pub content: Option<String>,
    pub parent_id: Option<u64>,
    pub order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A page with its subtree, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageNode {
    #[serde(flatten)]
    pub page: Page,
    pub children: Vec<PageNode>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCreate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// An empty string clears the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

pub fn normalize_title(title: &str) -> String {
    let title = title.trim();
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title.to_string()
    }
}

/// Arrange a user's pages into trees rooted at `root`'s children
/// (`None` for top-level pages). Siblings are sorted by `order`, then id.
pub fn build_tree(pages: Vec<Page>, root: Option<u64>) -> Vec<PageNode> {
    let mut by_parent: HashMap<Option<u64>, Vec<Page>> = HashMap::new();
    for page in pages {
        by_parent.entry(page.parent_id).or_default().push(page);
    }

    fn attach(
        parent: Option<u64>,
        by_parent: &mut HashMap<Option<u64>, Vec<Page>>,
    ) -> Vec<PageNode> {
        let mut siblings = by_parent.remove(&parent).unwrap_or_default();
        siblings.sort_by_key(|page| (page.order, page.id));
        siblings
            .into_iter()
            .map(|page| {
                let children = attach(Some(page.id), by_parent);
                PageNode { page, children }
            })
            .collect()
    }

    attach(root, &mut by_parent)
}
