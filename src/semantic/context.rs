//! Expands matches with their surrounding blocks and renders the prompt
//! context.

use std::sync::Arc;

use crate::{
    config::SearchConfig,
    store::{PageStore, StoreError},
};

use super::service::Match;

const PREVIOUS_LABEL: &str = "前文脈: ";
const CONTENT_LABEL: &str = "内容: ";
const NEXT_LABEL: &str = "後文脈: ";

pub struct ContextAssembler {
    store: Arc<dyn PageStore>,
    config: SearchConfig,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn PageStore>, config: SearchConfig) -> Self {
        Self { store, config }
    }

    /// Matches at or above the search threshold get up to `context_window`
    /// blocks on each side from the same page. Weaker matches render alone.
    pub fn assemble(&self, matches: &[Match]) -> Result<String, StoreError> {
        let mut sections = Vec::with_capacity(matches.len());

        for m in matches {
            let mut lines = Vec::new();

            if m.similarity >= self.config.threshold {
                let (previous, next) =
                    self.store.neighbors(m.page_id, m.order, self.config.context_window)?;

                lines.extend(previous.iter().map(|b| format!("{PREVIOUS_LABEL}{}", b.content)));
                lines.push(format!("{CONTENT_LABEL}{}", m.content));
                lines.extend(next.iter().map(|b| format!("{NEXT_LABEL}{}", b.content)));
            } else {
                lines.push(format!("{CONTENT_LABEL}{}", m.content));
            }

            sections.push(lines.join("\n"));
        }

        Ok(sections.join("\n\n"))
    }
}
