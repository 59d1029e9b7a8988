//! Reconciles a page's stored blocks with a freshly flattened document.
//!
//! Blocks keep their ids across saves. Matching runs in three passes:
//! 1. identical type and content (the block may have moved; its embedding is reused)
//! 2. same position with edited content (updated in place, re-embedded)
//! 3. everything left over is created or deleted
//!
//! Inserting a paragraph in the middle of a page therefore costs one create and
//! a handful of order-only updates, not a rewrite of every following block.

use std::collections::{HashMap, VecDeque};

use crate::{blocks::Block, blocks::BlockType, document::FlatBlock};

/// Change to an existing block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockChange {
    pub id: u64,
    pub target: FlatBlock,
    /// Text differs from what is stored, so the embedding is stale.
    pub content_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub creates: Vec<FlatBlock>,
    pub updates: Vec<BlockChange>,
    pub deletes: Vec<u64>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

pub fn reconcile(existing: &[Block], desired: &[FlatBlock]) -> SyncPlan {
    let mut existing: Vec<&Block> = existing.iter().collect();
    existing.sort_by_key(|block| (block.order, block.id));

    let mut claimed = vec![false; existing.len()];
    let mut assigned: Vec<Option<usize>> = vec![None; desired.len()];

    // pass 1: same type and text
    let mut by_content: HashMap<(BlockType, &str), VecDeque<usize>> = HashMap::new();
    for (idx, block) in existing.iter().enumerate() {
        by_content
            .entry((block.block_type, block.content.as_str()))
            .or_default()
            .push_back(idx);
    }

    for (d_idx, flat) in desired.iter().enumerate() {
        let Some(candidates) = by_content.get_mut(&(flat.block_type, flat.content.as_str()))
        else {
            continue;
        };

        let pick = candidates
            .iter()
            .position(|&idx| existing[idx].order == flat.order)
            .unwrap_or(0);

        if let Some(idx) = candidates.remove(pick) {
            claimed[idx] = true;
            assigned[d_idx] = Some(idx);
        }
    }

    // pass 2: same position
    let by_order: HashMap<i64, usize> = existing
        .iter()
        .enumerate()
        .filter(|(idx, _)| !claimed[*idx])
        .map(|(idx, block)| (block.order, idx))
        .collect();

    for (d_idx, flat) in desired.iter().enumerate() {
        if assigned[d_idx].is_some() {
            continue;
        }
        if let Some(&idx) = by_order.get(&flat.order) {
            if !claimed[idx] {
                claimed[idx] = true;
                assigned[d_idx] = Some(idx);
            }
        }
    }

    // pass 3: leftovers
    let mut plan = SyncPlan::default();

    for (d_idx, flat) in desired.iter().enumerate() {
        match assigned[d_idx] {
            None => plan.creates.push(flat.clone()),
            Some(idx) => {
                let block = existing[idx];
                let content_changed = block.content != flat.content;
                if content_changed
                    || block.block_type != flat.block_type
                    || block.order != flat.order
                    || block.checked != flat.checked
                {
                    plan.updates.push(BlockChange {
                        id: block.id,
                        target: flat.clone(),
                        content_changed,
                    });
                }
            }
        }
    }

    plan.deletes = existing
        .iter()
        .enumerate()
        .filter(|(idx, _)| !claimed[*idx])
        .map(|(_, block)| block.id)
        .collect();

    plan
}
