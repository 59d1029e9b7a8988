use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    app::errors::AppError,
    blocks::{Block, BlockCreate, BlockUpdate},
    chat::{ChatMessage, ChatProvider, ChatReply, ChatService},
    config::Config,
    document::{self, FlatBlock},
    pages::{build_tree, PageCreate, PageNode, PageUpdate},
    semantic::{content_hash, embedding_input, EmbeddingProvider, Match, SimilaritySearch},
    store::{BlockWrite, DeleteSummary, Embedded, EmbeddingChange, PageStore},
    sync::reconcile,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Blocks whose text was embedded during this save
    pub embedded: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReindexSummary {
    pub embedded: usize,
    pub failed: usize,
}

/// Application facade used by the HTTP handlers and the CLI.
pub struct App {
    config: Config,
    store: Arc<dyn PageStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    search: Arc<SimilaritySearch>,
    chat: ChatService,
    /// Held from reading a page's blocks until the planned writes commit
    page_locks: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
}

impl App {
    pub fn new(
        config: Config,
        store: Arc<dyn PageStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chat_provider: Arc<dyn ChatProvider>,
    ) -> Self {
        let search = Arc::new(SimilaritySearch::new(
            store.clone(),
            embedder.clone(),
            config.search.clone(),
        ));
        let chat = ChatService::new(
            search.clone(),
            store.clone(),
            chat_provider,
            config.chat.clone(),
        );

        Self {
            config,
            store,
            embedder,
            search,
            chat,
            page_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_page(&self, page_id: u64) -> OwnedMutexGuard<()> {
        let lock = self
            .page_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(page_id)
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bearer token to user id.
    pub fn authenticate(&self, token: &str) -> Option<&str> {
        crate::auth::resolve_user(token, &self.config.users)
    }

    // pages

    pub fn list_pages(&self, user: &str) -> Result<Vec<PageNode>, AppError> {
        Ok(build_tree(self.store.list_pages(user)?, None))
    }

    /// A page with its direct children.
    pub fn get_page(&self, user: &str, id: u64) -> Result<PageNode, AppError> {
        let page = self.store.get_page(user, id)?;

        let mut children: Vec<PageNode> = self
            .store
            .list_pages(user)?
            .into_iter()
            .filter(|child| child.parent_id == Some(id))
            .map(|child| PageNode {
                page: child,
                children: vec![],
            })
            .collect();
        children.sort_by_key(|child| (child.page.order, child.page.id));

        Ok(PageNode { page, children })
    }

    /// The page is created empty; its content and blocks are then committed
    /// together.
    pub async fn create_page(
        &self,
        user: &str,
        mut create: PageCreate,
    ) -> Result<PageNode, AppError> {
        let content = create.content.take().filter(|content| !content.is_empty());
        let desired = content.as_deref().map(parse_document).transpose()?;

        let mut page = self.store.create_page(user, create)?;
        log::info!("page {} created for {user}", page.id);

        if let (Some(content), Some(desired)) = (content, desired) {
            let _guard = self.lock_page(page.id).await;
            let (writes, summary) = self.plan_sync(user, page.id, &desired).await?;
            page = self.store.update_page(user, page.id, None, Some(Some(content)), writes)?;
            log::debug!("page {} synced: {summary:?}", page.id);
        }

        Ok(PageNode {
            page,
            children: vec![],
        })
    }

    /// Saves title and/or content. New content is reconciled into blocks;
    /// an empty string clears the page.
    pub async fn update_page(
        &self,
        user: &str,
        id: u64,
        update: PageUpdate,
    ) -> Result<PageNode, AppError> {
        let (content, desired) = match update.content {
            None => (None, None),
            Some(content) if content.is_empty() => (Some(None), Some(vec![])),
            Some(content) => {
                let desired = parse_document(&content)?;
                (Some(Some(content)), Some(desired))
            }
        };

        let guard = self.lock_page(id).await;
        let writes = match desired {
            Some(desired) => {
                let (writes, summary) = self.plan_sync(user, id, &desired).await?;
                log::debug!("page {id} synced: {summary:?}");
                writes
            }
            None => vec![],
        };

        // content and blocks land in one commit
        self.store.update_page(user, id, update.title, content, writes)?;
        drop(guard);

        self.get_page(user, id)
    }

    pub fn move_page(
        &self,
        user: &str,
        id: u64,
        new_parent: Option<u64>,
    ) -> Result<PageNode, AppError> {
        self.store.move_page(user, id, new_parent)?;
        self.get_page(user, id)
    }

    pub fn reorder_page(&self, user: &str, id: u64, new_order: i64) -> Result<PageNode, AppError> {
        self.store.reorder_page(user, id, new_order)?;
        self.get_page(user, id)
    }

    pub fn delete_page(&self, user: &str, id: u64) -> Result<DeleteSummary, AppError> {
        let summary = self.store.delete_page(user, id)?;
        log::info!(
            "page {id} deleted with {} pages and {} blocks",
            summary.pages,
            summary.blocks
        );
        Ok(summary)
    }

    /// Writes that reconcile the page's blocks with `desired`, embedding new
    /// and edited text. Embedding failures leave the block without a vector.
    /// Callers hold the page lock until the writes are applied.
    async fn plan_sync(
        &self,
        user: &str,
        page_id: u64,
        desired: &[FlatBlock],
    ) -> Result<(Vec<BlockWrite>, SyncSummary), AppError> {
        let existing = self.store.blocks(user, page_id)?;
        let plan = reconcile(&existing, desired);
        if plan.is_empty() {
            return Ok((vec![], SyncSummary::default()));
        }

        let mut summary = SyncSummary {
            created: plan.creates.len(),
            updated: plan.updates.len(),
            deleted: plan.deletes.len(),
            embedded: 0,
        };

        let mut writes: Vec<BlockWrite> =
            plan.deletes.into_iter().map(BlockWrite::Delete).collect();

        for change in plan.updates {
            let embedding = if change.content_changed {
                match self.embed_content(&change.target.content).await {
                    Some(embedded) => {
                        summary.embedded += 1;
                        EmbeddingChange::Set(embedded)
                    }
                    None => EmbeddingChange::Clear,
                }
            } else {
                EmbeddingChange::Keep
            };

            writes.push(BlockWrite::Update {
                id: change.id,
                fields: change.target,
                embedding,
            });
        }

        for fields in plan.creates {
            let embedding = self.embed_content(&fields.content).await;
            summary.embedded += usize::from(embedding.is_some());
            writes.push(BlockWrite::Create { fields, embedding });
        }

        Ok((writes, summary))
    }

    /// `None` for blank text or when the provider fails.
    async fn embed_content(&self, content: &str) -> Option<Embedded> {
        let input = embedding_input(content)?;

        match self.embedder.embed(&input).await {
            Ok(vector) => Some(Embedded {
                vector,
                hash: content_hash(content),
            }),
            Err(err) => {
                log::warn!("storing block without embedding: {err}");
                None
            }
        }
    }

    // blocks

    pub fn list_blocks(&self, user: &str, page_id: u64) -> Result<Vec<Block>, AppError> {
        Ok(self.store.blocks(user, page_id)?)
    }

    /// Creates a block, or replaces the one already at the same position.
    /// Without an explicit order the block is appended.
    pub async fn create_block(&self, user: &str, create: BlockCreate) -> Result<Block, AppError> {
        if create.content.trim().is_empty() {
            return Err(AppError::Validation("content is required".to_string()));
        }
        let page_id = create
            .page_id
            .ok_or_else(|| AppError::Validation("pageId is required".to_string()))?;

        let _guard = self.lock_page(page_id).await;
        let existing = self.store.blocks(user, page_id)?;
        let order = match create.order {
            Some(order) => order,
            None => match existing.iter().map(|block| block.order).max() {
                Some(last) => last.checked_add(1).ok_or_else(|| {
                    AppError::Validation("no block order left after the last block".to_string())
                })?,
                None => 0,
            },
        };

        let fields = FlatBlock {
            block_type: create.block_type.unwrap_or_default(),
            content: create.content,
            order,
            checked: create.checked,
        };
        let embedding = self.embed_content(&fields.content).await;

        let write = match existing.iter().find(|block| block.order == order) {
            Some(block) => BlockWrite::Update {
                id: block.id,
                fields,
                embedding: embedding.map_or(EmbeddingChange::Clear, EmbeddingChange::Set),
            },
            None => BlockWrite::Create { fields, embedding },
        };

        let blocks = self.store.apply_block_writes(user, page_id, vec![write])?;
        find_at(blocks, order)
    }

    pub async fn update_block(
        &self,
        user: &str,
        id: u64,
        update: BlockUpdate,
    ) -> Result<Block, AppError> {
        if update.is_empty() {
            return Err(AppError::Validation("nothing to update".to_string()));
        }

        let page_id = self.store.get_block(user, id)?.page_id;
        let _guard = self.lock_page(page_id).await;
        let block = self.store.get_block(user, id)?;
        let content_changed = update
            .content
            .as_ref()
            .is_some_and(|content| *content != block.content);

        let fields = FlatBlock {
            block_type: update.block_type.unwrap_or(block.block_type),
            content: update.content.unwrap_or(block.content),
            order: update.order.unwrap_or(block.order),
            checked: update.checked.or(block.checked),
        };

        let embedding = if content_changed {
            self.embed_content(&fields.content)
                .await
                .map_or(EmbeddingChange::Clear, EmbeddingChange::Set)
        } else {
            EmbeddingChange::Keep
        };

        let order = fields.order;
        let blocks = self.store.apply_block_writes(
            user,
            block.page_id,
            vec![BlockWrite::Update {
                id,
                fields,
                embedding,
            }],
        )?;
        find_at(blocks, order)
    }

    pub fn delete_block(&self, user: &str, id: u64) -> Result<(), AppError> {
        let block = self.store.get_block(user, id)?;
        self.store
            .apply_block_writes(user, block.page_id, vec![BlockWrite::Delete(id)])?;
        Ok(())
    }

    // retrieval

    pub async fn search(&self, user: &str, query: &str) -> Result<Vec<Match>, AppError> {
        Ok(self.search.search(user, query).await?)
    }

    pub async fn chat(&self, user: &str, history: Vec<ChatMessage>) -> Result<ChatReply, AppError> {
        Ok(self.chat.respond(user, history).await?)
    }

    /// Embeds blocks whose vector is missing or older than their text.
    pub async fn reindex(&self, page_id: Option<u64>) -> Result<ReindexSummary, AppError> {
        let stale = self.store.stale_blocks(page_id)?;
        log::info!("reindexing {} blocks", stale.len());

        let mut summary = ReindexSummary::default();
        for block in stale {
            let Some(input) = embedding_input(&block.content) else {
                continue;
            };

            match self.embedder.embed(&input).await {
                Ok(vector) => {
                    let embedded = Embedded {
                        vector,
                        hash: content_hash(&block.content),
                    };
                    // false if the block was edited meanwhile
                    if self.store.set_embedding(block.id, embedded)? {
                        summary.embedded += 1;
                    }
                }
                Err(err) => {
                    log::warn!("block {}: {err}", block.id);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

fn parse_document(content: &str) -> Result<Vec<FlatBlock>, AppError> {
    let doc = document::parse(content)
        .map_err(|e| AppError::Validation(format!("content is not a valid document: {e}")))?;
    Ok(document::flatten(&doc))
}

fn find_at(blocks: Vec<Block>, order: i64) -> Result<Block, AppError> {
    blocks
        .into_iter()
        .find(|block| block.order == order)
        .ok_or_else(|| AppError::Other(anyhow::anyhow!("block at order {order} vanished")))
}
