use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::StreamExt;

use crate::{
    config::ChatConfig,
    eid::Eid,
    semantic::{ContextAssembler, Match, SimilaritySearch},
    store::PageStore,
};

use super::{
    build_prompt, ChatError, ChatMessage, ChatProvider, CompletionRequest, TokenStream,
};

/// Progress of one chat turn. Any stage may end in `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStage {
    ReceiveMessage,
    Embed,
    Search,
    AssembleContext,
    BuildPrompt,
    StreamCompletion,
    Done,
    Error,
}

struct Turn {
    id: Eid,
    stage: ChatStage,
}

impl Turn {
    fn start(user: &str) -> Self {
        let turn = Self {
            id: Eid::new(),
            stage: ChatStage::ReceiveMessage,
        };
        log::debug!("chat {} for {user}: {:?}", turn.id, turn.stage);
        turn
    }

    fn advance(&mut self, stage: ChatStage) {
        log::debug!("chat {}: {:?} -> {:?}", self.id, self.stage, stage);
        self.stage = stage;
    }

    fn fail(&mut self, err: ChatError) -> ChatError {
        log::warn!("chat {} failed during {:?}: {err}", self.id, self.stage);
        self.stage = ChatStage::Error;
        err
    }
}

pub struct ChatReply {
    pub turn_id: Eid,
    pub matches: Vec<Match>,
    pub tokens: TokenStream,
}

pub struct ChatService {
    search: Arc<SimilaritySearch>,
    assembler: ContextAssembler,
    provider: Arc<dyn ChatProvider>,
    store: Arc<dyn PageStore>,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(
        search: Arc<SimilaritySearch>,
        store: Arc<dyn PageStore>,
        provider: Arc<dyn ChatProvider>,
        config: ChatConfig,
    ) -> Self {
        let assembler = ContextAssembler::new(store.clone(), search.config().clone());
        Self {
            search,
            assembler,
            provider,
            store,
            config,
        }
    }

    /// Runs retrieval for the last message of `history` and starts the
    /// completion. Errors before the first token are returned here; later
    /// ones arrive on the token stream.
    ///
    /// Usage counters of the matched blocks are updated once the stream has
    /// been consumed without error.
    pub async fn respond(
        &self,
        user: &str,
        history: Vec<ChatMessage>,
    ) -> Result<ChatReply, ChatError> {
        let mut turn = Turn::start(user);

        let question = match history.last() {
            Some(message) => message.content.clone(),
            None => return Err(turn.fail(ChatError::NoMessages)),
        };
        if question.trim().is_empty() {
            return Err(turn.fail(ChatError::EmptyMessage));
        }

        turn.advance(ChatStage::Embed);
        let query = self
            .search
            .embed_query(&question)
            .await
            .map_err(|e| turn.fail(e.into()))?;

        turn.advance(ChatStage::Search);
        let matches = self
            .search
            .search_with_vector(user, &question, &query)
            .map_err(|e| turn.fail(e.into()))?;

        turn.advance(ChatStage::AssembleContext);
        let context = self
            .assembler
            .assemble(&matches)
            .map_err(|e| turn.fail(e.into()))?;

        turn.advance(ChatStage::BuildPrompt);
        let messages = build_prompt(&context, &history).map_err(|e| turn.fail(e))?;

        turn.advance(ChatStage::StreamCompletion);
        let tokens = self
            .provider
            .stream(CompletionRequest {
                model: self.config.model.clone(),
                messages,
                temperature: self.config.temperature,
            })
            .await
            .map_err(|e| turn.fail(e))?;

        let turn_id = turn.id.clone();
        let tokens = self.with_bookkeeping(turn, &matches, tokens);

        Ok(ChatReply {
            turn_id,
            matches,
            tokens,
        })
    }

    fn with_bookkeeping(&self, turn: Turn, matches: &[Match], tokens: TokenStream) -> TokenStream {
        let usage: Vec<(u64, f32)> = matches.iter().map(|m| (m.block_id, m.similarity)).collect();
        let store = self.store.clone();

        let failed = Arc::new(AtomicBool::new(false));
        let seen = failed.clone();
        let turn_id = turn.id.clone();

        let tokens = tokens.inspect(move |item| {
            if let Err(err) = item {
                log::warn!("chat {turn_id}: stream aborted: {err}");
                seen.store(true, Ordering::Relaxed);
            }
        });

        let tail = futures::stream::once(async move {
            let mut turn = turn;
            if failed.load(Ordering::Relaxed) {
                turn.advance(ChatStage::Error);
                return;
            }

            match store.record_usage(&usage) {
                Ok(updated) => log::debug!("chat {}: usage recorded for {updated} blocks", turn.id),
                Err(err) => log::warn!("chat {}: failed to record usage: {err}", turn.id),
            }
            turn.advance(ChatStage::Done);
        })
        .filter_map(|()| futures::future::ready(None::<Result<String, ChatError>>));

        tokens.chain(tail).boxed()
    }
}
