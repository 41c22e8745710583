//! # Chat module
//!
//! [`ChatSession`] ties the pieces together for one conversation:
//!
//! 1. retrieve the closest chunks from the knowledge base, if any;
//! 2. assemble the prompt (system prompt, personality examples, retrieved
//!    context, as much recent memory as fits the budget, the user turn);
//! 3. ask the model, or answer offline when it cannot be reached;
//! 4. record the exchange in memory, the transcript and the session store.

use async_openai::{Client, config::OpenAIConfig, types::chat::ChatCompletionRequestMessage};
use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};

use crate::api;
use crate::config::ParleyConfig;
use crate::documents::{self, Document};
use crate::embeddings::{self, Embedder};
use crate::error::{ParleyError, Result};
use crate::fallback;
use crate::memory::{ConversationMemory, Role, Turn, count_tokens};
use crate::personality::{self, Personality};
use crate::session_store::SessionStore;
use crate::splitter::TextSplitter;
use crate::transcript::{ExportFormat, Transcript};
use crate::vector_store::{DocumentSummary, KnowledgeBase, RetrievedChunk};

const CONTEXT_PREAMBLE: &str = "Use the following excerpts from the user's documents when they \
help answer the next question. If they are not relevant, answer from general knowledge and do \
not mention them.";

/// Per-message overhead of the chat format, in tokens.
const MESSAGE_OVERHEAD: usize = 4;

/// The answer to one question.
#[derive(Debug, Clone)]
pub struct Reply {
    pub content: String,
    /// Chunks that were placed in the prompt, best first.
    pub sources: Vec<RetrievedChunk>,
    /// `true` when the reply was produced offline.
    pub fallback: bool,
}

pub struct ChatSession {
    config: ParleyConfig,
    personality: Personality,
    personalities_dir: Option<PathBuf>,
    memory: ConversationMemory,
    transcript: Transcript,
    knowledge: Option<KnowledgeBase>,
    knowledge_path: Option<PathBuf>,
    embedder: Option<Arc<dyn Embedder>>,
    store: Option<SessionStore>,
    client: Client<OpenAIConfig>,
    offline: bool,
    show_progress: bool,
}

impl ChatSession {
    /// Start an unsaved session.
    ///
    /// Without an API key the session runs offline when fallback is enabled
    /// and refuses to start otherwise.
    pub fn new(config: ParleyConfig, personality: Personality) -> Result<Self> {
        config.validate()?;

        let offline = !config.has_api_key();
        if offline {
            if !config.fallback_enabled {
                return Err(ParleyError::Config(
                    "no API key found; set PARLEY_API_KEY or OPENAI_API_KEY, or enable fallback_enabled"
                        .into(),
                ));
            }
            warn!("No API key configured, answering in offline mode");
        }

        let client = api::create_client(&config);
        let memory = ConversationMemory::new(config.prompt_budget());
        let transcript = Transcript::new(config.session_name.clone(), personality.name.clone());

        Ok(Self {
            config,
            personality,
            personalities_dir: None,
            memory,
            transcript,
            knowledge: None,
            knowledge_path: None,
            embedder: None,
            store: None,
            client,
            offline,
            show_progress: false,
        })
    }

    /// Where `/personality <name>` looks for personality files.
    pub fn with_personalities_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.personalities_dir = Some(dir.into());
        self
    }

    /// Persist the session in `store`, resuming whatever it already holds.
    ///
    /// Offline replies are restored into the transcript but kept out of the
    /// memory sent to the model.
    pub fn with_store(mut self, mut store: SessionStore) -> Result<Self> {
        let mut transcript = store.transcript()?;
        transcript.personality = self.personality.name.clone();

        self.memory.clear();
        for entry in transcript.messages.iter().filter(|e| !e.fallback) {
            self.memory.push(Turn::new(entry.role, entry.content.clone()));
        }

        if !transcript.is_empty() {
            info!(
                "Resumed session {} with {} messages",
                store.session_name(),
                transcript.len()
            );
        }
        self.transcript = transcript;
        self.store = Some(store);
        Ok(self)
    }

    /// Keep the knowledge base at `path`, loading it when it exists.
    pub fn with_knowledge_path(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            let knowledge = KnowledgeBase::load(&path)?;
            info!(
                "Loaded {} chunks from {} documents",
                knowledge.len(),
                knowledge.documents().len()
            );
            self.knowledge = Some(knowledge);
        }
        self.knowledge_path = Some(path);
        Ok(self)
    }

    /// Use `embedder` instead of the configured backend.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Show a progress bar while embedding documents.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &ParleyConfig {
        &self.config
    }

    pub fn personality(&self) -> &Personality {
        &self.personality
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn personalities_dir(&self) -> Option<&Path> {
        self.personalities_dir.as_deref()
    }

    pub fn session_name(&self) -> Option<&str> {
        self.store.as_ref().map(|s| s.session_name())
    }

    /// `true` when no API key is configured and replies are generated offline.
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Ask `question`.
    ///
    /// `on_delta` receives the reply as it arrives: streamed replies piece by
    /// piece, everything else in one call.
    pub async fn send<F>(&mut self, question: &str, mut on_delta: F) -> Result<Reply>
    where
        F: FnMut(&str),
    {
        let question = question.trim();
        if question.is_empty() {
            return Err(ParleyError::EmptyInput);
        }

        let retrieved = self.retrieve(question)?;
        let user_turn = Turn::new(Role::User, self.personality.decorate(question));
        let (messages, sources) = self.prompt_messages(retrieved, &user_turn);
        debug!(
            "Prompt has {} messages and {} retrieved chunks",
            messages.len(),
            sources.len()
        );

        let (content, fallback) = if self.offline {
            (fallback::generic_response(question, &self.personality), true)
        } else {
            match self.request(messages, &mut on_delta).await {
                Ok(content) => (content, false),
                Err(ParleyError::Api(err))
                    if self.config.fallback_enabled && fallback::is_unreachable(&err) =>
                {
                    warn!("API unreachable, answering offline: {err}");
                    (fallback::generic_response(question, &self.personality), true)
                }
                Err(err) => return Err(err),
            }
        };
        if fallback {
            on_delta(&content);
        }

        self.record(question, &content, fallback)?;
        Ok(Reply {
            content,
            sources,
            fallback,
        })
    }

    async fn request<F>(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        on_delta: &mut F,
    ) -> Result<String>
    where
        F: FnMut(&str),
    {
        let stream = self.config.should_stream;
        let request = api::build_request(&self.config, &self.personality, messages, stream)?;
        if stream {
            Ok(api::stream_response(&self.client, request, on_delta).await?)
        } else {
            let content = api::fetch_response(&self.client, request).await?;
            on_delta(&content);
            Ok(content)
        }
    }

    fn record(&mut self, question: &str, answer: &str, fallback: bool) -> Result<()> {
        let user = Turn::new(Role::User, question.to_string());
        let assistant = Turn::new(Role::Assistant, answer.to_string());

        self.transcript.push(Role::User, user.content.clone());
        if fallback {
            self.transcript.push_fallback(assistant.content.clone());
        } else {
            self.transcript.push(Role::Assistant, assistant.content.clone());
        }

        if let Some(store) = self.store.as_mut() {
            store.append(&user, false)?;
            store.append(&assistant, fallback)?;
        }

        self.memory.push(user);
        if !fallback {
            self.memory.push(assistant);
        }
        Ok(())
    }

    /// Assemble the request messages within the prompt budget.
    ///
    /// The system prompt, examples and the user turn always go in. Retrieved
    /// chunks are dropped from the worst up until they fit, and the remaining
    /// room is filled with the most recent memory.
    fn prompt_messages(
        &self,
        mut retrieved: Vec<RetrievedChunk>,
        user_turn: &Turn,
    ) -> (Vec<ChatCompletionRequestMessage>, Vec<RetrievedChunk>) {
        let budget = self.config.prompt_budget();

        let mut head = vec![Turn::new(Role::System, self.personality.system_prompt.clone())];
        head.extend(self.personality.examples.iter().cloned());
        let fixed = tokens_of(&head) + user_turn.token_count() + MESSAGE_OVERHEAD;

        let mut context = context_turn(&retrieved);
        while let Some(turn) = &context {
            if fixed + turn.token_count() + MESSAGE_OVERHEAD <= budget {
                break;
            }
            retrieved.pop();
            context = context_turn(&retrieved);
        }
        if let Some(turn) = context {
            head.push(turn);
        }

        let used = tokens_of(&head) + user_turn.token_count() + MESSAGE_OVERHEAD;
        let history = recent_history(self.memory.turns(), budget.saturating_sub(used));

        let messages = head
            .iter()
            .chain(history.iter().copied())
            .chain(std::iter::once(user_turn))
            .map(Turn::to_request_message)
            .collect();
        (messages, retrieved)
    }

    fn embedder(&mut self) -> Result<Arc<dyn Embedder>> {
        if let Some(embedder) = &self.embedder {
            return Ok(embedder.clone());
        }
        let embedder = embeddings::from_backend(self.config.retrieval.embedding_backend)?;
        self.embedder = Some(embedder.clone());
        Ok(embedder)
    }

    fn retrieve(&mut self, question: &str) -> Result<Vec<RetrievedChunk>> {
        if self.knowledge.as_ref().is_none_or(KnowledgeBase::is_empty) {
            return Ok(Vec::new());
        }
        let embedder = self.embedder()?;
        let top_k = self.config.retrieval.top_k;
        match &self.knowledge {
            Some(knowledge) => knowledge.search(question, embedder.as_ref(), top_k),
            None => Ok(Vec::new()),
        }
    }

    /// Load, chunk and index the file at `path`.
    pub fn ingest(&mut self, path: &Path) -> Result<usize> {
        let document = documents::load_document(path)?;
        self.ingest_document(&document)
    }

    /// Chunk and index `document`, saving the knowledge base when it has a path.
    pub fn ingest_document(&mut self, document: &Document) -> Result<usize> {
        let embedder = self.embedder()?;
        let splitter = TextSplitter::from_config(&self.config.retrieval)?;
        // an emptied knowledge base can switch embedders
        if self
            .knowledge
            .as_ref()
            .is_some_and(|kb| kb.is_empty() && kb.check_embedder(embedder.as_ref()).is_err())
        {
            self.knowledge = None;
        }
        let knowledge = self
            .knowledge
            .get_or_insert_with(|| KnowledgeBase::for_embedder(embedder.as_ref()));

        let added = knowledge.add_document(document, embedder.as_ref(), &splitter, self.show_progress)?;
        if added > 0 {
            if let Some(path) = &self.knowledge_path {
                knowledge.save(path)?;
            }
        }
        Ok(added)
    }

    /// Indexed documents, by source.
    pub fn documents(&self) -> Vec<DocumentSummary> {
        self.knowledge
            .as_ref()
            .map(KnowledgeBase::documents)
            .unwrap_or_default()
    }

    /// Forget the conversation: memory, transcript and stored messages.
    ///
    /// Indexed documents stay; see [`ChatSession::clear_documents`].
    pub fn clear(&mut self) -> Result<usize> {
        let cleared = self.transcript.len();
        self.memory.clear();
        self.transcript.clear();
        if let Some(store) = self.store.as_mut() {
            store.clear()?;
        }
        info!("Cleared {cleared} messages");
        Ok(cleared)
    }

    /// Remove every indexed document.
    pub fn clear_documents(&mut self) -> Result<()> {
        if let Some(knowledge) = self.knowledge.as_mut() {
            knowledge.remove_all();
            if let Some(path) = &self.knowledge_path {
                knowledge.save(path)?;
            }
        }
        Ok(())
    }

    /// Switch to the personality called `name`. Memory is kept.
    pub fn set_personality(&mut self, name: &str) -> Result<&Personality> {
        let personality = personality::find(name, self.personalities_dir.as_deref())?;
        info!("Switched personality to {}", personality.name);
        self.transcript.personality = personality.name.clone();
        self.personality = personality;
        Ok(&self.personality)
    }

    /// Write the transcript; see [`Transcript::write_export`].
    pub fn export(&self, format: ExportFormat, target: Option<&Path>) -> Result<PathBuf> {
        self.transcript.write_export(format, target)
    }
}

fn tokens_of(turns: &[Turn]) -> usize {
    turns
        .iter()
        .map(|t| t.token_count() + MESSAGE_OVERHEAD)
        .sum()
}

fn context_turn(retrieved: &[RetrievedChunk]) -> Option<Turn> {
    if retrieved.is_empty() {
        return None;
    }
    let mut content = String::from(CONTEXT_PREAMBLE);
    for (i, chunk) in retrieved.iter().enumerate() {
        let _ = write!(
            content,
            "\n\n[{}] {} (part {}):\n{}",
            i + 1,
            chunk.source,
            chunk.chunk_index + 1,
            chunk.text
        );
    }
    Some(Turn::new(Role::System, content))
}

/// The newest turns whose combined size stays within `budget`, oldest first.
fn recent_history<'a>(turns: impl DoubleEndedIterator<Item = &'a Turn>, budget: usize) -> Vec<&'a Turn> {
    let mut used = 0;
    let mut picked: Vec<&Turn> = turns
        .rev()
        .take_while(|turn| {
            used += count_tokens(&turn.content) + MESSAGE_OVERHEAD;
            used <= budget
        })
        .collect();
    picked.reverse();
    picked
}
