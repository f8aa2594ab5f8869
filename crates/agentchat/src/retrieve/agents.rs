//! Retrieval-augmented agent pair
//!
//! The proxy answers a problem by sending the assistant a prompt built from
//! the documents closest to the problem. When the assistant replies
//! `UPDATE CONTEXT`, the proxy restarts the conversation with the next
//! unused documents, or sends `TERMINATE` once none are left.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use llm_core::ChatBackend;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::chunking::{collect_files, split_files_to_chunks, DocChunk};
use super::config::RetrieveConfig;
use super::embedding::EmbeddingFunction;
use super::store::{Collection, QueryHit, StoredChunk, VectorStore};
use super::tokenizer::Tokenizer;
use crate::agent::{AgentConfig, ConversableAgent, HandlerOutcome, ReplyContext, ReplyHandler};
use crate::chat::{self, ChatOptions, ChatResult};
use crate::termination::{asks_for_context_update, predicate, retrieve_chat_terminate, TERMINATE, UPDATE_CONTEXT};

const EMBED_BATCH_SIZE: usize = 32;

/// Rounds of wider queries tried before giving up on new context
const MAX_REQUERY_ROUNDS: usize = 4;

/// Marker the assistant looks for in code-execution output
const EXECUTION_SUCCEEDED: &str = "exitcode: 0 (";

pub const PROMPT_DEFAULT: &str = "You're a retrieval augmented chatbot. You answer the user's questions based on your own knowledge and the
context provided by the user. Follow these steps to answer a question:
Step 1, estimate the user's intent from the question and the context. The intent is either a code generation task or
a question answering task.
Step 2, reply based on the intent.
If you can't answer the question with or without the current context, reply exactly `UPDATE CONTEXT`.
If the intent is code generation, you must obey the following rules:
Rule 1. You MUST NOT install any packages because all the packages needed are already installed.
Rule 2. You must write your code in this format:
```language
# your code
```

If the intent is question answering, give as short an answer as possible.

User's question is: {input_question}

Context is: {input_context}
";

pub const DEFAULT_RETRIEVE_ASSISTANT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

/// Warning logged when the proxy has to rely on an existing collection
pub fn missing_docs_path_warning(collection: &str) -> String {
    format!(
        "docs_path is not provided in retrieve_config. Will raise ValueError if the collection `{}` doesn't exist.",
        collection
    )
}

/// Document retrieval state for one proxy
pub struct Retriever {
    config: RetrieveConfig,
    embedder: Box<dyn EmbeddingFunction>,
    tokenizer: Tokenizer,
    collection: Option<Collection>,
    problem: String,
    search_string: Option<String>,
    n_results: usize,
    results: Vec<QueryHit>,
    used_ids: HashSet<String>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("config", &self.config)
            .field("embedder", &self.embedder.name())
            .field("results", &self.results.len())
            .field("used", &self.used_ids.len())
            .finish()
    }
}

impl Retriever {
    pub fn new(config: RetrieveConfig, embedder: Box<dyn EmbeddingFunction>) -> Self {
        if config.docs_path.is_none() {
            warn!("{}", missing_docs_path_warning(&config.collection_name));
        }

        let tokenizer = Tokenizer::new(&config.model);
        let n_results = config.n_results;
        Self {
            config,
            embedder,
            tokenizer,
            collection: None,
            problem: String::new(),
            search_string: None,
            n_results,
            results: Vec::new(),
            used_ids: HashSet::new(),
        }
    }

    pub fn config(&self) -> &RetrieveConfig {
        &self.config
    }

    /// Load the collection, building it from `docs_path` first when one is
    /// configured. Returns the number of stored chunks.
    pub fn index(&mut self) -> Result<usize> {
        if let Some(collection) = &self.collection {
            return Ok(collection.len());
        }

        let store = VectorStore::open(&self.config.db_path)?;
        let collection = match &self.config.docs_path {
            Some(docs_path) => self.build_collection(&store, docs_path)?,
            None => store.get_collection(&self.config.collection_name)?,
        };

        if collection.embedding_function != self.embedder.name() {
            warn!(
                collection = %collection.name,
                stored = %collection.embedding_function,
                current = %self.embedder.name(),
                "Collection was built with a different embedding function"
            );
        }

        let len = collection.len();
        self.collection = Some(collection);
        Ok(len)
    }

    fn build_collection(&self, store: &VectorStore, docs_path: &Path) -> Result<Collection> {
        let mut collection = store.create_collection(
            &self.config.collection_name,
            self.embedder.name(),
            self.config.get_or_create,
        )?;

        let files = collect_files(docs_path)?;
        let chunks = split_files_to_chunks(&files, self.config.chunk_token_size, &self.tokenizer)?;

        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
            let embeddings = self.embedder.embed(&texts)?;
            if embeddings.len() != batch.len() {
                bail!(
                    "Embedding function returned {} vectors for {} chunks",
                    embeddings.len(),
                    batch.len()
                );
            }

            collection.upsert(
                batch
                    .iter()
                    .zip(embeddings)
                    .map(|(chunk, embedding)| StoredChunk {
                        id: chunk_id(chunk),
                        source: chunk.source.display().to_string(),
                        content: chunk.content.clone(),
                        embedding,
                    })
                    .collect(),
            );
        }

        store.save(&collection)?;
        info!(
            collection = %collection.name,
            files = files.len(),
            chunks = collection.len(),
            "Indexed documents"
        );
        Ok(collection)
    }

    fn collection(&mut self) -> Result<&Collection> {
        self.index()?;
        self.collection
            .as_ref()
            .ok_or_else(|| anyhow!("Collection `{}` is not loaded", self.config.collection_name))
    }

    /// Query the collection for the documents closest to `problem`
    pub fn retrieve_docs(&mut self, problem: &str, n_results: usize, search_string: Option<&str>) -> Result<()> {
        let query = self
            .embedder
            .embed(&[problem])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Embedding function returned no vector"))?;

        let hits = self.collection()?.query(&query, n_results, search_string);
        debug!(hits = hits.len(), n_results, "Retrieved documents");
        self.results = hits;
        Ok(())
    }

    /// Unused documents from the latest results that fit the context budget
    fn next_context(&mut self) -> String {
        let budget = self.config.context_budget();
        let mut used_tokens = 0;
        let mut context = String::new();

        for hit in &self.results {
            if self.used_ids.contains(&hit.id) {
                continue;
            }

            let tokens = self.tokenizer.count_tokens(&hit.content);
            if tokens > budget {
                info!(doc_id = %hit.id, tokens, budget, "Skipping document too long for the context");
                self.used_ids.insert(hit.id.clone());
                continue;
            }
            if used_tokens + tokens > budget {
                break;
            }

            info!(doc_id = %hit.id, source = %hit.source, "Adding document to context");
            used_tokens += tokens;
            context.push_str(&hit.content);
            context.push('\n');
            self.used_ids.insert(hit.id.clone());
        }

        context
    }

    fn render_prompt(&self, context: &str) -> String {
        if context.is_empty() {
            info!("No more context, terminating");
            return TERMINATE.to_string();
        }

        self.config
            .customized_prompt
            .as_deref()
            .unwrap_or(PROMPT_DEFAULT)
            .replace("{input_question}", &self.problem)
            .replace("{input_context}", context)
    }

    /// First message of a retrieval chat
    pub fn generate_init_message(
        &mut self,
        problem: &str,
        n_results: usize,
        search_string: Option<&str>,
    ) -> Result<String> {
        self.used_ids.clear();
        self.results.clear();
        self.problem = problem.to_string();
        self.n_results = n_results;
        self.search_string = search_string.map(str::to_string);

        self.retrieve_docs(problem, n_results, search_string)?;
        let context = self.next_context();
        Ok(self.render_prompt(&context))
    }

    /// Prompt with the next unused documents, widening the query when the
    /// current results are exhausted; `TERMINATE` when nothing new is found.
    pub fn update_context(&mut self) -> Result<String> {
        let mut context = self.next_context();

        let mut round = 1;
        while context.is_empty() && round <= MAX_REQUERY_ROUNDS {
            let n_results = self.n_results * (2 * round + 1);
            let problem = self.problem.clone();
            let search_string = self.search_string.clone();
            self.retrieve_docs(&problem, n_results, search_string.as_deref())?;
            context = self.next_context();
            round += 1;
        }

        Ok(self.render_prompt(&context))
    }
}

fn chunk_id(chunk: &DocChunk) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chunk.source.to_string_lossy().as_bytes());
    hasher.update(b"\n");
    hasher.update(chunk.content.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("doc_{}", &digest[..16])
}

/// Answers `UPDATE CONTEXT` with a fresh prompt
struct RetrieveContextHandler {
    retriever: Arc<Mutex<Retriever>>,
}

#[async_trait]
impl ReplyHandler for RetrieveContextHandler {
    fn name(&self) -> &str {
        "retrieve_context"
    }

    async fn generate(&self, ctx: ReplyContext<'_>) -> Result<HandlerOutcome> {
        let Some(last) = ctx.last_message() else {
            return Ok(HandlerOutcome::Pass);
        };
        if !asks_for_context_update(last.text()) {
            return Ok(HandlerOutcome::Pass);
        }

        let message = {
            let mut retriever = self.retriever.lock();
            if !retriever.config().update_context {
                return Ok(HandlerOutcome::Pass);
            }
            info!(agent = %ctx.agent, "Updating context and resetting conversation");
            retriever.update_context()?
        };
        Ok(HandlerOutcome::Restart(message))
    }
}

/// Proxy agent that opens chats with retrieved context
pub struct RetrieveUserProxyAgent {
    agent: ConversableAgent,
    retriever: Arc<Mutex<Retriever>>,
}

impl RetrieveUserProxyAgent {
    pub fn new(config: AgentConfig, retrieve: RetrieveConfig, embedder: Box<dyn EmbeddingFunction>) -> Self {
        let retriever = Arc::new(Mutex::new(Retriever::new(retrieve, embedder)));

        let mut agent = ConversableAgent::new(config).with_termination(predicate(retrieve_chat_terminate));
        agent.register_reply(Box::new(RetrieveContextHandler {
            retriever: retriever.clone(),
        }));

        Self { agent, retriever }
    }

    /// Build or load the collection ahead of the first chat
    pub fn index(&self) -> Result<usize> {
        self.retriever.lock().index()
    }

    /// Retrieve context for `problem` and chat with `assistant` about it
    pub async fn initiate_chat(
        &mut self,
        assistant: &mut ConversableAgent,
        problem: &str,
        search_string: Option<&str>,
        options: &ChatOptions,
    ) -> Result<ChatResult> {
        let message = {
            let mut retriever = self.retriever.lock();
            let n_results = retriever.config().n_results;
            retriever.generate_init_message(problem, n_results, search_string)?
        };

        chat::initiate_chat(&mut self.agent, assistant, message, options).await
    }
}

impl Deref for RetrieveUserProxyAgent {
    type Target = ConversableAgent;

    fn deref(&self) -> &ConversableAgent {
        &self.agent
    }
}

impl DerefMut for RetrieveUserProxyAgent {
    fn deref_mut(&mut self) -> &mut ConversableAgent {
        &mut self.agent
    }
}

/// Ends the chat once code ran successfully and passes context requests back
struct RetrieveAssistantHandler;

#[async_trait]
impl ReplyHandler for RetrieveAssistantHandler {
    fn name(&self) -> &str {
        "retrieve_assistant"
    }

    async fn generate(&self, ctx: ReplyContext<'_>) -> Result<HandlerOutcome> {
        let content = ctx.last_message().map(|m| m.text()).unwrap_or("");

        if content.contains(EXECUTION_SUCCEEDED) {
            return Ok(HandlerOutcome::Reply(TERMINATE.to_string()));
        }
        if asks_for_context_update(content) {
            return Ok(HandlerOutcome::Reply(UPDATE_CONTEXT.to_string()));
        }
        Ok(HandlerOutcome::Pass)
    }
}

/// LLM assistant for retrieval chats
pub struct RetrieveAssistantAgent {
    agent: ConversableAgent,
}

impl RetrieveAssistantAgent {
    pub fn new(config: AgentConfig, llm: Arc<dyn ChatBackend>) -> Self {
        let mut agent = ConversableAgent::new(config).with_llm(llm);
        agent.register_reply(Box::new(RetrieveAssistantHandler));
        Self { agent }
    }

    /// Assistant settings with the retrieval system message
    pub fn default_config(name: impl Into<String>) -> AgentConfig {
        AgentConfig::assistant(name).with_system_message(DEFAULT_RETRIEVE_ASSISTANT_SYSTEM_MESSAGE)
    }
}

impl Deref for RetrieveAssistantAgent {
    type Target = ConversableAgent;

    fn deref(&self) -> &ConversableAgent {
        &self.agent
    }
}

impl DerefMut for RetrieveAssistantAgent {
    fn deref_mut(&mut self) -> &mut ConversableAgent {
        &mut self.agent
    }
}
