//! Retrieval-augmented chat: document chunking, embeddings, a local vector
//! store and the retrieval agent pair.

mod agents;
mod chunking;
mod config;
mod embedding;
mod store;
mod tokenizer;

pub use agents::{RetrieveAssistantAgent, RetrieveUserProxyAgent, Retriever};
pub use config::RetrieveConfig;
pub use embedding::default_embedding_function;
