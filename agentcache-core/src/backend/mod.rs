//! External collaborators: key-value store, vector store, embedding and chat providers

pub mod kv;
pub mod providers;
pub mod vector;

pub use kv::{start_auto_cleanup, InMemoryKvStore, KeyValueStore, ScoredMember, ZRangeOptions};
pub use providers::{
    ChatMessage, ChatOptions, ChatResponse, EchoProvider, EmbeddingProvider, HashingEmbedder,
    LlmProvider, Role, Usage,
};
pub use vector::{cosine_similarity, InMemoryVectorStore, VectorMatch, VectorRecord, VectorStore};
