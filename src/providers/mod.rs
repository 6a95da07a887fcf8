pub mod embedding;
pub mod github;
pub mod knowledge;
pub mod source_control;
pub mod vector_store;

pub use embedding::{Embedder, HashingEmbedder, HttpEmbedder};
pub use github::GithubProvider;
pub use knowledge::KnowledgeBase;
pub use source_control::{publish_comments, PublicationReport, SourceControlProvider, ThreadId};
pub use vector_store::{InMemoryVectorStore, VectorStore};
