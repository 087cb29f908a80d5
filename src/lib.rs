pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding_cache;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod highlighter;
pub mod index;
pub mod markdown;
pub mod models;
pub mod proximity;
pub mod ranker;
pub mod response_cache;
pub mod tokenizer;

pub use config::{EngineConfig, MatchMode};
pub use engine::{SearchEngine, SearchResponse};
pub use error::{EngineError, Result};
