use anyhow::Context;
use async_trait::async_trait;
use noteseeker::corpus::{CorpusChange, CorpusWatcher, FsCorpus};
use noteseeker::embedding_cache::{Embedder, EmbeddingCache};
use noteseeker::engine::SearchEngine;
use noteseeker::extractor::LlmClient;
use noteseeker::index::NoteIndex;
use noteseeker::response_cache::LlmResponseCache;
use noteseeker::EngineConfig;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Stand-in collaborators for running without a configured model: quoted and
/// tag queries work fully, everything else reports that no LLM is wired up.
struct UnconfiguredLlm;

#[async_trait]
impl LlmClient for UnconfiguredLlm {
    async fn generate_structured_response(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> anyhow::Result<String> {
        anyhow::bail!("no LLM collaborator configured; use a quoted or #tag query")
    }
}

struct UnconfiguredEmbedder;

#[async_trait]
impl Embedder for UnconfiguredEmbedder {
    fn model_name(&self) -> &str {
        "unconfigured"
    }

    async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        anyhow::bail!("no embedding collaborator configured")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let vault = args.next();
    let query: Vec<String> = args.collect();
    let (Some(vault), false) = (vault, query.is_empty()) else {
        eprintln!("usage: noteseeker <vault-folder> <query...>");
        std::process::exit(2);
    };
    let query = query.join(" ");

    let db_path = std::path::Path::new(&vault).join(".noteseeker.db");
    noteseeker::db::init_database(&db_path).context("initializing cache database")?;

    let corpus = Arc::new(FsCorpus::new(&vault));
    let index = NoteIndex::build(corpus.as_ref(), "").await?;
    let index = Arc::new(RwLock::new(index));

    // Keep the index current while this process runs.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<CorpusChange>();
    let _watcher = CorpusWatcher::start(corpus.root(), tx)?;
    {
        let index = index.clone();
        let corpus = corpus.clone();
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                if let Err(e) = index.write().await.apply_change(corpus.as_ref(), change).await {
                    log::error!("failed to apply corpus change: {}", e);
                }
            }
        });
    }

    let config = EngineConfig::default();
    let engine = SearchEngine::new(
        corpus,
        index,
        Arc::new(UnconfiguredLlm),
        Arc::new(UnconfiguredEmbedder),
        Arc::new(LlmResponseCache::new(&db_path, config.llm_cache_capacity)),
        Arc::new(EmbeddingCache::new(&db_path)),
        config,
    );

    let response = engine.search(&query, 1, None).await?;
    print!("{}", response.formatted);
    Ok(())
}
