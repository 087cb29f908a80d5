use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use walkdir::WalkDir;

/// A change to the corpus the index must apply to stay current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusChange {
    Created(String),
    Modified(String),
    Deleted(String),
}

/// External corpus collaborator: the engine never touches storage directly.
#[async_trait]
pub trait CorpusProvider: Send + Sync {
    /// All document paths under `folder` ("" means the whole corpus).
    async fn list_documents(&self, folder: &str) -> anyhow::Result<Vec<String>>;
    async fn read_document(&self, path: &str) -> anyhow::Result<String>;
    /// Last-modified time as UTC epoch seconds.
    async fn last_modified(&self, path: &str) -> anyhow::Result<i64>;
}

fn is_markdown(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("md") | Some("markdown")
    )
}

/// Filesystem-backed corpus over a vault root.
pub struct FsCorpus {
    root: PathBuf,
}

impl FsCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CorpusProvider for FsCorpus {
    async fn list_documents(&self, folder: &str) -> anyhow::Result<Vec<String>> {
        let base = if folder.is_empty() {
            self.root.clone()
        } else {
            self.root.join(folder)
        };
        if !base.exists() {
            anyhow::bail!("corpus folder does not exist: {}", base.display());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry?;
            if entry.file_type().is_file() && is_markdown(entry.path()) {
                paths.push(entry.path().to_string_lossy().to_string());
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn read_document(&self, path: &str) -> anyhow::Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn last_modified(&self, path: &str) -> anyhow::Result<i64> {
        let meta = tokio::fs::metadata(path).await?;
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Ok(mtime)
    }
}

/// Watches a vault root and forwards Markdown file events as typed
/// `CorpusChange`s. Holds the notify watcher so it is not dropped while
/// watching (dropping it silently stops events).
pub struct CorpusWatcher {
    _watcher: RecommendedWatcher,
}

impl CorpusWatcher {
    pub fn start(root: &Path, tx: UnboundedSender<CorpusChange>) -> anyhow::Result<Self> {
        let (raw_tx, raw_rx) = channel();

        let config = Config::default().with_poll_interval(Duration::from_secs(2));
        let mut watcher = RecommendedWatcher::new(raw_tx, config)?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        std::thread::spawn(move || {
            for res in raw_rx {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        log::error!("watch error: {:?}", e);
                        continue;
                    }
                };

                for path in event.paths {
                    if !is_markdown(&path) {
                        continue;
                    }
                    let path_str = path.to_string_lossy().to_string();
                    let Some(change) = classify_event(&event.kind, path.exists(), path_str)
                    else {
                        continue;
                    };
                    log::debug!("corpus change: {:?}", change);
                    if tx.send(change).is_err() {
                        // Receiver gone, nothing left to notify.
                        return;
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

/// Translate a raw filesystem event into a corpus change. A rename away from
/// a watched path is a deletion, not a modification — indexing the old path
/// as modified would fail the read and leave a stale entry. Renames reported
/// without a direction fall back to whether the path still exists.
fn classify_event(kind: &EventKind, path_exists: bool, path: String) -> Option<CorpusChange> {
    match kind {
        EventKind::Create(_) => Some(CorpusChange::Created(path)),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            Some(CorpusChange::Deleted(path))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(CorpusChange::Created(path)),
        EventKind::Modify(ModifyKind::Name(_)) => Some(if path_exists {
            CorpusChange::Modified(path)
        } else {
            CorpusChange::Deleted(path)
        }),
        EventKind::Modify(_) => Some(CorpusChange::Modified(path)),
        EventKind::Remove(_) => Some(CorpusChange::Deleted(path)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_list_and_read() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha note").unwrap();
        std::fs::write(dir.path().join("b.txt"), "not markdown").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.markdown"), "gamma").unwrap();

        let corpus = FsCorpus::new(dir.path());
        let paths = corpus.list_documents("").await.unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| !p.ends_with(".txt")));

        let content = corpus.read_document(&paths[0]).await.unwrap();
        assert_eq!(content, "alpha note");
        assert!(corpus.last_modified(&paths[0]).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_list_subfolder_only() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("top.md"), "top").unwrap();
        std::fs::create_dir(dir.path().join("projects")).unwrap();
        std::fs::write(dir.path().join("projects/p.md"), "project").unwrap();

        let corpus = FsCorpus::new(dir.path());
        let paths = corpus.list_documents("projects").await.unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("p.md"));
    }

    #[tokio::test]
    async fn test_missing_folder_errors() {
        let dir = tempdir().unwrap();
        let corpus = FsCorpus::new(dir.path());
        assert!(corpus.list_documents("no-such-folder").await.is_err());
    }

    #[test]
    fn test_classify_rename_events() {
        use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

        let p = || "a.md".to_string();

        // A rename away from the path deletes it; a rename onto it creates it.
        assert_eq!(
            classify_event(&EventKind::Modify(ModifyKind::Name(RenameMode::From)), false, p()),
            Some(CorpusChange::Deleted(p()))
        );
        assert_eq!(
            classify_event(&EventKind::Modify(ModifyKind::Name(RenameMode::To)), true, p()),
            Some(CorpusChange::Created(p()))
        );

        // Directionless rename: trust the filesystem's current state.
        let any = EventKind::Modify(ModifyKind::Name(RenameMode::Any));
        assert_eq!(classify_event(&any, false, p()), Some(CorpusChange::Deleted(p())));
        assert_eq!(classify_event(&any, true, p()), Some(CorpusChange::Modified(p())));

        assert_eq!(
            classify_event(&EventKind::Create(CreateKind::File), true, p()),
            Some(CorpusChange::Created(p()))
        );
        assert_eq!(
            classify_event(
                &EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                true,
                p()
            ),
            Some(CorpusChange::Modified(p()))
        );
        assert_eq!(
            classify_event(&EventKind::Remove(RemoveKind::File), false, p()),
            Some(CorpusChange::Deleted(p()))
        );
        assert_eq!(classify_event(&EventKind::Access(AccessKind::Any), true, p()), None);
    }
}
