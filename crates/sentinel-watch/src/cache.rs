//! Persistent seen-market cache.
//!
//! A JSON file of market ids that discovery has already announced, so new
//! market notifications survive restarts. Load failures are not fatal: the
//! cache starts empty and rewrites itself on the next add.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Seen-market id set backed by a JSON file.
#[derive(Debug)]
pub struct MarketCache {
    path: PathBuf,
    seen: HashSet<String>,
}

impl MarketCache {
    /// Load the cache from `path`. A missing file starts empty; an
    /// unreadable one warns and starts empty.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let seen = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<String>>(&content) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    warn!("Failed to parse market cache {path:?}: {e}");
                    HashSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                warn!("Failed to read market cache {path:?}: {e}");
                HashSet::new()
            }
        };
        Self { path, seen }
    }

    pub fn has(&self, market_id: &str) -> bool {
        self.seen.contains(market_id)
    }

    /// Record a market id and persist. Returns true when the id is new.
    pub fn add(&mut self, market_id: &str) -> bool {
        if !self.seen.insert(market_id.to_string()) {
            return false;
        }
        if let Err(e) = self.persist() {
            warn!("Failed to persist market cache {:?}: {e}", self.path);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn persist(&self) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut ids: Vec<&String> = self.seen.iter().collect();
        ids.sort();
        let content = serde_json::to_string_pretty(&ids)?;
        std::fs::write(&self.path, content)
    }
}
