//! ContextCollector: selects project files relevant to a failing task and fits
//! them into a token budget.
//!
//! Candidates are scored by `10*type_weight + 5*recency + 1.5*min(keyword_hits, 10)`
//! and taken best-first. File content is cached in the `context` namespace
//! under `"{path}:{source_hash}"`, so an unchanged file is not re-read until its
//! entry expires or a refresh is forced.

pub mod compressor;
pub mod scan;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::{self, CacheManager};
use crate::config::ContextConfig;
use crate::id::now_ms;
pub use compressor::{estimate_tokens, select, truncate_head_tail};
pub use scan::{Candidate, ContextKind, scan};

const KEYWORD_HIT_CAP: usize = 10;

/// One file (or truncated fragment) in a context bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub path: String,
    pub kind: ContextKind,
    pub content: String,
    pub token_estimate: usize,
    pub priority: f64,
    pub source_hash: String,
    pub last_used_at: i64,
    #[serde(default)]
    pub truncated: bool,
}

/// What to collect and how much room there is.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub root: PathBuf,
    pub keywords: Vec<String>,
    pub max_items: usize,
    pub max_tokens: usize,
    pub force_refresh: bool,
}

impl ContextRequest {
    pub fn new(root: impl Into<PathBuf>, max_items: usize, max_tokens: usize) -> Self {
        Self {
            root: root.into(),
            keywords: Vec::new(),
            max_items,
            max_tokens,
            force_refresh: false,
        }
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }
}

/// Selected items plus bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub items: Vec<ContextItem>,
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub max_items: usize,
    pub candidates_considered: usize,
    pub cache_hits: usize,
}

impl ContextBundle {
    /// Plain-text block suitable for pasting into a prompt.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            out.push_str(&format!(
                "=== {} | {} ===\n",
                item.kind.as_str().to_uppercase(),
                item.path
            ));
            out.push_str(&item.content);
            if !item.content.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

/// Cached per-file payload.
#[derive(Debug, Serialize, Deserialize)]
struct CachedFragment {
    content: String,
    token_estimate: usize,
}

/// First 16 hex chars of SHA-256 over (relative path, byte length, mtime).
pub fn source_hash(rel_path: &str, size: u64, modified: SystemTime) -> String {
    let nanos = modified.duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(rel_path.as_bytes());
    hasher.update(b"|");
    hasher.update(size.to_le_bytes());
    hasher.update(b"|");
    hasher.update(nanos.to_le_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Case-insensitive keyword occurrences in path and content.
pub fn keyword_hits(keywords: &[String], path: &str, content: &str) -> usize {
    let haystack = format!("{}\n{}", path, content).to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .map(|k| haystack.matches(k.as_str()).count())
        .sum()
}

/// `1 / (1 + age_hours / 24)`; a file modified now scores 1, a day old 0.5.
pub fn recency(modified: SystemTime, now: SystemTime) -> f64 {
    let age_hours = now.duration_since(modified).map(|d| d.as_secs_f64() / 3600.0).unwrap_or(0.0);
    1.0 / (1.0 + age_hours / 24.0)
}

pub fn priority(kind: ContextKind, recency: f64, hits: usize) -> f64 {
    10.0 * kind.weight() + 5.0 * recency + 1.5 * hits.min(KEYWORD_HIT_CAP) as f64
}

pub struct ContextCollector {
    config: ContextConfig,
    cache: Arc<CacheManager>,
    ttl: Duration,
}

struct Scored {
    item: ContextItem,
    modified: SystemTime,
}

impl ContextCollector {
    pub fn new(config: ContextConfig, cache: Arc<CacheManager>, ttl: Duration) -> Self {
        Self { config, cache, ttl }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Build a bundle. Never fails: unreadable files are logged and skipped.
    pub fn build(&self, request: &ContextRequest) -> ContextBundle {
        let candidates = scan(&request.root, &self.config);
        let considered = candidates.len();
        let now = SystemTime::now();
        let mut cache_hits = 0;

        let mut scored: Vec<Scored> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let hash = source_hash(&candidate.rel_path, candidate.size, candidate.modified);
            let (fragment, hit) = match self.load(&candidate, &hash, request.force_refresh) {
                Some(loaded) => loaded,
                None => continue,
            };
            if hit {
                cache_hits += 1;
            }

            let hits = keyword_hits(&request.keywords, &candidate.rel_path, &fragment.content);
            if candidate.kind == ContextKind::Documentation && hits == 0 {
                continue;
            }

            scored.push(Scored {
                item: ContextItem {
                    path: candidate.rel_path,
                    kind: candidate.kind,
                    content: fragment.content,
                    token_estimate: fragment.token_estimate,
                    priority: priority(candidate.kind, recency(candidate.modified, now), hits),
                    source_hash: hash,
                    last_used_at: now_ms(),
                    truncated: false,
                },
                modified: candidate.modified,
            });
        }

        scored.sort_by(|a, b| {
            b.item
                .priority
                .total_cmp(&a.item.priority)
                .then_with(|| b.modified.cmp(&a.modified))
                .then_with(|| a.item.path.cmp(&b.item.path))
        });

        let items = select(
            scored.into_iter().map(|s| s.item).collect(),
            request.max_items,
            request.max_tokens,
        );
        let total_tokens = items.iter().map(|i| i.token_estimate).sum();

        log::info!(
            "Built context: {} of {} candidates, {} / {} tokens, {} cache hits",
            items.len(),
            considered,
            total_tokens,
            request.max_tokens,
            cache_hits
        );

        ContextBundle {
            items,
            total_tokens,
            max_tokens: request.max_tokens,
            max_items: request.max_items,
            candidates_considered: considered,
            cache_hits,
        }
    }

    /// Content for `candidate`, from cache when allowed. The flag reports a cache hit.
    fn load(
        &self,
        candidate: &Candidate,
        hash: &str,
        force_refresh: bool,
    ) -> Option<(CachedFragment, bool)> {
        let key = format!("{}:{}", candidate.rel_path, hash);

        if !force_refresh {
            if let Some(bytes) = self.cache.get(cache::CONTEXT, &key) {
                match serde_json::from_slice::<CachedFragment>(&bytes) {
                    Ok(fragment) => return Some((fragment, true)),
                    Err(e) => {
                        log::warn!("Discarding unreadable context cache entry {}: {}", key, e)
                    }
                }
            }
        }

        let content = match read_text(&candidate.abs_path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Skipping context file {}: {}", candidate.rel_path, e);
                return None;
            }
        };

        let fragment = CachedFragment {
            token_estimate: estimate_tokens(&content),
            content,
        };
        match serde_json::to_vec(&fragment) {
            Ok(bytes) => self.cache.put(cache::CONTEXT, &key, &bytes, self.ttl),
            Err(e) => log::warn!("Failed to serialize context fragment {}: {}", key, e),
        }
        Some((fragment, false))
    }
}

fn read_text(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    String::from_utf8(bytes)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn collector(cache_dir: &Path) -> ContextCollector {
        ContextCollector::new(
            ContextConfig::default(),
            Arc::new(CacheManager::open(cache_dir)),
            Duration::from_secs(6 * 3600),
        )
    }

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        fs::write(
            root.join("src/net.rs"),
            "fn connect() { /* retry on connection refused */ }\n",
        )
        .unwrap();
        fs::write(root.join("src/util.rs"), "fn helper() {}\n").unwrap();
        fs::write(root.join("NOTES.md"), "unrelated notes\n").unwrap();
        fs::write(root.join("NETWORK.md"), "connection troubleshooting\n").unwrap();
        temp
    }

    #[test]
    fn test_priority_formula() {
        assert!((priority(ContextKind::Config, 1.0, 0) - 14.0).abs() < 1e-9);
        assert!((priority(ContextKind::Source, 0.5, 20) - (7.0 + 2.5 + 15.0)).abs() < 1e-9);
    }

    #[test]
    fn test_recency() {
        let now = SystemTime::now();
        assert!((recency(now, now) - 1.0).abs() < 1e-9);
        let day_old = now - Duration::from_secs(24 * 3600);
        assert!((recency(day_old, now) - 0.5).abs() < 1e-6);
        // Future mtimes count as fresh
        assert!((recency(now + Duration::from_secs(60), now) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_hits() {
        let kw = vec!["Connection".to_string(), "".to_string()];
        assert_eq!(keyword_hits(&kw, "src/net.rs", "connection refused; connection reset"), 2);
        assert_eq!(keyword_hits(&[], "a", "b"), 0);
    }

    #[test]
    fn test_source_hash_changes_with_inputs() {
        let t = UNIX_EPOCH + Duration::from_secs(1_000);
        let h = source_hash("a.rs", 10, t);
        assert_eq!(h.len(), 16);
        assert_eq!(h, source_hash("a.rs", 10, t));
        assert_ne!(h, source_hash("a.rs", 11, t));
        assert_ne!(h, source_hash("b.rs", 10, t));
        assert_ne!(h, source_hash("a.rs", 10, t + Duration::from_nanos(1)));
    }

    #[test]
    fn test_build_ranks_keyword_matches_and_filters_docs() {
        let proj = project();
        let cache_dir = TempDir::new().unwrap();
        let c = collector(cache_dir.path());

        let req = ContextRequest::new(proj.path(), 10, 10_000)
            .with_keywords(vec!["connection".to_string()]);
        let bundle = c.build(&req);

        let paths: Vec<&str> = bundle.items.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"NETWORK.md"));
        assert!(!paths.contains(&"NOTES.md"));
        // Keyword hit lifts src/net.rs above the unmatched source file
        let net = paths.iter().position(|p| *p == "src/net.rs").unwrap();
        let util = paths.iter().position(|p| *p == "src/util.rs").unwrap();
        assert!(net < util);
        assert_eq!(bundle.candidates_considered, 5);
        assert_eq!(bundle.cache_hits, 0);
    }

    #[test]
    fn test_second_build_uses_cache() {
        let proj = project();
        let cache_dir = TempDir::new().unwrap();
        let c = collector(cache_dir.path());
        let req = ContextRequest::new(proj.path(), 10, 10_000);

        let first = c.build(&req);
        let second = c.build(&req);
        assert_eq!(second.cache_hits, first.candidates_considered);
        assert_eq!(
            first.items.iter().map(|i| &i.content).collect::<Vec<_>>(),
            second.items.iter().map(|i| &i.content).collect::<Vec<_>>()
        );

        let mut forced = req.clone();
        forced.force_refresh = true;
        assert_eq!(c.build(&forced).cache_hits, 0);
    }

    #[test]
    fn test_changed_file_is_reread() {
        let proj = project();
        let cache_dir = TempDir::new().unwrap();
        let c = collector(cache_dir.path());
        let req = ContextRequest::new(proj.path(), 10, 10_000);
        c.build(&req);

        fs::write(proj.path().join("src/util.rs"), "fn helper() { changed(); }\n").unwrap();
        let bundle = c.build(&req);
        let util = bundle.items.iter().find(|i| i.path == "src/util.rs").unwrap();
        assert!(util.content.contains("changed()"));
    }

    #[test]
    fn test_non_utf8_file_skipped() {
        let proj = project();
        fs::write(proj.path().join("src/bin.rs"), [0xff, 0xfe, 0x00, 0x9f]).unwrap();
        let cache_dir = TempDir::new().unwrap();
        let request = ContextRequest::new(proj.path(), 10, 10_000);
        let bundle = collector(cache_dir.path()).build(&request);
        assert!(bundle.items.iter().all(|i| i.path != "src/bin.rs"));
    }

    #[test]
    fn test_budget_respected() {
        let proj = project();
        for i in 0..5 {
            let path = proj.path().join(format!("src/big{}.rs", i));
            fs::write(path, "// filler line\n".repeat(160)).unwrap();
        }
        let cache_dir = TempDir::new().unwrap();
        let bundle = collector(cache_dir.path()).build(&ContextRequest::new(proj.path(), 4, 1000));

        assert!(bundle.total_tokens <= 1000);
        assert!(bundle.items.len() <= 4);
        let summed: usize = bundle.items.iter().map(|i| i.token_estimate).sum();
        assert_eq!(bundle.total_tokens, summed);
    }

    #[test]
    fn test_render_text() {
        let bundle = ContextBundle {
            items: vec![ContextItem {
                path: "Cargo.toml".to_string(),
                kind: ContextKind::Manifest,
                content: "[package]".to_string(),
                token_estimate: 3,
                priority: 1.0,
                source_hash: "x".to_string(),
                last_used_at: 0,
                truncated: false,
            }],
            ..Default::default()
        };
        assert_eq!(bundle.render_text(), "=== MANIFEST | Cargo.toml ===\n[package]\n\n");
    }
}
