//! Candidate discovery for context collection.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::ContextConfig;

/// What kind of project file a candidate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Config,
    Manifest,
    Source,
    Documentation,
}

impl ContextKind {
    /// Resolution order: a file is tagged with the first kind whose patterns match.
    pub const SCAN_ORDER: [ContextKind; 4] = [
        ContextKind::Manifest,
        ContextKind::Config,
        ContextKind::Source,
        ContextKind::Documentation,
    ];

    pub fn weight(&self) -> f64 {
        match self {
            ContextKind::Config => 0.9,
            ContextKind::Manifest => 0.8,
            ContextKind::Source => 0.7,
            ContextKind::Documentation => 0.5,
        }
    }

    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            ContextKind::Manifest => &[
                "**/Cargo.toml",
                "**/pyproject.toml",
                "**/setup.py",
                "**/setup.cfg",
                "**/requirements*.txt",
                "**/Pipfile",
                "**/package.json",
                "**/go.mod",
                "**/pom.xml",
                "**/build.gradle",
                "**/composer.json",
            ],
            ContextKind::Config => &[
                "**/*.yml",
                "**/*.yaml",
                "**/*.toml",
                "**/*.ini",
                "**/*.cfg",
                "**/*.json",
                "**/Makefile",
                "**/Dockerfile",
                "**/CMakeLists.txt",
            ],
            ContextKind::Source => &[
                "**/*.rs", "**/*.py", "**/*.js", "**/*.ts", "**/*.go", "**/*.c", "**/*.h",
                "**/*.cpp", "**/*.java", "**/*.rb", "**/*.sh",
            ],
            ContextKind::Documentation => &["**/*.md", "**/*.rst", "**/*.txt"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Config => "config",
            ContextKind::Manifest => "manifest",
            ContextKind::Source => "source",
            ContextKind::Documentation => "documentation",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file that may be included in a context bundle.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Path relative to the project root, `/`-separated.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub kind: ContextKind,
    pub size: u64,
    pub modified: SystemTime,
}

fn is_skipped(rel: &Path, skip_dirs: &[String]) -> bool {
    rel.components().any(|c| {
        let part = c.as_os_str().to_string_lossy();
        skip_dirs.iter().any(|s| *s == part)
    })
}

/// Walk `root` for candidates of every kind.
///
/// Skips configured directories and files over `max_file_bytes`. Source files
/// are limited to the `max_source_files` most recently modified.
pub fn scan(root: &Path, config: &ContextConfig) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for kind in ContextKind::SCAN_ORDER {
        let mut found = Vec::new();

        for pattern in kind.patterns() {
            let full = root.join(pattern);
            let Some(full) = full.to_str() else {
                log::warn!("Non-UTF-8 project root {}, skipping context scan", root.display());
                return Vec::new();
            };
            let paths = match glob::glob(full) {
                Ok(paths) => paths,
                Err(e) => {
                    log::warn!("Bad context pattern {}: {}", pattern, e);
                    continue;
                }
            };

            for path in paths.filter_map(|r| r.ok()) {
                let Ok(rel) = path.strip_prefix(root) else {
                    continue;
                };
                if is_skipped(rel, &config.skip_dirs) {
                    continue;
                }
                let rel_path = rel.to_string_lossy().replace('\\', "/");
                if seen.contains(&rel_path) {
                    continue;
                }

                let meta = match std::fs::metadata(&path) {
                    Ok(m) if m.is_file() => m,
                    _ => continue,
                };
                if meta.len() > config.max_file_bytes {
                    log::debug!("Skipping {} ({} bytes over limit)", rel_path, meta.len());
                    continue;
                }

                seen.insert(rel_path.clone());
                found.push(Candidate {
                    rel_path,
                    abs_path: path.clone(),
                    kind,
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }

        if kind == ContextKind::Source && found.len() > config.max_source_files {
            found.sort_by(|a, b| {
                b.modified
                    .cmp(&a.modified)
                    .then_with(|| a.rel_path.cmp(&b.rel_path))
            });
            found.truncate(config.max_source_files);
        }
        out.extend(found);
    }

    log::debug!("Context scan of {} found {} candidates", root.display(), out.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn kinds(cands: &[Candidate]) -> Vec<(String, ContextKind)> {
        let mut v: Vec<_> = cands.iter().map(|c| (c.rel_path.clone(), c.kind)).collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        v
    }

    #[test]
    fn test_scan_tags_kinds() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "Cargo.toml", "[package]");
        write(temp.path(), "config/app.yml", "a: 1");
        write(temp.path(), "src/main.rs", "fn main() {}");
        write(temp.path(), "README.md", "# readme");
        write(temp.path(), "requirements-dev.txt", "pytest");

        let found = scan(temp.path(), &ContextConfig::default());
        assert_eq!(
            kinds(&found),
            vec![
                ("Cargo.toml".to_string(), ContextKind::Manifest),
                ("README.md".to_string(), ContextKind::Documentation),
                ("config/app.yml".to_string(), ContextKind::Config),
                ("requirements-dev.txt".to_string(), ContextKind::Manifest),
                ("src/main.rs".to_string(), ContextKind::Source),
            ]
        );
    }

    #[test]
    fn test_scan_skips_dirs_and_large_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "node_modules/pkg/index.js", "x");
        write(temp.path(), "target/debug/build.rs", "x");
        write(temp.path(), ".fixloop/notes.md", "x");
        write(temp.path(), "src/big.rs", &"x".repeat(200));
        write(temp.path(), "src/ok.rs", "x");

        let config = ContextConfig {
            max_file_bytes: 100,
            ..Default::default()
        };
        let found = scan(temp.path(), &config);
        assert_eq!(kinds(&found), vec![("src/ok.rs".to_string(), ContextKind::Source)]);
    }

    #[test]
    fn test_scan_limits_source_files() {
        let temp = TempDir::new().unwrap();
        for i in 0..5 {
            write(temp.path(), &format!("src/m{}.py", i), "pass");
        }
        let config = ContextConfig {
            max_source_files: 2,
            ..Default::default()
        };
        let found = scan(temp.path(), &config);
        assert_eq!(found.iter().filter(|c| c.kind == ContextKind::Source).count(), 2);
    }

    #[test]
    fn test_scan_empty_dir() {
        let temp = TempDir::new().unwrap();
        assert!(scan(temp.path(), &ContextConfig::default()).is_empty());
    }
}
