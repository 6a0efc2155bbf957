//! Filesystem crawler.
//!
//! Walks the configured root depth-first, applies include/exclude glob
//! rules, and emits root-relative paths on a bounded channel. The channel
//! capacity applies backpressure to the walk: when the pipeline falls
//! behind, the walker blocks instead of buffering the whole tree.
//!
//! Exclude patterns with a `/**` suffix prune the entire subtree, so an
//! excluded directory like `.git` is never descended into. Per-entry
//! errors (permission denied, broken symlinks) are logged and skipped;
//! only a terminal walk error is delivered on the single-slot error
//! channel.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::{SemangoError, SemangoResult};

/// Capacity of the emitted path channel.
const PATH_CHANNEL_CAPACITY: usize = 100;

/// Filesystem walker with glob filtering.
pub struct Crawler {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    /// Directory-prune matcher built from `/**`-suffixed exclude patterns.
    exclude_dirs: GlobSet,
}

/// Handles to a running crawl: the path stream, the terminal-error slot,
/// and the walker task itself.
pub struct CrawlStream {
    /// Root-relative paths, forward slashes. Closed when the walk ends.
    pub paths: mpsc::Receiver<String>,
    /// Terminal walk error, if any. At most one message.
    pub error: mpsc::Receiver<SemangoError>,
    /// The walker task handle.
    pub handle: tokio::task::JoinHandle<()>,
}

impl Crawler {
    /// Build a crawler for `root` with the given glob rules.
    ///
    /// Patterns use doublestar semantics with forward-slash paths.
    /// An empty include list matches every file.
    pub fn new(root: &Path, include: &[String], exclude: &[String]) -> SemangoResult<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            include: build_glob_set(include)?,
            exclude: build_glob_set(exclude)?,
            exclude_dirs: build_dir_prune_set(exclude)?,
        })
    }

    /// Start the walk on a blocking task.
    ///
    /// The path channel is closed exactly once, when the walk finishes or
    /// aborts. Cancellation stops the walk after the current entry.
    pub fn spawn(self, cancel: CancellationToken) -> CrawlStream {
        let (path_tx, path_rx) = mpsc::channel::<String>(PATH_CHANNEL_CAPACITY);
        let (err_tx, err_rx) = mpsc::channel::<SemangoError>(1);

        let handle = tokio::task::spawn_blocking(move || {
            self.walk(&path_tx, &err_tx, &cancel);
            // path_tx drops here, closing the stream.
        });

        CrawlStream {
            paths: path_rx,
            error: err_rx,
            handle,
        }
    }

    fn walk(
        &self,
        path_tx: &mpsc::Sender<String>,
        err_tx: &mpsc::Sender<SemangoError>,
        cancel: &CancellationToken,
    ) {
        let root = self.root.clone();
        if !root.is_dir() {
            let _ = err_tx.try_send(SemangoError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("crawl root {} is not a directory", root.display()),
            )));
            return;
        }

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let Some(rel) = relative_slash_path(&root, entry.path()) else {
                    return true;
                };
                if entry.file_type().is_dir() {
                    !self.exclude_dirs.is_match(&rel) && !self.exclude.is_match(&rel)
                } else {
                    true
                }
            });

        let mut emitted = 0usize;
        for entry in walker {
            if cancel.is_cancelled() {
                tracing::debug!(root = %root.display(), "crawl cancelled");
                return;
            }
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative_slash_path(&root, entry.path()) else {
                continue;
            };
            if self.exclude.is_match(&rel) {
                continue;
            }
            if !self.include.is_empty() && !self.include.is_match(&rel) {
                continue;
            }
            // Bounded send: blocks when the pipeline is behind, which is
            // the backpressure contract of the crawler.
            if path_tx.blocking_send(rel).is_err() {
                // Receiver dropped; the walk is no longer wanted.
                return;
            }
            emitted += 1;
        }

        tracing::debug!(root = %root.display(), files = emitted, "crawl complete");
    }
}

/// Compute the root-relative path with forward slashes.
fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let s = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn build_glob_set(patterns: &[String]) -> SemangoResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| SemangoError::Config {
            details: format!("invalid glob {pattern:?}: {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| SemangoError::Config {
        details: format!("glob set: {e}"),
    })
}

/// For every `<prefix>/**` exclude pattern, match `<prefix>` itself so the
/// walker can skip the directory without descending into it.
fn build_dir_prune_set(patterns: &[String]) -> SemangoResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Some(prefix) = pattern.strip_suffix("/**") {
            let glob = Glob::new(prefix).map_err(|e| SemangoError::Config {
                details: format!("invalid glob {pattern:?}: {e}"),
            })?;
            builder.add(glob);
        }
    }
    builder.build().map_err(|e| SemangoError::Config {
        details: format!("glob set: {e}"),
    })
}
