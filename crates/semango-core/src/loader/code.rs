//! Source-code loader.
//!
//! One representation per file, tagged with the language inferred from
//! the extension. Files above the size cap are skipped rather than
//! truncated; a half-indexed source file is worse than an absent one.

use std::path::Path;

use crate::error::{SemangoError, SemangoResult};
use crate::loader::Loader;
use crate::types::{meta_keys, Modality, Representation};

/// Maximum source file size. Larger files are skipped.
const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Loader for programming-language sources.
pub struct CodeLoader;

impl CodeLoader {
    /// Build the code loader.
    pub fn new() -> Self {
        Self
    }
}

impl Default for CodeLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Language name for a claimed extension.
fn language_for(ext: &str) -> &'static str {
    match ext {
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "sh" | "bash" | "zsh" => "shell",
        "sql" => "sql",
        "html" | "htm" => "html",
        "css" | "scss" => "css",
        "toml" => "toml",
        "yml" | "yaml" => "yaml",
        _ => "unknown",
    }
}

impl Loader for CodeLoader {
    fn name(&self) -> &'static str {
        "code"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[
            "py", "ts", "tsx", "js", "jsx", "mjs", "cjs", "rs", "go", "java", "c", "h", "cpp",
            "cc", "cxx", "hpp", "hxx", "hh", "cs", "rb", "php", "swift", "kt", "kts", "scala",
            "sh", "bash", "zsh", "sql", "html", "htm", "css", "scss", "toml", "yml", "yaml",
        ]
    }

    fn load(&self, rel: &str, abs: &Path) -> SemangoResult<Vec<Representation>> {
        let size = std::fs::metadata(abs)
            .map_err(|e| SemangoError::loader(abs, format!("stat failed: {e}")))?
            .len();
        if size > MAX_FILE_SIZE {
            tracing::debug!(path = rel, size, "skipping oversized source file");
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(abs)
            .map_err(|e| SemangoError::loader(abs, format!("read failed: {e}")))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let ext = rel
            .rsplit('/')
            .next()
            .and_then(|n| n.rsplit_once('.'))
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();

        let rep = Representation::new(rel, Modality::Text, 0, content)
            .with_meta(meta_keys::SOURCE, self.name())
            .with_meta(meta_keys::LANGUAGE, language_for(&ext));
        Ok(vec![rep])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_rep_with_language() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let abs = dir.path().join("main.rs");
        std::fs::write(&abs, "fn main() {}\n").expect("write");
        let loader = CodeLoader::new();
        let reps = loader.load("src/main.rs", &abs).expect("load");
        assert_eq!(reps.len(), 1);
        assert_eq!(
            reps[0].meta.get(meta_keys::LANGUAGE).map(String::as_str),
            Some("rust")
        );
        assert_eq!(reps[0].modality, Modality::Text);
    }

    #[test]
    fn test_oversized_file_skipped() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let abs = dir.path().join("big.py");
        std::fs::write(&abs, "#".repeat((MAX_FILE_SIZE + 1) as usize)).expect("write");
        let loader = CodeLoader::new();
        assert!(loader.load("big.py", &abs).expect("load").is_empty());
    }

    #[test]
    fn test_language_table() {
        assert_eq!(language_for("py"), "python");
        assert_eq!(language_for("kt"), "kotlin");
        assert_eq!(language_for("xyz"), "unknown");
    }
}
