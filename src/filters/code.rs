// src/filters/code.rs
// Significance filter for code-pattern capture

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Default minimum line count for non-significant content
const DEFAULT_MIN_LINES: usize = 10;

/// Maximum content length before truncation
const DEFAULT_MAX_CONTENT_LENGTH: usize = 5000;

/// Marker appended when content is truncated at capture time
const TRUNCATION_MARKER: &str = " [TRUNCATED]";

/// File extensions that never carry code patterns worth storing
const DEFAULT_SKIP_EXTENSIONS: &[&str] = &[
    ".md", ".txt", ".json", ".yaml", ".yml", ".toml", ".ini", ".cfg", ".lock", ".log", ".svg",
    ".png", ".jpg", ".jpeg", ".gif", ".pdf", ".zip", ".tar", ".gz",
];

/// Generated/build directory fragments that are skipped by path
const SKIP_PATH_PATTERNS: &[&str] = &[
    "node_modules/",
    "venv/",
    ".venv/",
    "env/",
    ".git/",
    "__pycache__/",
    ".pytest_cache/",
    "dist/",
    "build/",
    ".next/",
    ".nuxt/",
    "target/",
    "vendor/",
    ".terraform/",
    "coverage/",
    ".coverage/",
];

static FUNCTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bdef\s+\w+\s*\(",      // Python
        r"\bfunction\s+\w+\s*\(", // JavaScript
        r"\bfunc\s+\w+\s*\(",     // Go
        r"\bfn\s+\w+\s*\(",       // Rust
        r"(?m)^\s*\w+\s*:\s*function\s*\(",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static TYPE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bclass\s+\w+",
        r"\binterface\s+\w+",
        r"\bstruct\s+\w+",
        r"\btrait\s+\w+",
        r"\benum\s+\w+",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static DECORATOR_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?m)^\s*@\w+").ok());

/// Filter for code patterns before storage.
///
/// Keeps junk out of the code-patterns collection: non-code files,
/// generated directories, and content with no structural signal. A compact
/// significant snippet beats many lines of assignments, so significance is
/// checked before the line minimum.
pub struct CodePatternFilter {
    min_lines: usize,
    max_content_length: usize,
    skip_extensions: HashSet<String>,
}

impl Default for CodePatternFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodePatternFilter {
    pub fn new() -> Self {
        let min_lines = std::env::var("ENGRAM_FILTER_MIN_LINES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MIN_LINES);

        let mut skip_extensions: HashSet<String> = DEFAULT_SKIP_EXTENSIONS
            .iter()
            .map(|s| s.to_string())
            .collect();
        // User-provided extensions extend the defaults, never replace them
        if let Ok(extra) = std::env::var("ENGRAM_FILTER_SKIP_EXTENSIONS") {
            for ext in extra.split(',') {
                let ext = ext.trim();
                if ext.is_empty() {
                    continue;
                }
                if ext.starts_with('.') {
                    skip_extensions.insert(ext.to_string());
                } else {
                    skip_extensions.insert(format!(".{ext}"));
                }
            }
        }

        Self {
            min_lines,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            skip_extensions,
        }
    }

    /// Decide whether a tool-produced change should be stored.
    ///
    /// Order: extension reject, path-pattern reject, significance check,
    /// then the line minimum for non-significant content. Significance
    /// overrides the line minimum.
    pub fn should_store(&self, file_path: &str, content: &str, tool_name: &str) -> bool {
        let ext = Path::new(file_path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        if self.skip_extensions.contains(&ext) {
            debug!(file_path, extension = %ext, tool_name, "filter skip: extension");
            return false;
        }

        let normalized = file_path.replace('\\', "/");
        for pattern in SKIP_PATH_PATTERNS {
            if normalized.contains(pattern) {
                debug!(file_path, pattern, tool_name, "filter skip: path pattern");
                return false;
            }
        }

        let significant = self.is_significant(content);
        let line_count = content.lines().count();

        // Significance overrides the line minimum; short and structureless
        // content is the only rejection here.
        if !significant && line_count < self.min_lines {
            debug!(
                file_path,
                lines = line_count,
                min_lines = self.min_lines,
                tool_name,
                "filter skip: below line minimum and not significant"
            );
            return false;
        }

        debug!(file_path, lines = line_count, significant, tool_name, "filter pass");
        true
    }

    /// Structural significance: any one of a function definition, a
    /// class/type declaration, a decorator, or a block of 3+ consecutive
    /// import/use lines.
    pub fn is_significant(&self, content: &str) -> bool {
        for pattern in FUNCTION_PATTERNS.iter() {
            if pattern.is_match(content) {
                return true;
            }
        }
        for pattern in TYPE_PATTERNS.iter() {
            if pattern.is_match(content) {
                return true;
            }
        }
        if let Some(decorator) = DECORATOR_PATTERN.as_ref() {
            if decorator.is_match(content) {
                return true;
            }
        }

        // Import block: 3+ consecutive import/from/use lines
        let mut consecutive = 0usize;
        for line in content.lines() {
            let stripped = line.trim_start();
            if stripped.starts_with("import ")
                || stripped.starts_with("from ")
                || stripped.starts_with("use ")
            {
                consecutive += 1;
                if consecutive >= 3 {
                    return true;
                }
            } else {
                consecutive = 0;
            }
        }

        false
    }

    /// Truncate content to the capture budget with a visible marker.
    pub fn truncate_content(&self, content: &str) -> String {
        if content.chars().count() <= self.max_content_length {
            return content.to_string();
        }
        let keep = self.max_content_length - TRUNCATION_MARKER.len();
        let truncated: String = content.chars().take(keep).collect();
        debug!(
            original_length = content.len(),
            truncated_length = truncated.len() + TRUNCATION_MARKER.len(),
            "content truncated"
        );
        format!("{truncated}{TRUNCATION_MARKER}")
    }
}
