//
// sourcing.rs
//
// Heuristic discovery of inclusion edges from raw text. The grammar does not
// model dynamic inclusion, so detection is a line-oriented scan over the
// source rather than a tree walk: it keeps working when the tree is
// malformed, at the cost of false positives inside here-documents and
// comments, and false negatives for conditionally-guarded sourcing.
//

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tower_lsp::lsp_types::Url;

/// How bare (slash-less) paths are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourcingStrategy {
    /// Resolve relative to the including file's directory only
    #[default]
    FileRelative,
    /// Additionally offer a workspace-root-relative candidate for bare paths
    FileRelativeAndRoot,
}

/// Resolves inclusion statements in a file to candidate target URIs.
///
/// Kept behind a trait so the text-based heuristic can be swapped for a
/// grammar-aware resolver without touching the analyzer or the index.
pub trait SourceResolver: Send + Sync {
    /// Candidate inclusion targets of `text`. Pure over (text, uri, root);
    /// targets are not checked for existence.
    fn sourced_uris(&self, text: &str, uri: &Url, root: Option<&Url>) -> HashSet<Url>;
}

/// The default resolver: a regex scan for `source <path>` / `. <path>`
/// statements at the start of a line.
#[derive(Debug, Default)]
pub struct TextSourceResolver {
    strategy: SourcingStrategy,
}

impl TextSourceResolver {
    pub fn new(strategy: SourcingStrategy) -> Self {
        Self { strategy }
    }
}

fn sourcing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[ \t]*(?:source|\.)\s+([^\s;&]+)").expect("sourcing regex is valid")
    })
}

impl SourceResolver for TextSourceResolver {
    fn sourced_uris(&self, text: &str, uri: &Url, root: Option<&Url>) -> HashSet<Url> {
        let mut uris = HashSet::new();
        for line in text.lines() {
            if let Some(captures) = sourcing_regex().captures(line) {
                let raw = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                for candidate in resolve_sourced_path(raw, uri, root, self.strategy) {
                    uris.insert(candidate);
                }
            }
        }
        log::trace!("Resolved {} sourced uris for {}", uris.len(), uri);
        uris
    }
}

/// Resolve one raw path token. Yields zero candidates for paths that depend
/// on runtime state, one for the file-relative resolution, and possibly a
/// second workspace-root-relative candidate for bare paths.
fn resolve_sourced_path(
    raw: &str,
    uri: &Url,
    root: Option<&Url>,
    strategy: SourcingStrategy,
) -> Vec<Url> {
    let path = strip_quotes(raw);
    if path.is_empty() || path.contains('$') {
        // Unexpanded variable: the target is only known at runtime
        return Vec::new();
    }

    let mut candidates = Vec::new();

    if path == "~" || path.starts_with("~/") {
        if let Some(home) = home::home_dir() {
            let expanded = match path.strip_prefix("~/") {
                Some(rest) => home.join(rest),
                None => home,
            };
            if let Some(resolved) = normalize_path(&expanded).and_then(|p| path_to_uri(&p)) {
                candidates.push(resolved);
            }
        }
        return candidates;
    }

    let Ok(file_path) = uri.to_file_path() else {
        return candidates;
    };
    let base = file_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| file_path.clone());

    if let Some(resolved) = normalize_path(&base.join(path)).and_then(|p| path_to_uri(&p)) {
        candidates.push(resolved);
    }

    if strategy == SourcingStrategy::FileRelativeAndRoot && !path.contains('/') {
        if let Some(root_path) = root.and_then(|r| r.to_file_path().ok()) {
            if let Some(resolved) =
                normalize_path(&root_path.join(path)).and_then(|p| path_to_uri(&p))
            {
                if !candidates.contains(&resolved) {
                    candidates.push(resolved);
                }
            }
        }
    }

    candidates
}

/// Strip one matching pair of surrounding quotes.
fn strip_quotes(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

/// Normalize a path by resolving `.` and `..` components.
fn normalize_path(path: &Path) -> Option<PathBuf> {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                if !components.is_empty() {
                    components.pop();
                }
            }
            std::path::Component::CurDir => {}
            c => components.push(c),
        }
    }

    if components.is_empty() {
        return None;
    }

    let mut result = PathBuf::new();
    for c in components {
        result.push(c);
    }
    Some(result)
}

fn path_to_uri(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}
