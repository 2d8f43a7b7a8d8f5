//
// scanner.rs
//
// Bounded background scan: enumerate workspace files matching the configured
// glob pattern, feed each one through the analyzer, and yield between files
// so interactive queries interleave with a large scan.
//

use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tower_lsp::lsp_types::Url;
use walkdir::WalkDir;

use crate::analyzer::Analyzer;

/// Interpreters whose scripts this server can analyze. A shebang naming
/// anything else marks the file as out of scope.
const SUPPORTED_INTERPRETERS: &[&str] = &["sh", "bash", "dash", "ksh"];

const DEFAULT_SUFFIXES: &[&str] = &[".sh", ".bash", ".inc", ".command"];

#[derive(Debug, Clone)]
pub struct ScanParams {
    pub glob_pattern: String,
    pub max_files: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub files_parsed: usize,
}

pub struct BackgroundScanner {
    analyzer: Arc<Analyzer>,
    cancel: CancellationToken,
}

impl BackgroundScanner {
    pub fn new(analyzer: Arc<Analyzer>) -> Self {
        Self {
            analyzer,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop an in-flight scan at the next file boundary.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Enumerate files under `root` matching the glob pattern, analyzing at
    /// most `max_files` of them. Enumeration itself stops once the cap is
    /// reached, so a huge workspace never pays the full directory-walk cost.
    /// Per-file failures are non-fatal; a systemic enumeration failure
    /// degrades to zero files plus one aggregated warning.
    pub async fn scan(&self, root: &Path, params: &ScanParams) -> ScanResult {
        let matcher = SuffixMatcher::from_glob(&params.glob_pattern);

        let mut files_parsed = 0;
        let mut matched = 0;
        let mut enumeration_errors = 0;

        let mut entries = WalkDir::new(root).follow_links(false).into_iter();
        loop {
            if matched >= params.max_files || self.cancel.is_cancelled() {
                break;
            }
            let Some(entry) = entries.next() else {
                break;
            };
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::trace!("Enumeration error under {}: {}", root.display(), err);
                    enumeration_errors += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() || !matcher.matches(entry.path()) {
                continue;
            }
            matched += 1;

            match self.analyze_path(entry.path()) {
                Ok(true) => files_parsed += 1,
                Ok(false) => {}
                Err(err) => {
                    log::warn!("Background scan failed for {}: {}", entry.path().display(), err);
                }
            }

            // Cooperative scheduling: let interactive queries run between files
            tokio::task::yield_now().await;
        }

        if enumeration_errors > 0 {
            log::warn!(
                "Background scan hit {} enumeration errors under {}; indexed {} files",
                enumeration_errors,
                root.display(),
                files_parsed
            );
        } else {
            log::info!(
                "Background scan indexed {} files under {}",
                files_parsed,
                root.display()
            );
        }

        ScanResult { files_parsed }
    }

    /// Returns Ok(true) when the file was analyzed, Ok(false) when it was
    /// skipped because its shebang names an unsupported interpreter.
    fn analyze_path(&self, path: &Path) -> anyhow::Result<bool> {
        let text = std::fs::read_to_string(path)?;

        if let Some(interpreter) = shebang_interpreter(&text) {
            if !SUPPORTED_INTERPRETERS.contains(&interpreter.as_str()) {
                log::trace!(
                    "Skipping {} (unsupported interpreter: {})",
                    path.display(),
                    interpreter
                );
                return Ok(false);
            }
        }

        let uri = Url::from_file_path(path)
            .map_err(|_| anyhow!("not an absolute file path: {}", path.display()))?;
        self.analyzer.analyze_file(&uri, &text);
        Ok(true)
    }
}

/// Interpreter named by a leading shebang: `#!/usr/bin/env bash` and
/// `#!/bin/bash` both yield "bash". None when there is no shebang.
pub fn shebang_interpreter(text: &str) -> Option<String> {
    let first_line = text.lines().next()?;
    let rest = first_line.strip_prefix("#!")?;
    let mut parts = rest.trim().split_whitespace();
    let program = parts.next()?;
    let program_name = program.rsplit('/').next().unwrap_or(program);
    if program_name == "env" {
        parts
            .next()
            .map(|arg| arg.rsplit('/').next().unwrap_or(arg).to_string())
    } else {
        Some(program_name.to_string())
    }
}

/// Accepted file suffixes derived from the configured glob pattern. The
/// pattern language is reduced to its suffix alternation: `**/*@(.sh|.inc)`,
/// `**/*.{sh,inc}` and plain `**/*.sh` all yield their suffix lists; an
/// unparseable pattern falls back to the default suffix set.
struct SuffixMatcher {
    suffixes: Vec<String>,
}

impl SuffixMatcher {
    fn from_glob(pattern: &str) -> Self {
        let suffixes = parse_suffix_alternation(pattern).unwrap_or_else(|| {
            log::trace!("Unrecognized glob pattern \"{pattern}\", using default suffixes");
            DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect()
        });
        Self { suffixes }
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }
}

fn parse_suffix_alternation(pattern: &str) -> Option<Vec<String>> {
    if let Some(start) = pattern.find("@(") {
        let rest = &pattern[start + 2..];
        let end = rest.find(')')?;
        return Some(split_alternatives(&rest[..end], '|'));
    }
    if let Some(start) = pattern.find('{') {
        let rest = &pattern[start + 1..];
        let end = rest.find('}')?;
        return Some(split_alternatives(&rest[..end], ','));
    }
    if let Some(position) = pattern.rfind("*.") {
        let suffix = &pattern[position + 1..];
        if !suffix.contains(['*', '?', '[']) {
            return Some(vec![suffix.to_string()]);
        }
    }
    None
}

fn split_alternatives(list: &str, separator: char) -> Vec<String> {
    list.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            // Suffix matching needs the dot even when the pattern omits it,
            // as in `*.{sh,bash}`
            if s.starts_with('.') {
                s.to_string()
            } else {
                format!(".{s}")
            }
        })
        .collect()
}
