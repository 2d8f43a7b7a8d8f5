//
// config.rs
//
// Server configuration and LSP settings parsing
//

use crate::scanner::ScanParams;

/// Analyzer and scanner configuration, updated through LSP settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Cap on how many files a background scan will index
    pub background_analysis_max_files: usize,
    /// Glob pattern selecting workspace files to scan
    pub glob_pattern: String,
    /// When true, symbol queries consider every indexed file instead of
    /// only files connected through source edges
    pub include_all_workspace_symbols: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            background_analysis_max_files: 500,
            glob_pattern: "**/*@(.sh|.inc|.bash|.command)".to_string(),
            include_all_workspace_symbols: false,
        }
    }
}

impl ServerConfig {
    pub fn scan_params(&self) -> ScanParams {
        ScanParams {
            glob_pattern: self.glob_pattern.clone(),
            max_files: self.background_analysis_max_files,
        }
    }
}

/// Parse configuration from LSP settings. Accepts either the bare section
/// or the client's full settings object with a `bashIde` section.
pub fn parse_server_config(settings: &serde_json::Value) -> Option<ServerConfig> {
    let section = settings.get("bashIde").unwrap_or(settings);
    if !section.is_object() {
        return None;
    }

    let mut config = ServerConfig::default();

    if let Some(v) = section
        .get("backgroundAnalysisMaxFiles")
        .and_then(|v| v.as_u64())
    {
        config.background_analysis_max_files = v as usize;
    }
    if let Some(v) = section.get("globPattern").and_then(|v| v.as_str()) {
        config.glob_pattern = v.to_string();
    }
    if let Some(v) = section
        .get("includeAllWorkspaceSymbols")
        .and_then(|v| v.as_bool())
    {
        config.include_all_workspace_symbols = v;
    }

    log::info!("Configuration loaded from LSP settings:");
    log::info!(
        "  background_analysis_max_files: {}",
        config.background_analysis_max_files
    );
    log::info!("  glob_pattern: {}", config.glob_pattern);
    log::info!(
        "  include_all_workspace_symbols: {}",
        config.include_all_workspace_symbols
    );

    Some(config)
}
