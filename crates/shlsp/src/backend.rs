//
// backend.rs
//
// The tower-lsp protocol layer: translates LSP requests into analyzer
// queries. All analysis state lives in the analyzer; this layer only owns
// the document store and configuration.
//

use std::sync::Arc;

use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::analyzer::Analyzer;
use crate::config::parse_server_config;
use crate::scanner::BackgroundScanner;
use crate::state::WorldState;

pub struct Backend {
    client: Client,
    state: Arc<RwLock<WorldState>>,
    analyzer: Arc<Analyzer>,
    scanner: Arc<BackgroundScanner>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        let world = WorldState::new();
        let analyzer = world.analyzer.clone();
        let scanner = Arc::new(BackgroundScanner::new(analyzer.clone()));
        Self {
            client,
            state: Arc::new(RwLock::new(world)),
            analyzer,
            scanner,
        }
    }

    /// Scan all workspace folders in a spawned task so initialization never
    /// blocks on a large workspace.
    fn spawn_workspace_scan(&self) {
        let state = self.state.clone();
        let scanner = self.scanner.clone();
        tokio::spawn(async move {
            let (folders, params) = {
                let state = state.read().await;
                (state.workspace_folders.clone(), state.config.scan_params())
            };

            let mut files_parsed = 0;
            for folder in folders {
                let Ok(path) = folder.to_file_path() else {
                    log::warn!("Skipping non-file workspace folder: {folder}");
                    continue;
                };
                files_parsed += scanner.scan(&path, &params).await.files_parsed;
            }
            log::info!("Workspace scan complete: {files_parsed} files indexed");
        });
    }

    async fn reanalyze_and_publish(&self, uri: Url, text: String, version: Option<i32>) {
        let diagnostics = self.analyzer.analyze_file(&uri, &text);
        self.client
            .publish_diagnostics(uri, diagnostics, version)
            .await;
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing shlsp");

        let mut state = self.state.write().await;

        if let Some(folders) = params.workspace_folders {
            for folder in folders {
                log::info!("Adding workspace folder: {}", folder.uri);
                state.workspace_folders.push(folder.uri);
            }
        } else if let Some(root_uri) = params.root_uri {
            log::info!("Adding root URI as workspace folder: {root_uri}");
            state.workspace_folders.push(root_uri);
        }

        self.analyzer
            .set_workspace_root(state.workspace_folders.first().cloned());

        drop(state);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                document_symbol_provider: Some(OneOf::Left(true)),
                workspace_symbol_provider: Some(OneOf::Left(true)),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec![String::from("$")]),
                    ..Default::default()
                }),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                rename_provider: Some(OneOf::Right(RenameOptions {
                    prepare_provider: Some(true),
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                })),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from("shlsp"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("shlsp initialized");
        self.spawn_workspace_scan();
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!("shlsp shutting down");
        self.scanner.shutdown();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = params.text_document.text;
        let version = params.text_document.version;

        {
            let mut state = self.state.write().await;
            state.open_document(uri.clone(), &text, Some(version));
        }

        self.reanalyze_and_publish(uri, text, Some(version)).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;

        let changed = {
            let mut state = self.state.write().await;
            for change in params.content_changes {
                state.apply_change(&uri, change);
            }
            if let Some(doc) = state.documents.get_mut(&uri) {
                doc.version = Some(params.text_document.version);
            }
            state
                .get_document(&uri)
                .map(|doc| (doc.text(), doc.version))
        };

        if let Some((text, version)) = changed {
            self.reanalyze_and_publish(uri, text, version).await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        // The file stays indexed; only the editor's view goes away
        let mut state = self.state.write().await;
        state.close_document(&params.text_document.uri);
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        for change in params.changes {
            if change.typ == FileChangeType::DELETED {
                log::trace!("Dropping deleted file from the index: {}", change.uri);
                self.analyzer.remove_file(&change.uri);
                continue;
            }
            let Ok(path) = change.uri.to_file_path() else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    self.analyzer.analyze_file(&change.uri, &text);
                }
                Err(err) => {
                    log::warn!("Could not re-read changed file {}: {}", change.uri, err);
                }
            }
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let Some(config) = parse_server_config(&params.settings) else {
            log::warn!("Ignoring unrecognized configuration payload");
            return;
        };

        self.analyzer
            .set_include_all_workspace_symbols(config.include_all_workspace_symbols);

        let changed_scan_inputs = {
            let mut state = self.state.write().await;
            let changed = state.config.glob_pattern != config.glob_pattern
                || state.config.background_analysis_max_files
                    != config.background_analysis_max_files;
            state.config = config;
            changed
        };

        // Last write wins per file between this rescan and interactive edits
        if changed_scan_inputs {
            self.spawn_workspace_scan();
        }
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        let Some(word) = self.analyzer.word_at(&uri, position) else {
            return Ok(None);
        };

        let locations: Vec<Location> = self
            .analyzer
            .find_declarations(&uri, &word, position, true)
            .into_iter()
            .map(|symbol| symbol.location)
            .collect();

        if locations.is_empty() {
            Ok(None)
        } else {
            Ok(Some(GotoDefinitionResponse::Array(locations)))
        }
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        let Some(word) = self.analyzer.word_at(&uri, position) else {
            return Ok(None);
        };

        Ok(Some(self.analyzer.find_references(&word)))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let symbols = self
            .analyzer
            .declarations_for_file(&params.text_document.uri);
        Ok(Some(DocumentSymbolResponse::Flat(symbols)))
    }

    async fn symbol(
        &self,
        params: WorkspaceSymbolParams,
    ) -> Result<Option<Vec<SymbolInformation>>> {
        Ok(Some(self.analyzer.fuzzy_find_declarations(&params.query)))
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        let prefix = self.analyzer.word_at(&uri, position).unwrap_or_default();
        let items: Vec<CompletionItem> = self
            .analyzer
            .find_declarations(&uri, &prefix, position, false)
            .into_iter()
            .map(|symbol| CompletionItem {
                label: symbol.name.clone(),
                kind: Some(if symbol.kind == SymbolKind::FUNCTION {
                    CompletionItemKind::FUNCTION
                } else {
                    CompletionItemKind::VARIABLE
                }),
                detail: symbol.container_name.clone(),
                ..Default::default()
            })
            .collect();

        if items.is_empty() {
            Ok(None)
        } else {
            Ok(Some(CompletionResponse::Array(items)))
        }
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        // Fall back to the enclosing command's name, so hovering anywhere in
        // a call still resolves the function being invoked
        let word = match self
            .analyzer
            .word_at(&uri, position)
            .or_else(|| self.analyzer.command_at(&uri, position))
        {
            Some(word) => word,
            None => return Ok(None),
        };

        let Some(symbol) = self
            .analyzer
            .find_declarations(&uri, &word, position, true)
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let mut value = format!("```sh\n{word}\n```");
        if let Some(docs) = self
            .analyzer
            .comments_above(&symbol.location.uri, symbol.location.range.start.line)
        {
            value.push_str("\n---\n");
            value.push_str(&docs);
        }

        Ok(Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value,
            }),
            range: None,
        }))
    }

    async fn prepare_rename(
        &self,
        params: TextDocumentPositionParams,
    ) -> Result<Option<PrepareRenameResponse>> {
        let result = self
            .analyzer
            .prepare_rename(&params.text_document.uri, params.position)
            .map(|(range, placeholder)| PrepareRenameResponse::RangeWithPlaceholder {
                range,
                placeholder,
            });
        Ok(result)
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        match self.analyzer.rename(&uri, position, &params.new_name) {
            Ok(changes) if changes.is_empty() => Ok(None),
            Ok(changes) => Ok(Some(WorkspaceEdit {
                changes: Some(changes),
                ..Default::default()
            })),
            Err(err) => Err(tower_lsp::jsonrpc::Error::invalid_params(err.to_string())),
        }
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}
