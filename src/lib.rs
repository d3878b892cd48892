pub mod backlinks;
pub mod commands;
pub mod completion;
pub mod document;
pub mod error;
pub mod generator;
pub mod notices;
pub mod reference;
pub mod retry;
pub mod sanitize;
pub mod server;
pub mod session;
pub mod settings;
pub mod template;
pub mod vault;
pub mod watcher;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

use crate::commands::{Commands, FuzzyPicker};
use crate::completion::ChatClient;
use crate::generator::Generator;
use crate::notices::NoticeLog;
use crate::reference::{ReferenceClient, ReferenceEndpoints};
use crate::server::ServerState;
use crate::session::Session;
use crate::settings::{JsonSettingsFile, Settings, SettingsStore};
use crate::vault::{DocumentStore, FsVault};

const MARKDOWN_EXTENSIONS: [&str; 2] = ["md", "markdown"];

/// A note as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteHandle {
    /// Vault-relative, `/`-separated.
    pub path: String,
    pub extension: String,
    pub base_name: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl NoteHandle {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        let path = normalize_note_path(&path.into());
        let file_name = path.rsplit('/').next().unwrap_or(&path);
        let (base_name, extension) = match file_name.rsplit_once('.') {
            Some((base, ext)) if !base.is_empty() => (base.to_string(), ext.to_string()),
            _ => (file_name.to_string(), String::new()),
        };
        Self {
            path,
            extension,
            base_name,
            size,
            created: None,
            modified: None,
        }
    }

    pub fn is_markdown(&self) -> bool {
        is_markdown_extension(&self.extension)
    }
}

fn is_markdown_extension(ext: &str) -> bool {
    MARKDOWN_EXTENSIONS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(ext))
}

pub fn is_markdown_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, is_markdown_extension)
}

/// Forward slashes, no leading `./` or `/`.
pub fn normalize_note_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    loop {
        if let Some(rest) = normalized.strip_prefix("./") {
            normalized = rest.to_string();
        } else if let Some(rest) = normalized.strip_prefix('/') {
            normalized = rest.to_string();
        } else {
            return normalized;
        }
    }
}

/// Trims whitespace plus the invisible characters editors leave behind.
pub(crate) fn trim_effective(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '\u{00A0}' || c == '\u{FEFF}')
}

pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Values given on the command line that win over the settings file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
}

/// Everything wired together for one vault.
pub struct App {
    pub vault: Arc<FsVault>,
    pub settings: Arc<RwLock<Settings>>,
    pub notices: Arc<NoticeLog>,
    pub generator: Arc<Generator>,
    pub commands: Arc<Commands>,
}

impl App {
    pub fn open(vault_root: &Path, overrides: SettingsOverrides) -> Result<Self> {
        Self::open_with_endpoints(vault_root, overrides, ReferenceEndpoints::default())
    }

    pub fn open_with_endpoints(
        vault_root: &Path,
        overrides: SettingsOverrides,
        endpoints: ReferenceEndpoints,
    ) -> Result<Self> {
        if !vault_root.is_dir() {
            anyhow::bail!("vault folder {} does not exist", vault_root.display());
        }

        let store = JsonSettingsFile::in_vault(vault_root);
        let mut settings = store.load();
        if let Some(key) = overrides.api_key.filter(|k| !k.trim().is_empty()) {
            settings.api_key = key;
        }
        if let Some(url) = overrides.api_base_url {
            settings.api_base_url = url;
        }
        settings.normalize();
        info!(
            "Loaded settings from {} (api key {})",
            store.path().display(),
            if settings.has_api_key() { "set" } else { "missing" }
        );

        let vault = Arc::new(FsVault::new(PathBuf::from(vault_root)));
        let notices = Arc::new(NoticeLog::new());
        let completer =
            Arc::new(ChatClient::from_settings(&settings).context("failed to build HTTP client")?);
        let reference = Arc::new(
            ReferenceClient::new(endpoints, &settings).context("failed to build HTTP client")?,
        );
        let session = Session::new(Duration::from_secs(settings.cooldown_secs));
        let settings = Arc::new(RwLock::new(settings));

        let generator = Arc::new(Generator::new(
            vault.clone(),
            completer,
            notices.clone(),
            session,
            Arc::clone(&settings),
        ));
        let commands = Arc::new(Commands::new(
            Arc::clone(&generator),
            reference,
            Arc::new(FuzzyPicker),
        ));

        Ok(Self {
            vault,
            settings,
            notices,
            generator,
            commands,
        })
    }

    /// Marks `path` as the active note.
    pub async fn activate(&self, path: &str) -> Result<NoteHandle> {
        let note = self
            .vault
            .stat(path)
            .await
            .with_context(|| format!("cannot open note {}", path))?;
        self.generator.session().record_navigation(&note);
        Ok(note)
    }

    pub fn server_state(&self) -> ServerState {
        ServerState {
            commands: Arc::clone(&self.commands),
            notices: Arc::clone(&self.notices),
        }
    }
}

/// Watches the vault on disk until Ctrl-C.
pub async fn run_watch(app: App) -> Result<()> {
    let (_watcher, events) =
        watcher::watch_vault(app.vault.root()).context("failed to start file watcher")?;
    let dispatch = watcher::dispatch_events(
        Arc::clone(&app.generator),
        Arc::clone(&app.vault),
        events,
    );

    tokio::select! {
        _ = dispatch => {}
        _ = tokio::signal::ctrl_c() => info!("Stopping"),
    }
    app.generator.session().clear();
    Ok(())
}

/// Serves the HTTP endpoint and watches the vault until Ctrl-C.
pub async fn run_serve(app: App, port: u16) -> Result<()> {
    let (_watcher, events) =
        watcher::watch_vault(app.vault.root()).context("failed to start file watcher")?;
    let dispatch = watcher::dispatch_events(
        Arc::clone(&app.generator),
        Arc::clone(&app.vault),
        events,
    );
    let server = server::serve(app.server_state(), port);

    tokio::select! {
        result = server => result?,
        _ = dispatch => {}
        _ = tokio::signal::ctrl_c() => info!("Stopping"),
    }
    app.generator.session().clear();
    Ok(())
}
