use thiserror::Error;

/// Failures raised by a [`crate::vault::DocumentStore`].
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("note not found: {0}")]
    NotFound(String),

    #[error("invalid note path: {0}")]
    InvalidPath(String),

    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl VaultError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return VaultError::NotFound(path.into());
        }
        VaultError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures raised while talking to the chat-completion endpoint.
///
/// Only conditions that make the whole strategy chain pointless surface
/// here; a single strategy failing is not an error.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Failures raised by the dictionary / encyclopedia lookups.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("invalid reference URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("reference base URL cannot take a path: {0}")]
    InvalidBase(String),

    #[error("reference request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Why a user command could not run.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no note is active")]
    NoActiveNote,

    #[error("no origin note is known for {0}")]
    NoOrigin(String),

    #[error("no note matches \"{0}\"")]
    NoMatch(String),

    #[error("{0} is busy")]
    Busy(String),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Failures raised while persisting settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to write settings to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}
