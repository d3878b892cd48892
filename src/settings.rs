use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::SettingsError;

const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_PRIMARY_MODEL: &str = "gpt-4o-mini";
const DEFAULT_FALLBACK_MODEL: &str = "gpt-4o";
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ORIGIN_CHAR_LIMIT: usize = 12_000;
const DEFAULT_MAX_OUTPUT_CHARS: usize = 8_000;
const DEFAULT_DEBOUNCE_MS: u64 = 400;
const DEFAULT_COOLDOWN_SECS: u64 = 10;
const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_BACKLINK_LIMIT: usize = 3;

/// Folder inside the vault holding our own files.
pub const SETTINGS_DIR: &str = ".wikidef";
pub const SETTINGS_FILE: &str = "settings.json";

/// Merriam-Webster dictionary to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dictionary {
    #[default]
    Collegiate,
    Learners,
    Medical,
    Spanish,
    Thesaurus,
}

impl Dictionary {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dictionary::Collegiate => "collegiate",
            Dictionary::Learners => "learners",
            Dictionary::Medical => "medical",
            Dictionary::Spanish => "spanish",
            Dictionary::Thesaurus => "thesaurus",
        }
    }
}

impl fmt::Display for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub api_key: String,
    pub api_base_url: String,
    pub primary_model: String,
    pub fallback_model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub origin_char_limit: usize,
    pub auto_generate: bool,
    pub write_fallback_on_failure: bool,
    pub allow_code_blocks: bool,
    pub allow_raw_html: bool,
    pub max_output_chars: usize,
    pub debounce_ms: u64,
    pub cooldown_secs: u64,
    pub retry_delay_ms: u64,
    pub dictionary: Dictionary,
    pub merriam_webster_key: String,
    pub backlink_limit: usize,
    pub custom_prompt: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            primary_model: DEFAULT_PRIMARY_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            origin_char_limit: DEFAULT_ORIGIN_CHAR_LIMIT,
            auto_generate: true,
            write_fallback_on_failure: true,
            allow_code_blocks: false,
            allow_raw_html: false,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            dictionary: Dictionary::default(),
            merriam_webster_key: String::new(),
            backlink_limit: DEFAULT_BACKLINK_LIMIT,
            custom_prompt: None,
        }
    }
}

// Keys stay out of logs
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &redact(&self.api_key))
            .field("api_base_url", &self.api_base_url)
            .field("primary_model", &self.primary_model)
            .field("fallback_model", &self.fallback_model)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("origin_char_limit", &self.origin_char_limit)
            .field("auto_generate", &self.auto_generate)
            .field("write_fallback_on_failure", &self.write_fallback_on_failure)
            .field("allow_code_blocks", &self.allow_code_blocks)
            .field("allow_raw_html", &self.allow_raw_html)
            .field("max_output_chars", &self.max_output_chars)
            .field("debounce_ms", &self.debounce_ms)
            .field("cooldown_secs", &self.cooldown_secs)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("dictionary", &self.dictionary)
            .field("merriam_webster_key", &redact(&self.merriam_webster_key))
            .field("backlink_limit", &self.backlink_limit)
            .field("custom_prompt", &self.custom_prompt.is_some())
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.trim().is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl Settings {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Clamps numeric fields into usable ranges and repairs blank values.
    pub fn normalize(&mut self) {
        let defaults = Settings::default();

        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, 300);
        if self.origin_char_limit == 0 {
            self.origin_char_limit = defaults.origin_char_limit;
        }
        if self.max_output_chars < 200 {
            self.max_output_chars = 200;
        }
        self.backlink_limit = self.backlink_limit.clamp(1, 20);
        if self.api_base_url.trim().is_empty() {
            self.api_base_url = defaults.api_base_url;
        }
        if self.primary_model.trim().is_empty() {
            self.primary_model = defaults.primary_model;
        }
        if self.fallback_model.trim().is_empty() {
            self.fallback_model = defaults.fallback_model;
        }
        if self
            .custom_prompt
            .as_deref()
            .map_or(false, |p| p.trim().is_empty())
        {
            self.custom_prompt = None;
        }
    }
}

/// Host persistence for the settings record.
pub trait SettingsStore: Send + Sync {
    /// Stored values merged over defaults.
    fn load(&self) -> Settings;
    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
}

/// Settings kept as pretty JSON at `<vault>/.wikidef/settings.json`.
pub struct JsonSettingsFile {
    path: PathBuf,
}

impl JsonSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_vault(vault_root: &Path) -> Self {
        Self::new(vault_root.join(SETTINGS_DIR).join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsFile {
    fn load(&self) -> Settings {
        let mut settings = if self.path.exists() {
            match std::fs::read_to_string(&self.path)
                .map_err(|e| e.to_string())
                .and_then(|content| {
                    serde_json::from_str::<Settings>(&content).map_err(|e| e.to_string())
                }) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(
                        "Ignoring unreadable settings file {}: {}",
                        self.path.display(),
                        e
                    );
                    Settings::default()
                }
            }
        } else {
            Settings::default()
        };
        settings.normalize();
        settings
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, content).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_record_is_merged_over_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"apiKey":"sk-test","maxOutputChars":500}"#).unwrap();
        assert_eq!(settings.api_key, "sk-test");
        assert_eq!(settings.max_output_chars, 500);
        assert_eq!(settings.primary_model, "gpt-4o-mini");
        assert!(settings.write_fallback_on_failure);
        assert!(!settings.allow_code_blocks);
    }

    #[test]
    fn normalize_repairs_blank_and_out_of_range_values() {
        let mut settings = Settings {
            primary_model: "  ".to_string(),
            temperature: 9.0,
            max_output_chars: 3,
            backlink_limit: 0,
            custom_prompt: Some(" ".to_string()),
            ..Settings::default()
        };
        settings.normalize();
        assert_eq!(settings.primary_model, "gpt-4o-mini");
        assert_eq!(settings.temperature, 2.0);
        assert_eq!(settings.max_output_chars, 200);
        assert_eq!(settings.backlink_limit, 1);
        assert!(settings.custom_prompt.is_none());
    }

    #[test]
    fn debug_output_redacts_keys() {
        let settings = Settings {
            api_key: "sk-secret".to_string(),
            ..Settings::default()
        };
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn json_file_round_trips_and_tolerates_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSettingsFile::in_vault(dir.path());
        assert_eq!(store.load().debounce_ms, 400);

        let settings = Settings {
            dictionary: Dictionary::Learners,
            backlink_limit: 5,
            ..Settings::default()
        };
        store.save(&settings).unwrap();
        let loaded = store.load();
        assert_eq!(loaded.dictionary, Dictionary::Learners);
        assert_eq!(loaded.backlink_limit, 5);

        std::fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load().backlink_limit, 3);
    }
}
