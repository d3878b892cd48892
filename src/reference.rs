//! Dictionary and encyclopedia lookups for the define-on-demand flow.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::backlinks::BacklinkContext;
use crate::completion::body_snippet;
use crate::document::splice_section;
use crate::error::ReferenceError;
use crate::settings::{Dictionary, Settings};

pub const DEFINITION_HEADER: &str = "## Definition";
pub const USED_IN_CONTEXT_HEADER: &str = "## Used in Context";

const NO_DEFINITION: &str = "_No reference definition found._";
const NO_CONTEXT: &str = "_No notes link here yet._";

/// Base URLs of the reference APIs. Overridable so tests can point them at a
/// local mock server.
#[derive(Debug, Clone)]
pub struct ReferenceEndpoints {
    pub merriam_webster: String,
    pub wikipedia: String,
    pub duckduckgo: String,
}

impl Default for ReferenceEndpoints {
    fn default() -> Self {
        Self {
            merriam_webster: "https://www.dictionaryapi.com".to_string(),
            wikipedia: "https://en.wikipedia.org/api/rest_v1".to_string(),
            duckduckgo: "https://api.duckduckgo.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceSource {
    MerriamWebster,
    Wikipedia,
    DuckDuckGo,
}

impl fmt::Display for ReferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReferenceSource::MerriamWebster => "Merriam-Webster",
            ReferenceSource::Wikipedia => "Wikipedia",
            ReferenceSource::DuckDuckGo => "DuckDuckGo",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceDefinition {
    pub source: ReferenceSource,
    pub text: String,
}

#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    /// First non-empty short definition across the sources, in preference
    /// order. Lookup failures are logged, never returned.
    async fn lookup(&self, term: &str) -> Option<ReferenceDefinition>;
}

pub struct ReferenceClient {
    http: reqwest::Client,
    endpoints: ReferenceEndpoints,
    dictionary: Dictionary,
    merriam_webster_key: String,
    timeout: Duration,
}

impl ReferenceClient {
    pub fn new(endpoints: ReferenceEndpoints, settings: &Settings) -> Result<Self, ReferenceError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("wikidef/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoints,
            dictionary: settings.dictionary,
            merriam_webster_key: settings.merriam_webster_key.trim().to_string(),
            timeout: Duration::from_secs(settings.request_timeout_secs),
        })
    }

    async fn get_json(&self, url: Url) -> Result<Option<Value>, ReferenceError> {
        let response = self.http.get(url.clone()).timeout(self.timeout).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            debug!(
                "{} {} returned HTTP {}: {}",
                url.host_str().unwrap_or("reference"),
                url.path(),
                status.as_u16(),
                body_snippet(&text)
            );
            return Ok(None);
        }
        Ok(serde_json::from_str(&text).ok())
    }

    /// First `shortdef` of the first headword entry. Needs an API key.
    pub async fn merriam_webster(&self, term: &str) -> Result<Option<String>, ReferenceError> {
        if self.merriam_webster_key.is_empty() {
            return Ok(None);
        }
        let mut url = with_segments(
            &self.endpoints.merriam_webster,
            &["api", "v3", "references", self.dictionary.as_str(), "json", term],
        )?;
        url.query_pairs_mut()
            .append_pair("key", &self.merriam_webster_key);

        let Some(body) = self.get_json(url).await? else {
            return Ok(None);
        };
        // Unknown words come back as a list of spelling suggestions (strings)
        let text = body.as_array().and_then(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry["shortdef"].as_array())
                .filter_map(|defs| defs.first().and_then(Value::as_str))
                .find_map(non_empty)
        });
        Ok(text)
    }

    pub async fn wikipedia(&self, term: &str) -> Result<Option<String>, ReferenceError> {
        let title = term.trim().replace(' ', "_");
        let url = with_segments(&self.endpoints.wikipedia, &["page", "summary", &title])?;
        let Some(body) = self.get_json(url).await? else {
            return Ok(None);
        };
        if body["type"].as_str() == Some("disambiguation") {
            return Ok(None);
        }
        Ok(body["extract"].as_str().and_then(non_empty))
    }

    pub async fn duckduckgo(&self, term: &str) -> Result<Option<String>, ReferenceError> {
        let mut url = with_segments(&self.endpoints.duckduckgo, &[])?;
        url.query_pairs_mut()
            .append_pair("q", term.trim())
            .append_pair("format", "json")
            .append_pair("no_html", "1")
            .append_pair("skip_disambig", "1");
        let Some(body) = self.get_json(url).await? else {
            return Ok(None);
        };
        let text = body["AbstractText"]
            .as_str()
            .and_then(non_empty)
            .or_else(|| body["Definition"].as_str().and_then(non_empty));
        Ok(text)
    }
}

#[async_trait]
impl ReferenceLookup for ReferenceClient {
    async fn lookup(&self, term: &str) -> Option<ReferenceDefinition> {
        let sources = [
            ReferenceSource::MerriamWebster,
            ReferenceSource::Wikipedia,
            ReferenceSource::DuckDuckGo,
        ];
        for source in sources {
            let result = match source {
                ReferenceSource::MerriamWebster => self.merriam_webster(term).await,
                ReferenceSource::Wikipedia => self.wikipedia(term).await,
                ReferenceSource::DuckDuckGo => self.duckduckgo(term).await,
            };
            match result {
                Ok(Some(text)) => {
                    info!("Found a definition of \"{}\" on {}", term, source);
                    return Some(ReferenceDefinition { source, text });
                }
                Ok(None) => debug!("{} has no definition of \"{}\"", source, term),
                Err(e) => warn!("{} lookup for \"{}\" failed: {}", source, term, e),
            }
        }
        None
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// `base` with each segment appended, percent-encoded
fn with_segments(base: &str, segments: &[&str]) -> Result<Url, ReferenceError> {
    let mut url = Url::parse(base)?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| ReferenceError::InvalidBase(base.to_string()))?;
        path.pop_if_empty();
        if segments.is_empty() {
            path.push("");
        } else {
            path.extend(segments);
        }
    }
    Ok(url)
}

pub fn definition_body(definition: Option<&ReferenceDefinition>) -> String {
    match definition {
        Some(def) => format!("{}\n\n_Source: {}_", def.text, def.source),
        None => NO_DEFINITION.to_string(),
    }
}

pub fn context_body(contexts: &[BacklinkContext]) -> String {
    if contexts.is_empty() {
        return NO_CONTEXT.to_string();
    }
    contexts
        .iter()
        .map(|ctx| {
            let quoted: Vec<String> = ctx.excerpt.lines().map(|l| format!("> {}", l)).collect();
            format!("{}\n> ([[{}]])", quoted.join("\n"), ctx.source_name)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Splices the `Definition` and `Used in Context` sections into `content`.
pub fn apply_definition(
    content: &str,
    definition: Option<&ReferenceDefinition>,
    contexts: &[BacklinkContext],
) -> String {
    let with_definition = splice_section(content, DEFINITION_HEADER, &definition_body(definition));
    splice_section(&with_definition, USED_IN_CONTEXT_HEADER, &context_body(contexts))
}
