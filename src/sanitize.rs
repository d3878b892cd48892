use regex::Regex;
use std::sync::OnceLock;

use crate::document::unclosed_fence;
use crate::template::truncate_chars;

/// Appended to output cut at the configured length.
pub const TRUNCATION_NOTICE: &str = "\n\n> [!note] Definition truncated.";

const BLOCKED_TAGS: [&str; 5] = ["script", "iframe", "object", "embed", "style"];

#[derive(Debug, Clone, Copy)]
pub struct SanitizeOptions {
    pub allow_code_blocks: bool,
    pub allow_raw_html: bool,
    pub max_chars: usize,
}

impl From<&crate::settings::Settings> for SanitizeOptions {
    fn from(settings: &crate::settings::Settings) -> Self {
        Self {
            allow_code_blocks: settings.allow_code_blocks,
            allow_raw_html: settings.allow_raw_html,
            max_chars: settings.max_output_chars,
        }
    }
}

fn fence_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?ms)^[ \t]*```.*?(?:^[ \t]*```[^\n]*\n?|\z)")
                .expect("valid backtick fence regex"),
            Regex::new(r"(?ms)^[ \t]*~~~.*?(?:^[ \t]*~~~[^\n]*\n?|\z)")
                .expect("valid tilde fence regex"),
        ]
    })
}

// The regex crate has no backreferences, so one pair pattern per tag.
fn tag_patterns() -> &'static Vec<(Regex, Regex)> {
    static PATTERNS: OnceLock<Vec<(Regex, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        BLOCKED_TAGS
            .iter()
            .map(|tag| {
                let pair = Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
                    .expect("valid tag pair regex");
                let single = Regex::new(&format!(r"(?i)</?{tag}\b[^>]*>"))
                    .expect("valid single tag regex");
                (pair, single)
            })
            .collect()
    })
}

/// Removes fenced code blocks. An unclosed fence runs to the end of the text.
pub fn strip_code_fences(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in fence_patterns() {
        out = pattern.replace_all(&out, "").into_owned();
    }
    out
}

/// Removes executable/embeddable tags, including unpaired or void forms.
pub fn strip_blocked_html(text: &str) -> String {
    let mut out = text.to_string();
    for (pair, single) in tag_patterns() {
        out = pair.replace_all(&out, "").into_owned();
        out = single.replace_all(&out, "").into_owned();
    }
    out
}

/// Returns `text` unchanged when it fits, otherwise exactly `max_chars`
/// characters followed by [`TRUNCATION_NOTICE`]. A fence left open by the
/// cut is closed before the notice.
pub fn enforce_max_length(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = truncate_chars(text, max_chars).to_string();
    if let Some(marker) = unclosed_fence(&out) {
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(marker);
    }
    out.push_str(TRUNCATION_NOTICE);
    out
}

/// Model output is untrusted: it ends up rendered by the host's plugins.
pub fn sanitize_output(text: &str, options: &SanitizeOptions) -> String {
    let mut out = text.to_string();
    if !options.allow_code_blocks {
        out = strip_code_fences(&out);
    }
    if !options.allow_raw_html {
        out = strip_blocked_html(&out);
    }
    enforce_max_length(&out, options.max_chars)
}
