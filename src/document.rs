//! Markdown documents as an ordered list of top-level sections.
//!
//! Only enough structure to replace or append one section without touching
//! the others: a preamble, then `{header, body}` pairs split at level-1 and
//! level-2 ATX headings that sit outside fenced code blocks.

use crate::template::{backlink_line, SOURCE_CONTEXT_HEADER};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub header: String,
    pub body: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarkdownDoc {
    pub preamble: Vec<String>,
    pub sections: Vec<Section>,
    trailing_newline: bool,
    /// Marker of a fence still open at the end of the text.
    open_fence: Option<&'static str>,
}

/// `` ``` `` or `~~~` when `line` opens or closes a fenced code block.
pub fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Tracks the open fence across lines. A block is closed only by the marker
/// that opened it.
fn step_fence(open: &mut Option<&'static str>, line: &str) {
    match (*open, fence_marker(line)) {
        (None, Some(marker)) => *open = Some(marker),
        (Some(current), Some(marker)) if current == marker => *open = None,
        _ => {}
    }
}

/// Marker of the fenced block `text` leaves unclosed, if any.
pub fn unclosed_fence(text: &str) -> Option<&'static str> {
    let mut open = None;
    for line in text.lines() {
        step_fence(&mut open, line);
    }
    open
}

/// Level-1 or level-2 ATX heading.
fn is_top_level_header(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 2 {
        return false;
    }
    match line[hashes..].chars().next() {
        None => true,
        Some(c) => c == ' ' || c == '\t',
    }
}

fn headers_match(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

// Headers in a spliced body are demoted to level 3 and an unclosed fence is
// closed, so the body parses back as exactly one section.
fn body_lines(body: &str) -> Vec<String> {
    let trimmed = body.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return Vec::new();
    }
    let mut open = None;
    let mut lines = Vec::new();
    for line in trimmed.lines() {
        let was_open = open.is_some();
        step_fence(&mut open, line);
        if !was_open && open.is_none() && is_top_level_header(line) {
            let hashes = line.chars().take_while(|c| *c == '#').count();
            lines.push(format!("###{}", &line[hashes..]));
        } else {
            lines.push(line.to_string());
        }
    }
    if let Some(marker) = open {
        lines.push(marker.to_string());
    }
    lines
}

impl MarkdownDoc {
    pub fn parse(text: &str) -> Self {
        let mut doc = MarkdownDoc {
            trailing_newline: text.ends_with('\n'),
            ..Default::default()
        };
        let mut open = None;

        for line in text.lines() {
            step_fence(&mut open, line);
            if open.is_none() && is_top_level_header(line) {
                doc.sections.push(Section {
                    header: line.to_string(),
                    body: Vec::new(),
                });
                continue;
            }
            match doc.sections.last_mut() {
                Some(section) => section.body.push(line.to_string()),
                None => doc.preamble.push(line.to_string()),
            }
        }

        doc.open_fence = open;
        doc
    }

    pub fn render(&self) -> String {
        let mut lines: Vec<&str> = self.preamble.iter().map(String::as_str).collect();
        for section in &self.sections {
            lines.push(&section.header);
            lines.extend(section.body.iter().map(String::as_str));
        }
        let mut out = lines.join("\n");
        if self.trailing_newline && !out.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn find_section(&self, header: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| headers_match(&s.header, header))
    }

    fn last_line(&self) -> Option<&String> {
        self.sections
            .last()
            .and_then(|s| s.body.last().or(Some(&s.header)))
            .or_else(|| self.preamble.last())
    }

    fn tail_mut(&mut self) -> &mut Vec<String> {
        match self.sections.last_mut() {
            Some(section) => &mut section.body,
            None => &mut self.preamble,
        }
    }

    /// Replaces the section titled `header` (case-insensitive) or appends it.
    pub fn splice(&mut self, header: &str, body: &str) {
        let mut lines = body_lines(body);
        let header = header.trim().to_string();

        if let Some(index) = self
            .sections
            .iter()
            .position(|s| headers_match(&s.header, &header))
        {
            if index + 1 < self.sections.len() {
                lines.push(String::new());
            } else {
                self.open_fence = None;
            }
            self.sections[index] = Section {
                header,
                body: lines,
            };
            return;
        }

        if let Some(marker) = self.open_fence.take() {
            self.tail_mut().push(marker.to_string());
        }
        let needs_gap = self.last_line().map_or(false, |l| !l.trim().is_empty());
        if needs_gap {
            self.tail_mut().push(String::new());
        }
        self.sections.push(Section {
            header,
            body: lines,
        });
        self.trailing_newline = true;
    }
}

/// Inserts or replaces one section of `text`. Stable under repetition.
pub fn splice_section(text: &str, header: &str, body: &str) -> String {
    let mut doc = MarkdownDoc::parse(text);
    doc.splice(header, body);
    doc.render()
}

/// Makes sure the origin back-link survives in the `Source Context` section.
pub fn ensure_backlink(text: &str, origin_name: &str) -> String {
    let link = backlink_line(origin_name);
    if text.lines().any(|l| l.trim() == link) {
        return text.to_string();
    }

    let doc = MarkdownDoc::parse(text);
    let mut body = link;
    if let Some(existing) = doc.find_section(SOURCE_CONTEXT_HEADER) {
        let kept: Vec<&str> = existing
            .body
            .iter()
            .map(String::as_str)
            .filter(|l| !l.trim().is_empty())
            .collect();
        if !kept.is_empty() {
            body.push('\n');
            body.push_str(&kept.join("\n"));
        }
    }
    splice_section(text, SOURCE_CONTEXT_HEADER, &body)
}
