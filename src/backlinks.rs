//! Finds notes that link to a term and quotes the text around each link.
//!
//! Three sources are tried in order: the host's structured backlink index
//! (with line positions), its resolved-link reverse index, and finally a
//! scan of every markdown note for the literal wiki-link.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::vault::{DocumentStore, LinkOccurrence};
use crate::NoteHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklinkContext {
    pub source_path: String,
    pub source_name: String,
    pub excerpt: String,
}

/// Matches `[[term]]`, `[[term|alias]]` and `[[term#heading]]`.
pub fn wiki_link_pattern(term: &str) -> Result<Regex, regex::Error> {
    let pattern = format!(r"\[\[\s*{}\s*(?:[|#][^\]]*)?\]\]", regex::escape(term.trim()));
    RegexBuilder::new(&pattern).case_insensitive(true).build()
}

/// One line before through one line after `line`, blank lines dropped.
pub fn excerpt_around_line(content: &str, line: usize) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    if line >= lines.len() {
        return None;
    }
    let start = line.saturating_sub(1);
    let end = (line + 1).min(lines.len() - 1);
    let excerpt = lines[start..=end]
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if excerpt.is_empty() {
        None
    } else {
        Some(excerpt)
    }
}

// Sentence of `line` that contains byte offset `at`
fn sentence_around(line: &str, at: usize) -> &str {
    let mut start = 0;
    for (i, c) in line.char_indices() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        let followed_by_space = line[end..].starts_with(char::is_whitespace);
        if !followed_by_space {
            continue;
        }
        if at < end {
            return line[start..end].trim();
        }
        start = end;
    }
    line[start..].trim()
}

/// First sentence containing a link to the term, taken from the line the
/// link sits on.
pub fn excerpt_from_text(content: &str, pattern: &Regex) -> Option<String> {
    content.lines().find_map(|line| {
        pattern
            .find(line)
            .map(|m| sentence_around(line, m.start()).to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Up to `limit` notes linking to `target`, each with a short excerpt.
/// Notes that fail to read are skipped.
pub async fn find_backlink_contexts(
    store: &dyn DocumentStore,
    target: &NoteHandle,
    limit: usize,
) -> Vec<BacklinkContext> {
    if limit == 0 {
        return Vec::new();
    }

    if let Some(occurrences) = store.backlinks(target).filter(|o| !o.is_empty()) {
        let found = from_backlink_index(store, target, &occurrences, limit).await;
        if !found.is_empty() {
            return found;
        }
    }

    let pattern = match wiki_link_pattern(&target.base_name) {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!("Cannot search for links to {}: {}", target.base_name, e);
            return Vec::new();
        }
    };

    if let Some(resolved) = store.resolved_links() {
        let mut sources: Vec<String> = resolved
            .into_iter()
            .filter(|(_, targets)| targets.get(&target.path).copied().unwrap_or(0) > 0)
            .map(|(source, _)| source)
            .collect();
        sources.sort();
        let candidates: Vec<NoteHandle> = sources
            .into_iter()
            .map(|path| NoteHandle::new(path, 0))
            .collect();
        let found = scan_notes(store, target, &candidates, &pattern, limit).await;
        if !found.is_empty() {
            return found;
        }
    }

    match store.list_notes().await {
        Ok(notes) => scan_notes(store, target, &notes, &pattern, limit).await,
        Err(e) => {
            warn!("Could not list notes for backlink search: {}", e);
            Vec::new()
        }
    }
}

async fn from_backlink_index(
    store: &dyn DocumentStore,
    target: &NoteHandle,
    occurrences: &[LinkOccurrence],
    limit: usize,
) -> Vec<BacklinkContext> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();

    for occurrence in occurrences {
        if found.len() >= limit {
            break;
        }
        if occurrence.source == target.path || !seen.insert(occurrence.source.clone()) {
            continue;
        }
        let source = NoteHandle::new(occurrence.source.clone(), 0);
        let content = match store.read(&source).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping backlink source {}: {}", source.path, e);
                continue;
            }
        };
        if let Some(excerpt) = excerpt_around_line(&content, occurrence.line) {
            found.push(BacklinkContext {
                source_path: source.path,
                source_name: source.base_name,
                excerpt,
            });
        }
    }
    found
}

async fn scan_notes(
    store: &dyn DocumentStore,
    target: &NoteHandle,
    candidates: &[NoteHandle],
    pattern: &Regex,
    limit: usize,
) -> Vec<BacklinkContext> {
    let mut found = Vec::new();

    for note in candidates {
        if found.len() >= limit {
            break;
        }
        if note.path == target.path || !note.is_markdown() {
            continue;
        }
        let content = match store.read(note).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping backlink source {}: {}", note.path, e);
                continue;
            }
        };
        if let Some(excerpt) = excerpt_from_text(&content, pattern) {
            debug!("Found backlink to {} in {}", target.path, note.path);
            found.push(BacklinkContext {
                source_path: note.path.clone(),
                source_name: note.base_name.clone(),
                excerpt,
            });
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::MemoryVault;
    use std::collections::HashMap;

    #[test]
    fn pattern_matches_alias_and_heading_forms() {
        let pattern = wiki_link_pattern("Entropy").unwrap();
        assert!(pattern.is_match("see [[Entropy]]"));
        assert!(pattern.is_match("see [[entropy|disorder]]"));
        assert!(pattern.is_match("see [[Entropy#History]]"));
        assert!(!pattern.is_match("see [[Entropy production]]"));
        assert!(!pattern.is_match("Entropy"));
    }

    #[test]
    fn pattern_escapes_regex_characters() {
        let pattern = wiki_link_pattern("C++ (language)").unwrap();
        assert!(pattern.is_match("I like [[C++ (language)]]."));
    }

    #[test]
    fn text_excerpt_is_the_sentence_with_the_link() {
        let pattern = wiki_link_pattern("Entropy").unwrap();
        let content = "# Physics\nHeat flows. Then [[Entropy]] rises! Later it is done.\n";
        assert_eq!(
            excerpt_from_text(content, &pattern).as_deref(),
            Some("Then [[Entropy]] rises!")
        );
    }

    #[test]
    fn line_excerpt_spans_neighbours() {
        let content = "one\ntwo [[X]]\nthree\nfour";
        assert_eq!(excerpt_around_line(content, 1).as_deref(), Some("one\ntwo [[X]]\nthree"));
        assert_eq!(excerpt_around_line(content, 0).as_deref(), Some("one\ntwo [[X]]"));
        assert_eq!(excerpt_around_line(content, 9), None);
    }

    #[tokio::test]
    async fn scan_stops_at_limit_and_skips_unreadable() {
        let vault = MemoryVault::new();
        let target = vault.insert("Entropy.md", "");
        vault.insert("a.md", "First [[Entropy]] mention.");
        vault.insert("b.md", "Second [[Entropy]] mention.");
        vault.insert("c.md", "Third [[Entropy]] mention.");
        vault.insert("d.md", "Fourth [[Entropy]] mention.");
        vault.insert("e.md", "No link here.");
        vault.mark_unreadable("a.md");

        let found = find_backlink_contexts(&vault, &target, 2).await;
        let sources: Vec<&str> = found.iter().map(|c| c.source_path.as_str()).collect();
        assert_eq!(sources, vec!["b.md", "c.md"]);
        assert_eq!(found[0].excerpt, "Second [[Entropy]] mention.");
    }

    #[tokio::test]
    async fn target_is_not_its_own_backlink() {
        let vault = MemoryVault::new();
        let target = vault.insert("Entropy.md", "Self [[Entropy]] reference.");
        assert!(find_backlink_contexts(&vault, &target, 3).await.is_empty());
    }

    #[tokio::test]
    async fn structured_index_is_preferred() {
        let vault = MemoryVault::new();
        let target = vault.insert("Entropy.md", "");
        vault.insert("a.md", "intro\nlinks to [[Entropy]]\noutro\nmore");
        vault.insert("b.md", "Also [[Entropy]].");
        vault.insert("c.md", "[[Entropy]]");
        vault.mark_unreadable("c.md");
        let mut index = HashMap::new();
        index.insert(
            "Entropy.md".to_string(),
            vec![
                LinkOccurrence { source: "c.md".into(), line: 0 },
                LinkOccurrence { source: "a.md".into(), line: 1 },
            ],
        );
        vault.set_backlink_index(index);

        let found = find_backlink_contexts(&vault, &target, 3).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_path, "a.md");
        assert_eq!(found[0].excerpt, "intro\nlinks to [[Entropy]]\noutro");
    }

    #[tokio::test]
    async fn empty_index_falls_back_to_scanning() {
        let vault = MemoryVault::new();
        let target = vault.insert("Entropy.md", "");
        vault.insert("b.md", "Also [[Entropy]].");
        vault.set_backlink_index(HashMap::new());

        let found = find_backlink_contexts(&vault, &target, 3).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_name, "b");
    }

    #[tokio::test]
    async fn resolved_links_narrow_the_scan() {
        let vault = MemoryVault::new();
        let target = vault.insert("Entropy.md", "");
        vault.insert("a.md", "Early [[Entropy]] mention.");
        vault.insert("b.md", "Later [[entropy|disorder]] mention.");
        vault.insert("c.md", "[[Entropy]] too.");
        vault.mark_unreadable("c.md");
        let mut links = HashMap::new();
        links.insert("b.md".to_string(), HashMap::from([("Entropy.md".to_string(), 1)]));
        links.insert("c.md".to_string(), HashMap::from([("Entropy.md".to_string(), 2)]));
        links.insert("a.md".to_string(), HashMap::from([("Other.md".to_string(), 1)]));
        vault.set_resolved_links(links);

        let found = find_backlink_contexts(&vault, &target, 3).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_path, "b.md");
        assert_eq!(found[0].excerpt, "Later [[entropy|disorder]] mention.");
    }

    #[tokio::test]
    async fn resolved_links_without_readable_sources_fall_back_to_scanning() {
        let vault = MemoryVault::new();
        let target = vault.insert("Entropy.md", "");
        vault.insert("a.md", "Early [[Entropy]] mention.");
        let mut links = HashMap::new();
        links.insert("gone.md".to_string(), HashMap::from([("Entropy.md".to_string(), 1)]));
        vault.set_resolved_links(links);

        let found = find_backlink_contexts(&vault, &target, 3).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source_path, "a.md");
    }
}
