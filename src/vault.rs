use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

use crate::error::VaultError;
use crate::{normalize_note_path, NoteHandle};

/// One recorded occurrence of a link inside a source note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOccurrence {
    pub source: String,
    /// Zero-based line of the link inside `source`.
    pub line: usize,
}

/// The host's document store. Paths are vault-relative and `/`-separated.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read(&self, note: &NoteHandle) -> Result<String, VaultError>;

    /// Full replace of the note's content.
    async fn write(&self, note: &NoteHandle, content: &str) -> Result<(), VaultError>;

    /// Fresh handle (size, timestamps) for a path.
    async fn stat(&self, path: &str) -> Result<NoteHandle, VaultError>;

    async fn list_notes(&self) -> Result<Vec<NoteHandle>, VaultError>;

    /// Structured backlink index with line positions, if the host keeps one.
    fn backlinks(&self, _target: &NoteHandle) -> Option<Vec<LinkOccurrence>> {
        None
    }

    /// Resolved-link reverse index: source path -> (target path -> link count).
    fn resolved_links(&self) -> Option<HashMap<String, HashMap<String, usize>>> {
        None
    }
}

fn system_time_to_utc(time: std::io::Result<std::time::SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

// Directories the host uses for its own bookkeeping
fn is_hidden_dir(name: &str) -> bool {
    name.starts_with('.')
}

/// Markdown vault on the local filesystem.
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, VaultError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(VaultError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Vault-relative path for an absolute path under the root.
    pub fn relative_path(&self, absolute: &Path) -> Option<String> {
        let relative = absolute.strip_prefix(&self.root).ok()?;
        Some(normalize_note_path(&relative.to_string_lossy()))
    }

    async fn handle_for(&self, relative: &str, absolute: &Path) -> Result<NoteHandle, VaultError> {
        let metadata = fs::metadata(absolute)
            .await
            .map_err(|e| VaultError::io(relative, e))?;
        let mut handle = NoteHandle::new(relative, metadata.len());
        handle.created = system_time_to_utc(metadata.created());
        handle.modified = system_time_to_utc(metadata.modified());
        Ok(handle)
    }
}

#[async_trait]
impl DocumentStore for FsVault {
    async fn read(&self, note: &NoteHandle) -> Result<String, VaultError> {
        let path = self.resolve(&note.path)?;
        fs::read_to_string(&path)
            .await
            .map_err(|e| VaultError::io(&note.path, e))
    }

    async fn write(&self, note: &NoteHandle, content: &str) -> Result<(), VaultError> {
        let path = self.resolve(&note.path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultError::io(&note.path, e))?;
        }
        fs::write(&path, content)
            .await
            .map_err(|e| VaultError::io(&note.path, e))
    }

    async fn stat(&self, path: &str) -> Result<NoteHandle, VaultError> {
        let relative = normalize_note_path(path);
        let absolute = self.resolve(&relative)?;
        self.handle_for(&relative, &absolute).await
    }

    async fn list_notes(&self) -> Result<Vec<NoteHandle>, VaultError> {
        let mut notes = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir == self.root => {
                    return Err(VaultError::io(dir.to_string_lossy(), e));
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable folder {}: {}", dir.display(), e);
                    continue;
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| VaultError::io(dir.to_string_lossy(), e))?
            {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(_) => continue,
                };

                if file_type.is_dir() {
                    if !is_hidden_dir(&name) {
                        pending.push(path);
                    }
                    continue;
                }

                let Some(relative) = self.relative_path(&path) else {
                    continue;
                };
                let handle = match self.handle_for(&relative, &path).await {
                    Ok(h) => h,
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", relative, e);
                        continue;
                    }
                };
                if handle.is_markdown() {
                    notes.push(handle);
                }
            }
        }

        notes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(notes)
    }
}

/// In-memory document store. Used when embedding the generator in another
/// host and throughout the test suite.
#[derive(Default)]
pub struct MemoryVault {
    notes: Mutex<BTreeMap<String, String>>,
    unreadable: Mutex<HashSet<String>>,
    write_counts: Mutex<HashMap<String, usize>>,
    backlink_index: Mutex<Option<HashMap<String, Vec<LinkOccurrence>>>>,
    resolved_links: Mutex<Option<HashMap<String, HashMap<String, usize>>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, content: &str) -> NoteHandle {
        let path = normalize_note_path(path);
        self.notes
            .lock()
            .expect("memory vault mutex")
            .insert(path.clone(), content.to_string());
        NoteHandle::new(path, content.len() as u64)
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.notes
            .lock()
            .expect("memory vault mutex")
            .get(path)
            .cloned()
    }

    pub fn write_count(&self, path: &str) -> usize {
        self.write_counts
            .lock()
            .expect("memory vault mutex")
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Reads of `path` fail from now on, as with a permission error.
    pub fn mark_unreadable(&self, path: &str) {
        self.unreadable
            .lock()
            .expect("memory vault mutex")
            .insert(path.to_string());
    }

    /// Installs a structured backlink index keyed by target path.
    pub fn set_backlink_index(&self, index: HashMap<String, Vec<LinkOccurrence>>) {
        *self.backlink_index.lock().expect("memory vault mutex") = Some(index);
    }

    /// Installs a resolved-link map: source path -> (target path -> count).
    pub fn set_resolved_links(&self, links: HashMap<String, HashMap<String, usize>>) {
        *self.resolved_links.lock().expect("memory vault mutex") = Some(links);
    }
}

#[async_trait]
impl DocumentStore for MemoryVault {
    async fn read(&self, note: &NoteHandle) -> Result<String, VaultError> {
        if self
            .unreadable
            .lock()
            .expect("memory vault mutex")
            .contains(&note.path)
        {
            return Err(VaultError::Io {
                path: note.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "unreadable"),
            });
        }
        self.content(&note.path)
            .ok_or_else(|| VaultError::NotFound(note.path.clone()))
    }

    async fn write(&self, note: &NoteHandle, content: &str) -> Result<(), VaultError> {
        self.notes
            .lock()
            .expect("memory vault mutex")
            .insert(note.path.clone(), content.to_string());
        *self
            .write_counts
            .lock()
            .expect("memory vault mutex")
            .entry(note.path.clone())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<NoteHandle, VaultError> {
        let path = normalize_note_path(path);
        let size = self
            .content(&path)
            .map(|c| c.len() as u64)
            .ok_or_else(|| VaultError::NotFound(path.clone()))?;
        Ok(NoteHandle::new(path, size))
    }

    async fn list_notes(&self) -> Result<Vec<NoteHandle>, VaultError> {
        let notes = self.notes.lock().expect("memory vault mutex");
        Ok(notes
            .iter()
            .map(|(path, content)| NoteHandle::new(path.clone(), content.len() as u64))
            .filter(|h| h.is_markdown())
            .collect())
    }

    fn backlinks(&self, target: &NoteHandle) -> Option<Vec<LinkOccurrence>> {
        let index = self.backlink_index.lock().expect("memory vault mutex");
        index
            .as_ref()
            .map(|idx| idx.get(&target.path).cloned().unwrap_or_default())
    }

    fn resolved_links(&self) -> Option<HashMap<String, HashMap<String, usize>>> {
        self.resolved_links
            .lock()
            .expect("memory vault mutex")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_vault_lists_markdown_recursively_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("topics")).unwrap();
        std::fs::create_dir_all(dir.path().join(".wikidef")).unwrap();
        std::fs::write(dir.path().join("a.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("topics/b.md"), "").unwrap();
        std::fs::write(dir.path().join("image.png"), "png").unwrap();
        std::fs::write(dir.path().join(".wikidef/c.md"), "hidden").unwrap();

        let vault = FsVault::new(dir.path());
        let notes = vault.list_notes().await.unwrap();
        let paths: Vec<&str> = notes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "topics/b.md"]);
        assert_eq!(notes[1].size, 0);
        assert_eq!(notes[1].base_name, "b");
    }

    #[tokio::test]
    async fn fs_vault_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        let note = NoteHandle::new("new/Term.md", 0);
        vault.write(&note, "## Term\nTerm\n").await.unwrap();

        assert_eq!(vault.read(&note).await.unwrap(), "## Term\nTerm\n");
        let stat = vault.stat("new/Term.md").await.unwrap();
        assert_eq!(stat.size, 13);
        assert!(stat.modified.is_some());
    }

    #[tokio::test]
    async fn fs_vault_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        let err = vault.stat("../outside.md").await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn fs_vault_reports_missing_notes() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        let err = vault.read(&NoteHandle::new("missing.md", 0)).await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn memory_vault_counts_writes_and_fails_unreadable() {
        let vault = MemoryVault::new();
        let note = vault.insert("a.md", "");
        vault.write(&note, "x").await.unwrap();
        assert_eq!(vault.write_count("a.md"), 1);

        vault.mark_unreadable("a.md");
        assert!(vault.read(&note).await.is_err());
    }
}
