//! Filesystem notifications for a vault on disk.
//!
//! Without editor integration, file activity stands in for navigation: a
//! modified note is the one the user is working in, and a created note is
//! the one they just opened by following a link.

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::generator::Generator;
use crate::vault::{DocumentStore, FsVault};
use crate::{is_markdown_path, NoteHandle};

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
const DEBOUNCE_CLEANUP_THRESHOLD: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteEvent {
    Created(String),
    Modified(String),
    Renamed { from: String, to: String },
    Removed(String),
}

/// Drops repeats of the same event on the same path inside the window.
#[derive(Debug, Default)]
pub struct Debouncer {
    last_seen: HashMap<(PathBuf, &'static str), Instant>,
}

impl Debouncer {
    pub fn should_emit(&mut self, path: &Path, kind: &'static str, now: Instant) -> bool {
        // Clean up old entries periodically
        if self.last_seen.len() > DEBOUNCE_CLEANUP_THRESHOLD {
            self.last_seen
                .retain(|_, last| now.duration_since(*last) < Duration::from_secs(5));
        }

        let key = (path.to_path_buf(), kind);
        if let Some(last) = self.last_seen.get(&key) {
            if now.duration_since(*last) < DEBOUNCE_WINDOW {
                return false;
            }
        }
        self.last_seen.insert(key, now);
        true
    }
}

/// Keeps the OS watcher alive. Dropping it stops the event stream.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
}

fn relative(roots: &[PathBuf], path: &Path) -> Option<String> {
    if !is_markdown_path(path) {
        return None;
    }
    roots
        .iter()
        .find_map(|root| path.strip_prefix(root).ok())
        .map(|rel| crate::normalize_note_path(&rel.to_string_lossy()))
        .filter(|rel| !rel.is_empty() && !rel.split('/').any(|part| part.starts_with('.')))
}

/// Maps one raw notification onto note events, debouncing creates and
/// modifications per path.
pub fn classify(
    roots: &[PathBuf],
    kind: &EventKind,
    paths: &[PathBuf],
    debouncer: &mut Debouncer,
    now: Instant,
) -> Vec<NoteEvent> {
    if let EventKind::Modify(ModifyKind::Name(mode)) = kind {
        return match (mode, paths) {
            (RenameMode::Both, [from, to]) => match (relative(roots, from), relative(roots, to)) {
                (Some(from), Some(to)) => vec![NoteEvent::Renamed { from, to }],
                (Some(from), None) => vec![NoteEvent::Removed(from)],
                (None, Some(to)) => vec![NoteEvent::Created(to)],
                (None, None) => Vec::new(),
            },
            (RenameMode::From, _) => paths
                .iter()
                .filter_map(|p| relative(roots, p))
                .map(NoteEvent::Removed)
                .collect(),
            (RenameMode::To, _) => paths
                .iter()
                .filter_map(|p| relative(roots, p))
                .map(NoteEvent::Created)
                .collect(),
            _ => Vec::new(),
        };
    }

    let label = match kind {
        EventKind::Create(_) => "created",
        EventKind::Modify(_) => "modified",
        EventKind::Remove(_) => "removed",
        _ => return Vec::new(),
    };

    let mut events = Vec::new();
    for path in paths {
        let Some(rel) = relative(roots, path) else {
            continue;
        };
        if label != "removed" && !debouncer.should_emit(path, label, now) {
            continue;
        }
        events.push(match label {
            "created" => NoteEvent::Created(rel),
            "modified" => NoteEvent::Modified(rel),
            _ => NoteEvent::Removed(rel),
        });
    }
    events
}

/// Starts a recursive watcher on `root` and streams note events.
pub fn watch_vault(
    root: &Path,
) -> Result<(VaultWatcher, UnboundedReceiver<NoteEvent>), notify::Error> {
    let (tx, rx): (UnboundedSender<NoteEvent>, _) = mpsc::unbounded_channel();

    // The OS may report canonical paths (symlinked temp dirs and the like)
    let mut roots = vec![root.to_path_buf()];
    if let Ok(canonical) = root.canonicalize() {
        if canonical != root {
            roots.push(canonical);
        }
    }
    let debouncer = Arc::new(Mutex::new(Debouncer::default()));

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                let events = {
                    let mut debouncer = debouncer.lock().expect("debounce map mutex");
                    classify(&roots, &event.kind, &event.paths, &mut debouncer, Instant::now())
                };
                for note_event in events {
                    let _ = tx.send(note_event);
                }
            }
            Err(e) => warn!("Watch error: {}", e),
        },
        Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    info!("Watching vault {}", root.display());

    Ok((VaultWatcher { _watcher: watcher }, rx))
}

/// Feeds watcher events to the generator until the stream ends.
pub async fn dispatch_events(
    generator: Arc<Generator>,
    vault: Arc<FsVault>,
    mut events: UnboundedReceiver<NoteEvent>,
) {
    while let Some(event) = events.recv().await {
        debug!("Vault event: {:?}", event);
        match event {
            NoteEvent::Created(path) => {
                let note = match vault.stat(&path).await {
                    Ok(note) => note,
                    Err(e) => {
                        debug!("Created note {} vanished: {}", path, e);
                        continue;
                    }
                };
                let origin = generator.session().record_navigation(&note);
                let generator = Arc::clone(&generator);
                tokio::spawn(async move {
                    let outcome = generator.handle_open(note, origin).await;
                    debug!("Open handler finished: {:?}", outcome);
                });
            }
            NoteEvent::Modified(path) => {
                let session = generator.session();
                let is_current = session.current().map_or(false, |c| c.path == path);
                if !is_current && !session.is_in_flight(&path) {
                    session.record_navigation(&NoteHandle::new(path, 0));
                }
            }
            NoteEvent::Renamed { from, to } => {
                let renamed = match vault.stat(&to).await {
                    Ok(note) => note,
                    Err(_) => NoteHandle::new(to.clone(), 0),
                };
                generator.session().rename(&from, &renamed);
            }
            NoteEvent::Removed(path) => {
                debug!("Note removed: {}", path);
            }
        }
    }
}
