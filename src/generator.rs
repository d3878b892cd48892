use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::completion::Completer;
use crate::document::ensure_backlink;
use crate::error::{CompletionError, VaultError};
use crate::notices::Notifier;
use crate::retry::{retry_bounded, AttemptError, RetryOutcome, RetryPolicy};
use crate::sanitize::{sanitize_output, SanitizeOptions};
use crate::session::{InFlightGuard, Session};
use crate::settings::Settings;
use crate::template::{build_prompt, fallback_document, PromptInput, COMPLETION_MARKER};
use crate::vault::DocumentStore;
use crate::{trim_effective, NoteHandle};

/// Trimmed content shorter than this counts as empty.
pub const MIN_CONTENT_CHARS: usize = 8;

/// Text a templating plugin leaves behind when it fails on a new note.
pub const TEMPLATE_ERROR_SIGNATURES: [&str; 2] = ["Templater Error", "Template parsing error"];

const ROUND_TRIP_PROMPT: &str = "Reply with the single word: pong";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteState {
    Empty,
    HasContent,
    Populated,
}

/// True when a line of `content` is the completion marker heading itself.
pub fn has_completion_marker(content: &str) -> bool {
    content
        .lines()
        .any(|line| line.trim().eq_ignore_ascii_case(COMPLETION_MARKER))
}

/// Classifies a note's content for automatic generation.
pub fn assess_note(size: u64, content: &str) -> NoteState {
    if has_completion_marker(content) {
        return NoteState::Populated;
    }
    let is_empty = size == 0
        || trim_effective(content).chars().count() < MIN_CONTENT_CHARS
        || TEMPLATE_ERROR_SIGNATURES
            .iter()
            .any(|signature| content.contains(signature));
    if is_empty {
        NoteState::Empty
    } else {
        NoteState::HasContent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    Disabled,
    NotMarkdown,
    NoOrigin,
    SameNote,
    Cooldown,
    InFlight,
    Unreadable,
    HasContent,
    AlreadyPopulated,
    MissingApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GenerationOutcome {
    Skipped(SkipReason),
    Generated,
    FallbackWritten,
    Failed,
}

#[derive(Debug)]
enum AttemptFailure {
    NoResult,
    Unreachable(CompletionError),
    Origin(VaultError),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::NoResult => write!(f, "no usable response"),
            AttemptFailure::Unreachable(e) => write!(f, "{}", e),
            AttemptFailure::Origin(e) => write!(f, "origin note unavailable: {}", e),
        }
    }
}

/// Fills freshly created wiki-link notes with a generated definition.
pub struct Generator {
    store: Arc<dyn DocumentStore>,
    completer: Arc<dyn Completer>,
    notifier: Arc<dyn Notifier>,
    session: Arc<Session>,
    settings: Arc<RwLock<Settings>>,
}

impl Generator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        completer: Arc<dyn Completer>,
        notifier: Arc<dyn Notifier>,
        session: Arc<Session>,
        settings: Arc<RwLock<Settings>>,
    ) -> Self {
        Self {
            store,
            completer,
            notifier,
            session,
            settings,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().expect("settings read lock").clone()
    }

    /// Handler for "note opened". Records the navigation, then generates a
    /// definition when `note` is a fresh, empty note reached from another one.
    pub async fn on_note_opened(&self, note: NoteHandle) -> GenerationOutcome {
        let origin = self.session.record_navigation(&note);
        self.handle_open(note, origin).await
    }

    /// Second half of [`Generator::on_note_opened`], for callers that record
    /// navigation themselves to keep event order before spawning.
    pub async fn handle_open(&self, note: NoteHandle, origin: Option<NoteHandle>) -> GenerationOutcome {
        let settings = self.settings();

        if !settings.auto_generate {
            return GenerationOutcome::Skipped(SkipReason::Disabled);
        }
        if !note.is_markdown() {
            return GenerationOutcome::Skipped(SkipReason::NotMarkdown);
        }
        let Some(origin) = origin else {
            return GenerationOutcome::Skipped(SkipReason::NoOrigin);
        };
        if origin.path == note.path {
            return GenerationOutcome::Skipped(SkipReason::SameNote);
        }
        if self.session.recently_processed(&note.path) {
            debug!("{} was processed recently; skipping", note.path);
            return GenerationOutcome::Skipped(SkipReason::Cooldown);
        }
        let Some(guard) = self.session.try_begin(&note.path) else {
            debug!("{} is already being generated", note.path);
            return GenerationOutcome::Skipped(SkipReason::InFlight);
        };

        // Let other writers (templates, the editor) settle first
        tokio::time::sleep(Duration::from_millis(settings.debounce_ms)).await;

        let (target, content) = match self.read_fresh(&note).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Could not read {}: {}", note.path, e);
                return GenerationOutcome::Skipped(SkipReason::Unreadable);
            }
        };

        match assess_note(target.size, &content) {
            NoteState::Populated => {
                return GenerationOutcome::Skipped(SkipReason::AlreadyPopulated);
            }
            NoteState::HasContent => {
                return GenerationOutcome::Skipped(SkipReason::HasContent);
            }
            NoteState::Empty => {}
        }

        info!(
            "New note {} opened from {}; generating definition",
            target.path, origin.path
        );
        self.session.mark_processed(&target.path);
        let outcome = self.generate(&guard, &target, &origin, &settings).await;
        self.session.mark_processed(&target.path);
        outcome
    }

    /// Manual regeneration. Ignores emptiness, the completion marker and the
    /// cooldown, but never runs twice for the same note at once.
    pub async fn regenerate(&self, target: &NoteHandle, origin: &NoteHandle) -> GenerationOutcome {
        let Some(guard) = self.session.try_begin(&target.path) else {
            self.notifier
                .info("A definition is already being generated", Some(&target.path));
            return GenerationOutcome::Skipped(SkipReason::InFlight);
        };
        let settings = self.settings();
        let target = match self.store.stat(&target.path).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!("Could not stat {}: {}", target.path, e);
                target.clone()
            }
        };
        self.session.mark_processed(&target.path);
        self.generate(&guard, &target, origin, &settings).await
    }

    /// Sends a tiny prompt through the full strategy chain and logs the
    /// answer. Nothing is written.
    pub async fn test_round_trip(&self) -> Option<String> {
        match self.completer.complete(ROUND_TRIP_PROMPT).await {
            Ok(Some(text)) => {
                info!("Round trip succeeded: {}", text);
                self.notifier.success("Completion endpoint answered", None);
                Some(text)
            }
            Ok(None) => {
                warn!("Round trip returned no result");
                self.notifier
                    .warn("Completion endpoint returned no result", None);
                None
            }
            Err(e) => {
                warn!("Round trip failed: {}", e);
                self.notifier.warn("Completion endpoint unreachable", None);
                None
            }
        }
    }

    async fn read_fresh(&self, note: &NoteHandle) -> Result<(NoteHandle, String), VaultError> {
        let fresh = self.store.stat(&note.path).await?;
        let content = self.store.read(&fresh).await?;
        Ok((fresh, content))
    }

    async fn attempt_once(
        &self,
        target: &NoteHandle,
        origin: &NoteHandle,
        settings: &Settings,
        attempt: u32,
    ) -> Result<String, AttemptError<AttemptFailure>> {
        let count = self.session.record_attempt(&target.path);
        debug!("Generation attempt {} (#{}) for {}", attempt, count, target.path);

        let origin_text = self
            .store
            .read(origin)
            .await
            .map_err(|e| AttemptError::Retryable(AttemptFailure::Origin(e)))?;

        let prompt = build_prompt(&PromptInput {
            term: &target.base_name,
            origin_name: &origin.base_name,
            origin_text: &origin_text,
            char_limit: settings.origin_char_limit,
            custom_instructions: settings.custom_prompt.as_deref(),
        });

        match self.completer.complete(&prompt).await {
            Ok(Some(text)) => Ok(text),
            Ok(None) => Err(AttemptError::Retryable(AttemptFailure::NoResult)),
            Err(e) => Err(AttemptError::Retryable(AttemptFailure::Unreachable(e))),
        }
    }

    async fn generate(
        &self,
        guard: &InFlightGuard,
        target: &NoteHandle,
        origin: &NoteHandle,
        settings: &Settings,
    ) -> GenerationOutcome {
        debug_assert_eq!(guard.path(), target.path);
        let term = target.base_name.as_str();

        if !settings.has_api_key() {
            self.notifier.warn(
                "No API key configured; cannot generate a definition",
                Some(&target.path),
            );
            return GenerationOutcome::Skipped(SkipReason::MissingApiKey);
        }

        self.notifier
            .info(&format!("Generating definition for \"{}\"", term), Some(&target.path));

        let policy = RetryPolicy::single_retry(Duration::from_millis(settings.retry_delay_ms));
        let outcome = retry_bounded(policy, move |attempt| {
            self.attempt_once(target, origin, settings, attempt)
        })
        .await;

        match outcome {
            RetryOutcome::Success { value, attempts } => {
                let cleaned = sanitize_output(&value, &SanitizeOptions::from(settings));
                let document = ensure_backlink(&cleaned, &origin.base_name);
                match self.store.write(target, &document).await {
                    Ok(()) => {
                        info!(
                            "Wrote definition for {} after {} attempt(s)",
                            target.path, attempts
                        );
                        self.notifier.success(
                            &format!("Definition for \"{}\" ready", term),
                            Some(&target.path),
                        );
                        GenerationOutcome::Generated
                    }
                    Err(e) => {
                        error!("Failed to write {}: {}", target.path, e);
                        self.notifier
                            .warn("Could not save the generated definition", Some(&target.path));
                        GenerationOutcome::Failed
                    }
                }
            }
            RetryOutcome::Exhausted {
                last_error: failure,
                attempts,
            }
            | RetryOutcome::Aborted {
                error: failure,
                attempts,
            } => {
                warn!(
                    "Definition generation for {} failed after {} attempt(s): {}",
                    target.path, attempts, failure
                );
                self.notifier.warn(
                    &format!("Could not generate a definition for \"{}\"", term),
                    Some(&target.path),
                );
                if settings.write_fallback_on_failure {
                    self.write_fallback(target, origin).await
                } else {
                    GenerationOutcome::Failed
                }
            }
        }
    }

    async fn write_fallback(&self, target: &NoteHandle, origin: &NoteHandle) -> GenerationOutcome {
        let document = fallback_document(&target.base_name, &origin.base_name);
        match self.store.write(target, &document).await {
            Ok(()) => {
                info!("Wrote fallback template to {}", target.path);
                GenerationOutcome::FallbackWritten
            }
            Err(e) => {
                error!("Failed to write fallback template to {}: {}", target.path, e);
                GenerationOutcome::Failed
            }
        }
    }
}
