//! User-invoked actions. Each one works on the active note tracked by the
//! session.

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backlinks::find_backlink_contexts;
use crate::error::CommandError;
use crate::generator::{GenerationOutcome, Generator};
use crate::reference::{apply_definition, ReferenceLookup, ReferenceSource};
use crate::NoteHandle;

/// "Pick one of N notes by fuzzy text" primitive.
pub trait NotePicker: Send + Sync {
    fn pick(&self, query: &str, candidates: &[NoteHandle]) -> Option<NoteHandle>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedNote {
    pub path: String,
    pub name: String,
    pub score: f32,
}

/// Substring scoring over note names and paths; the best match wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuzzyPicker;

impl FuzzyPicker {
    pub fn rank(query: &str, candidates: &[NoteHandle]) -> Vec<RankedNote> {
        let query_lower = query.trim().to_lowercase();
        if query_lower.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<RankedNote> = candidates
            .iter()
            .filter_map(|note| {
                let name_lower = note.base_name.to_lowercase();
                let path_lower = note.path.to_lowercase();

                let mut score = 0.0f32;
                if name_lower == query_lower {
                    score += 100.0;
                }
                if name_lower.starts_with(&query_lower) {
                    score += 25.0;
                }
                if name_lower.contains(&query_lower) {
                    score += 50.0;
                }
                if path_lower.contains(&query_lower) {
                    score += 10.0;
                }

                if score > 0.0 {
                    Some(RankedNote {
                        path: note.path.clone(),
                        name: note.base_name.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        results.truncate(20);
        results
    }
}

impl NotePicker for FuzzyPicker {
    fn pick(&self, query: &str, candidates: &[NoteHandle]) -> Option<NoteHandle> {
        let best = Self::rank(query, candidates).into_iter().next()?;
        candidates.iter().find(|n| n.path == best.path).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefineReport {
    pub note: String,
    pub source: Option<ReferenceSource>,
    pub contexts: usize,
}

pub struct Commands {
    generator: Arc<Generator>,
    reference: Arc<dyn ReferenceLookup>,
    picker: Arc<dyn NotePicker>,
}

impl Commands {
    pub fn new(
        generator: Arc<Generator>,
        reference: Arc<dyn ReferenceLookup>,
        picker: Arc<dyn NotePicker>,
    ) -> Self {
        Self {
            generator,
            reference,
            picker,
        }
    }

    pub fn generator(&self) -> &Arc<Generator> {
        &self.generator
    }

    fn active_note(&self) -> Result<NoteHandle, CommandError> {
        self.generator
            .session()
            .current()
            .ok_or(CommandError::NoActiveNote)
    }

    /// Regenerates the active note from the note it was opened from.
    pub async fn regenerate_current(&self) -> Result<GenerationOutcome, CommandError> {
        let target = self.active_note()?;
        let origin = self
            .generator
            .session()
            .previous()
            .ok_or_else(|| CommandError::NoOrigin(target.path.clone()))?;
        Ok(self.generator.regenerate(&target, &origin).await)
    }

    /// Regenerates the active note from whichever note best matches `query`.
    pub async fn regenerate_from(&self, query: &str) -> Result<GenerationOutcome, CommandError> {
        let target = self.active_note()?;
        let candidates: Vec<NoteHandle> = self
            .generator
            .store()
            .list_notes()
            .await?
            .into_iter()
            .filter(|n| n.path != target.path)
            .collect();
        let origin = self
            .picker
            .pick(query, &candidates)
            .ok_or_else(|| CommandError::NoMatch(query.to_string()))?;
        info!("Regenerating {} from {}", target.path, origin.path);
        Ok(self.generator.regenerate(&target, &origin).await)
    }

    pub async fn test_round_trip(&self) -> Option<String> {
        self.generator.test_round_trip().await
    }

    /// Looks the active note's title up in the reference sources and quotes
    /// the notes that link to it.
    pub async fn define_current(&self) -> Result<DefineReport, CommandError> {
        let target = self.active_note()?;
        let session = self.generator.session();
        let _guard = session
            .try_begin(&target.path)
            .ok_or_else(|| CommandError::Busy(target.path.clone()))?;

        let store = self.generator.store();
        let notifier = self.generator.notifier();
        let settings = self.generator.settings();
        let term = target.base_name.as_str();

        let content = store.read(&target).await?;
        let definition = self.reference.lookup(term).await;
        let contexts =
            find_backlink_contexts(store.as_ref(), &target, settings.backlink_limit).await;

        let updated = apply_definition(&content, definition.as_ref(), &contexts);
        store.write(&target, &updated).await?;

        match &definition {
            Some(def) => notifier.success(
                &format!("Defined \"{}\" from {}", term, def.source),
                Some(&target.path),
            ),
            None => {
                warn!("No reference definition found for \"{}\"", term);
                notifier.info(
                    &format!("No reference definition found for \"{}\"", term),
                    Some(&target.path),
                );
            }
        }

        Ok(DefineReport {
            note: target.path.clone(),
            source: definition.map(|d| d.source),
            contexts: contexts.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::tests::{test_settings, ScriptedCompleter};
    use crate::notices::NoticeLog;
    use crate::reference::ReferenceDefinition;
    use crate::session::Session;
    use crate::vault::MemoryVault;
    use async_trait::async_trait;
    use std::sync::RwLock;
    use std::time::Duration;

    struct FixedReference(Option<ReferenceDefinition>);

    #[async_trait]
    impl ReferenceLookup for FixedReference {
        async fn lookup(&self, _term: &str) -> Option<ReferenceDefinition> {
            self.0.clone()
        }
    }

    fn commands(
        vault: Arc<MemoryVault>,
        completer: Arc<ScriptedCompleter>,
        reference: Option<ReferenceDefinition>,
    ) -> Commands {
        let generator = Generator::new(
            vault,
            completer,
            Arc::new(NoticeLog::new()),
            Session::new(Duration::from_secs(10)),
            Arc::new(RwLock::new(test_settings())),
        );
        Commands::new(
            Arc::new(generator),
            Arc::new(FixedReference(reference)),
            Arc::new(FuzzyPicker),
        )
    }

    fn definition_text() -> Option<String> {
        Some("## Term\nEntropy\n\n## Full Definition\nNew text.\n".to_string())
    }

    fn notes(paths: &[&str]) -> Vec<NoteHandle> {
        paths.iter().map(|p| NoteHandle::new(*p, 0)).collect()
    }

    #[test]
    fn picker_prefers_exact_then_prefix_matches() {
        let candidates = notes(&["Thermodynamics.md", "physics/Thermo.md", "Other.md"]);
        let ranked = FuzzyPicker::rank("thermo", &candidates);
        assert_eq!(ranked[0].path, "physics/Thermo.md");
        assert_eq!(ranked[1].path, "Thermodynamics.md");
        assert_eq!(ranked.len(), 2);
        assert_eq!(
            FuzzyPicker.pick("THERMO", &candidates).unwrap().path,
            "physics/Thermo.md"
        );
    }

    #[test]
    fn picker_matches_on_folder_names() {
        let candidates = notes(&["physics/Heat.md", "Other.md"]);
        assert_eq!(FuzzyPicker.pick("physics", &candidates).unwrap().path, "physics/Heat.md");
        assert!(FuzzyPicker.pick("zzz", &candidates).is_none());
        assert!(FuzzyPicker.pick("  ", &candidates).is_none());
    }

    #[tokio::test]
    async fn regenerate_uses_the_tracked_origin() {
        let vault = Arc::new(MemoryVault::new());
        let completer = ScriptedCompleter::new(vec![Ok(definition_text())]);
        let cmds = commands(vault.clone(), completer.clone(), None);
        let origin = vault.insert("Origin.md", "About [[Entropy]].");
        let target = vault.insert("Entropy.md", "## Term\nold\n");
        cmds.generator().session().record_navigation(&origin);
        cmds.generator().session().record_navigation(&target);

        let outcome = cmds.regenerate_current().await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Generated);
        assert!(completer.prompts()[0].contains("About [[Entropy]]."));
        assert!(vault.content("Entropy.md").unwrap().contains("Origin: [[Origin]]"));
    }

    #[tokio::test]
    async fn regenerate_without_origin_is_an_error() {
        let vault = Arc::new(MemoryVault::new());
        let cmds = commands(vault.clone(), ScriptedCompleter::new(vec![]), None);
        let target = vault.insert("Entropy.md", "");
        cmds.generator().session().record_navigation(&target);

        let err = cmds.regenerate_current().await.unwrap_err();
        assert!(matches!(err, CommandError::NoOrigin(_)));
        assert!(matches!(
            commands(vault, ScriptedCompleter::new(vec![]), None)
                .regenerate_current()
                .await
                .unwrap_err(),
            CommandError::NoActiveNote
        ));
    }

    #[tokio::test]
    async fn regenerate_from_picks_origin_by_query() {
        let vault = Arc::new(MemoryVault::new());
        let completer = ScriptedCompleter::new(vec![Ok(definition_text())]);
        let cmds = commands(vault.clone(), completer.clone(), None);
        vault.insert("Physics.md", "Physics mentions [[Entropy]].");
        vault.insert("Cooking.md", "Nothing relevant.");
        let target = vault.insert("Entropy.md", "");
        cmds.generator().session().record_navigation(&target);

        cmds.regenerate_from("phys").await.unwrap();
        assert!(completer.prompts()[0].contains("Physics mentions"));
        assert!(vault.content("Entropy.md").unwrap().contains("Origin: [[Physics]]"));

        let err = cmds.regenerate_from("nomatch").await.unwrap_err();
        assert!(matches!(err, CommandError::NoMatch(_)));
    }

    #[tokio::test]
    async fn define_splices_definition_and_contexts() {
        let vault = Arc::new(MemoryVault::new());
        let reference = ReferenceDefinition {
            source: ReferenceSource::Wikipedia,
            text: "A measure of disorder.".to_string(),
        };
        let cmds = commands(vault.clone(), ScriptedCompleter::new(vec![]), Some(reference));
        vault.insert("Physics.md", "Heat flows. Then [[Entropy]] rises.");
        let target = vault.insert("Entropy.md", "# Entropy\n");
        cmds.generator().session().record_navigation(&target);

        let report = cmds.define_current().await.unwrap();
        assert_eq!(report.source, Some(ReferenceSource::Wikipedia));
        assert_eq!(report.contexts, 1);

        let content = vault.content("Entropy.md").unwrap();
        assert!(content.starts_with("# Entropy\n"));
        assert!(content.contains("## Definition\nA measure of disorder."));
        assert!(content.contains("## Used in Context\n> Then [[Entropy]] rises.\n> ([[Physics]])"));
        assert!(!cmds.generator().session().is_in_flight("Entropy.md"));
    }

    #[tokio::test]
    async fn define_writes_placeholder_when_nothing_is_found() {
        let vault = Arc::new(MemoryVault::new());
        let cmds = commands(vault.clone(), ScriptedCompleter::new(vec![]), None);
        let target = vault.insert("Obscure.md", "");
        cmds.generator().session().record_navigation(&target);

        let report = cmds.define_current().await.unwrap();
        assert_eq!(report.source, None);
        assert_eq!(report.contexts, 0);
        assert!(vault.content("Obscure.md").unwrap().contains("## Definition"));
    }
}
