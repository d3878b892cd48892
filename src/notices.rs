use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

const MAX_NOTICES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
}

/// A transient, user-visible message (a toast in the editor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub timestamp: String,
    pub level: NoticeLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str, note: Option<&str>);

    fn info(&self, message: &str, note: Option<&str>) {
        self.notify(NoticeLevel::Info, message, note);
    }

    fn success(&self, message: &str, note: Option<&str>) {
        self.notify(NoticeLevel::Success, message, note);
    }

    fn warn(&self, message: &str, note: Option<&str>) {
        self.notify(NoticeLevel::Warning, message, note);
    }
}

/// Keeps the most recent notices for the editor to poll and mirrors every
/// notice to the log.
#[derive(Default)]
pub struct NoticeLog {
    entries: Mutex<VecDeque<Notice>>,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<Notice> {
        self.entries
            .lock()
            .expect("notice log mutex")
            .iter()
            .cloned()
            .collect()
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        self.entries
            .lock()
            .expect("notice log mutex")
            .iter()
            .filter(|n| n.level == level)
            .count()
    }
}

impl Notifier for NoticeLog {
    fn notify(&self, level: NoticeLevel, message: &str, note: Option<&str>) {
        match level {
            NoticeLevel::Warning => tracing::warn!(note = note.unwrap_or("-"), "{}", message),
            _ => tracing::info!(note = note.unwrap_or("-"), "{}", message),
        }

        let mut entries = self.entries.lock().expect("notice log mutex");
        entries.push_back(Notice {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.to_string(),
            note: note.map(str::to_string),
        });
        while entries.len() > MAX_NOTICES {
            entries.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_most_recent_notices() {
        let log = NoticeLog::new();
        for i in 0..(MAX_NOTICES + 5) {
            log.info(&format!("notice {}", i), None);
        }
        let recent = log.recent();
        assert_eq!(recent.len(), MAX_NOTICES);
        assert_eq!(recent[0].message, "notice 5");
    }

    #[test]
    fn counts_by_level() {
        let log = NoticeLog::new();
        log.success("done", Some("Term.md"));
        log.warn("failed", Some("Term.md"));
        log.warn("failed again", None);
        assert_eq!(log.count(NoticeLevel::Warning), 2);
        assert_eq!(log.count(NoticeLevel::Success), 1);
        assert_eq!(log.recent()[0].note.as_deref(), Some("Term.md"));
    }
}
