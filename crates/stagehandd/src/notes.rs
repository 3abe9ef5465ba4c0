//! Free-text operator notes attached to every successful response.
//!
//! The notes live in a plain text file that operators edit out of band. The
//! daemon re-reads the file when its modification time changes.

use std::fs;
use std::io;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use camino::Utf8PathBuf;
use tracing::{debug, warn};

const NOTES_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::notes");

#[derive(Default)]
struct NotesState {
    text: String,
    modified: Option<SystemTime>,
}

/// Shared, cheaply cloned view of the operator's notes.
#[derive(Clone, Default)]
pub struct OperatorNotes {
    path: Option<Utf8PathBuf>,
    state: Arc<RwLock<NotesState>>,
}

impl OperatorNotes {
    /// Notes that never change, for hosts without a notes file.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self {
            path: None,
            state: Arc::new(RwLock::new(NotesState {
                text: text.into(),
                modified: None,
            })),
        }
    }

    /// Notes backed by `path`. A missing file reads as empty notes.
    pub fn load(path: Option<Utf8PathBuf>) -> Self {
        let notes = Self {
            path,
            state: Arc::default(),
        };
        notes.refresh();
        notes
    }

    /// Current notes, trimmed.
    pub fn current(&self) -> String {
        self.state
            .read()
            .map(|state| state.text.trim().to_owned())
            .unwrap_or_default()
    }

    /// Re-reads the backing file when it changed since the last read and
    /// returns the new text if it differs.
    pub fn refresh(&self) -> Option<String> {
        let path = self.path.as_ref()?;
        let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(modified) => Some(modified),
            Err(error) if error.kind() == io::ErrorKind::NotFound => None,
            Err(error) => {
                warn!(target: NOTES_TARGET, %path, %error, "cannot stat operator notes");
                return None;
            }
        };

        let mut state = self.state.write().ok()?;
        if state.modified == modified && modified.is_some() {
            return None;
        }
        let text = match modified {
            Some(_) => match fs::read_to_string(path) {
                Ok(text) => text,
                Err(error) => {
                    warn!(target: NOTES_TARGET, %path, %error, "cannot read operator notes");
                    return None;
                }
            },
            None => String::new(),
        };
        state.modified = modified;
        if state.text == text {
            return None;
        }
        state.text = text;
        debug!(target: NOTES_TARGET, %path, "operator notes reloaded");
        Some(state.text.trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    fn notes_file(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("notes.txt")).expect("utf-8 temp path")
    }

    #[rstest]
    fn fixed_notes_are_trimmed() {
        assert_eq!(OperatorNotes::fixed("  keep the car red \n").current(), "keep the car red");
    }

    #[rstest]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().expect("temp dir");
        let notes = OperatorNotes::load(Some(notes_file(&dir)));
        assert_eq!(notes.current(), "");
        assert_eq!(notes.refresh(), None);
    }

    #[rstest]
    fn edits_are_picked_up_once() {
        let dir = TempDir::new().expect("temp dir");
        let path = notes_file(&dir);
        fs::write(&path, "first").expect("write notes");
        let notes = OperatorNotes::load(Some(path.clone()));
        assert_eq!(notes.current(), "first");

        std::thread::sleep(Duration::from_millis(20));
        fs::write(&path, "second\n").expect("rewrite notes");
        let file = fs::File::options().write(true).open(&path).expect("open notes");
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .expect("bump mtime");

        assert_eq!(notes.refresh().as_deref(), Some("second"));
        assert_eq!(notes.refresh(), None);
        assert_eq!(notes.current(), "second");
    }
}
