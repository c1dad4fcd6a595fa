//! Hand-editing records in `$VISUAL` / `$EDITOR`.

use std::io::Write;
use std::process::Command;

use passkeep_core::collab::{EditOutcome, Editor};
use passkeep_core::error::{Error, Result};
use passkeep_core::Record;
use zeroize::Zeroizing;

const FALLBACK_EDITOR: &str = "vi";

/// Writes the record as pretty JSON to a private temp file and opens it in
/// an external editor. A non-zero exit or an emptied file rejects the edit.
pub struct ExternalEditor {
    command: String,
}

impl ExternalEditor {
    pub fn from_env() -> Self {
        let command = std::env::var("VISUAL")
            .or_else(|_| std::env::var("EDITOR"))
            .ok()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_EDITOR.to_string());
        Self { command }
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Editor<Record> for ExternalEditor {
    fn edit(&mut self, value: &Record) -> Result<EditOutcome<Record>> {
        let original = Zeroizing::new(serde_json::to_string_pretty(value)?);
        let mut file = tempfile::Builder::new()
            .prefix("passkeep-")
            .suffix(".json")
            .tempfile()?;
        file.write_all(original.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;

        let mut words = self.command.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| Error::Editor("empty editor command".into()))?;
        let status = Command::new(program)
            .args(words)
            .arg(file.path())
            .status()
            .map_err(|e| Error::Editor(format!("{program}: {e}")))?;
        if !status.success() {
            return Ok(EditOutcome::Rejected);
        }

        let edited = Zeroizing::new(std::fs::read_to_string(file.path())?);
        if edited.trim().is_empty() {
            return Ok(EditOutcome::Rejected);
        }
        let record: Record = serde_json::from_str(&edited)
            .map_err(|e| Error::Editor(format!("edited record is not valid: {e}")))?;
        if record == *value {
            Ok(EditOutcome::Unchanged)
        } else {
            Ok(EditOutcome::Changed(record))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn rec() -> Record {
        Record {
            label: "bank".into(),
            ..Default::default()
        }
    }

    #[test]
    fn true_leaves_the_record_unchanged() {
        let out = ExternalEditor::with_command("true").edit(&rec()).unwrap();
        assert_eq!(out, EditOutcome::Unchanged);
    }

    #[test]
    fn failing_editor_rejects() {
        let out = ExternalEditor::with_command("false").edit(&rec()).unwrap();
        assert_eq!(out, EditOutcome::Rejected);
    }

    #[test]
    fn emptied_file_rejects() {
        let out = ExternalEditor::with_command("truncate -s 0").edit(&rec()).unwrap();
        assert_eq!(out, EditOutcome::Rejected);
    }

    #[test]
    fn rewritten_file_is_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ed.sh");
        std::fs::write(&script, "#!/bin/sh\nprintf '{\"label\":\"bank\",\"username\":\"jdoe\"}' > \"$1\"\n").unwrap();
        let cmd = format!("sh {}", script.display());
        match ExternalEditor::with_command(cmd).edit(&rec()).unwrap() {
            EditOutcome::Changed(r) => assert_eq!(r.username, "jdoe"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ed.sh");
        std::fs::write(&script, "#!/bin/sh\necho 'not json' > \"$1\"\n").unwrap();
        let cmd = format!("sh {}", script.display());
        assert!(matches!(
            ExternalEditor::with_command(cmd).edit(&rec()),
            Err(Error::Editor(_))
        ));
    }

    #[test]
    fn missing_program_is_an_error() {
        assert!(matches!(
            ExternalEditor::with_command("/nonexistent/editor").edit(&rec()),
            Err(Error::Editor(_))
        ));
    }
}
