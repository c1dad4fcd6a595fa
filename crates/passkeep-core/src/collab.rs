//! Contracts for the collaborators the core calls out to but does not
//! implement: secret prompts, OTP code generation and interactive editing.

use zeroize::Zeroizing;

use crate::cipher::{self, Key};
use crate::db::{Database, Record};
use crate::error::{Error, Result};

/// Asks the user for a secret, such as the store passphrase.
pub trait SecretPrompt {
    fn prompt(&self, label: &str) -> Result<Zeroizing<String>>;
}

impl<F> SecretPrompt for F
where
    F: Fn(&str) -> Result<Zeroizing<String>>,
{
    fn prompt(&self, label: &str) -> Result<Zeroizing<String>> {
        self(label)
    }
}

/// Produces a one-time code from an `otpauth://` URL. The URL is opaque to
/// the core.
pub trait OtpGenerator {
    fn generate(&self, otp_url: &str, time_offset: i64) -> Result<String>;
}

/// Result of handing a value to an [`Editor`].
#[derive(Debug, Clone, PartialEq)]
pub enum EditOutcome<T> {
    Changed(T),
    Unchanged,
    /// The user abandoned the edit.
    Rejected,
}

impl<T> EditOutcome<T> {
    pub fn is_changed(&self) -> bool {
        matches!(self, EditOutcome::Changed(_))
    }
}

/// Lets a user hand-edit a value.
pub trait Editor<T> {
    fn edit(&mut self, value: &T) -> Result<EditOutcome<T>>;
}

/// Run `editor` over record `index` and store the result.
///
/// On `Changed` the record is replaced and the previous version is
/// returned inside the outcome. `Unchanged` and `Rejected` leave the
/// database untouched and are not errors.
pub fn edit_record<E>(db: &mut Database, index: usize, editor: &mut E) -> Result<EditOutcome<Record>>
where
    E: Editor<Record> + ?Sized,
{
    let current = db.records.get(index).ok_or(Error::NoSuchRecord(index))?;
    match editor.edit(current)? {
        EditOutcome::Changed(new) if new == *current => Ok(EditOutcome::Unchanged),
        EditOutcome::Changed(new) => {
            let old = std::mem::replace(&mut db.records[index], new);
            tracing::debug!(index, "record edited");
            Ok(EditOutcome::Changed(old))
        }
        EditOutcome::Unchanged => Ok(EditOutcome::Unchanged),
        EditOutcome::Rejected => Ok(EditOutcome::Rejected),
    }
}

/// A store key function that prompts for the passphrase and stretches it
/// with the stored salt.
pub fn passphrase_key_fn<'a, P>(prompt: &'a P, label: &'a str) -> impl Fn(&[u8]) -> Result<Key> + 'a
where
    P: SecretPrompt + ?Sized,
{
    move |salt: &[u8]| {
        let pass = prompt.prompt(label)?;
        cipher::access_key(pass.as_bytes(), salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Scripted(Option<EditOutcome<Record>>);

    impl Editor<Record> for Scripted {
        fn edit(&mut self, _value: &Record) -> Result<EditOutcome<Record>> {
            self.0.take().ok_or_else(|| Error::Editor("called twice".into()))
        }
    }

    struct FixedOtp;

    impl OtpGenerator for FixedOtp {
        fn generate(&self, otp_url: &str, time_offset: i64) -> Result<String> {
            Ok(format!("{}:{time_offset}", otp_url.len()))
        }
    }

    fn db() -> Database {
        Database {
            defaults: None,
            records: vec![Record {
                label: "bank".into(),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn changed_replaces_the_record() {
        let mut d = db();
        let edited = Record {
            label: "bank".into(),
            username: "jdoe".into(),
            ..Default::default()
        };
        let out = edit_record(&mut d, 0, &mut Scripted(Some(EditOutcome::Changed(edited)))).unwrap();
        match out {
            EditOutcome::Changed(old) => assert!(old.username.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(d.records[0].username, "jdoe");
    }

    #[test]
    fn identical_edit_is_unchanged() {
        let mut d = db();
        let same = d.records[0].clone();
        let out = edit_record(&mut d, 0, &mut Scripted(Some(EditOutcome::Changed(same)))).unwrap();
        assert_eq!(out, EditOutcome::Unchanged);
    }

    #[test]
    fn rejected_and_unchanged_are_not_errors() {
        let mut d = db();
        let before = d.clone();
        let out = edit_record(&mut d, 0, &mut Scripted(Some(EditOutcome::Rejected))).unwrap();
        assert_eq!(out, EditOutcome::Rejected);
        let out = edit_record(&mut d, 0, &mut Scripted(Some(EditOutcome::Unchanged))).unwrap();
        assert_eq!(out, EditOutcome::Unchanged);
        assert_eq!(d, before);
    }

    #[test]
    fn editor_failure_propagates() {
        let mut d = db();
        assert!(matches!(
            edit_record(&mut d, 0, &mut Scripted(None)),
            Err(Error::Editor(_))
        ));
        assert!(matches!(
            edit_record(&mut d, 9, &mut Scripted(Some(EditOutcome::Unchanged))),
            Err(Error::NoSuchRecord(9))
        ));
    }

    #[test]
    fn otp_goes_through_the_generator() {
        let mut rec = db().records.remove(0);
        assert!(matches!(rec.otp_code(&FixedOtp, 0), Err(Error::NoOtp(_))));
        rec.otp = Some("otpauth://totp/x".into());
        assert_eq!(rec.otp_code(&FixedOtp, -1).unwrap(), "16:-1");
    }

    #[test]
    fn key_fn_prompts_once_per_open() {
        let calls = Cell::new(0);
        let prompt = |label: &str| {
            assert_eq!(label, "Passphrase");
            calls.set(calls.get() + 1);
            Ok::<_, Error>(Zeroizing::new("hunter2".to_string()))
        };
        let key_fn = passphrase_key_fn(&prompt, "Passphrase");
        let salt = [7u8; 16];
        let a = key_fn(&salt).unwrap();
        let b = cipher::access_key(b"hunter2", &salt).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(calls.get(), 1);
    }
}
