use passkeep_core::collab::SecretPrompt;
use passkeep_core::error::{Error, Result};
use zeroize::Zeroizing;

/// Non-interactive passphrase, for scripts and tests.
pub const PASSPHRASE_ENV: &str = "PASSKEEP_PASSPHRASE";
/// Non-interactive replacement passphrase for `rekey`.
pub const NEW_PASSPHRASE_ENV: &str = "PASSKEEP_NEW_PASSPHRASE";
pub const MIN_NEW_PASSPHRASE: usize = 12;

/// Reads secrets from the terminal without echo, or from an environment
/// variable when it is set and non-empty.
pub struct TerminalPrompt {
    env: &'static str,
}

impl TerminalPrompt {
    /// Current passphrase, overridable through [`PASSPHRASE_ENV`].
    pub fn new() -> Self {
        Self::from_env_var(PASSPHRASE_ENV)
    }

    /// Replacement passphrase, overridable through [`NEW_PASSPHRASE_ENV`].
    pub fn replacement() -> Self {
        Self::from_env_var(NEW_PASSPHRASE_ENV)
    }

    fn from_env_var(env: &'static str) -> Self {
        Self { env }
    }

    fn env_secret(&self) -> Option<Zeroizing<String>> {
        std::env::var(self.env)
            .ok()
            .filter(|pw| !pw.is_empty())
            .map(Zeroizing::new)
    }

    /// Ask twice for a new passphrase and enforce a minimum length.
    pub fn new_passphrase(&self, label: &str) -> Result<Zeroizing<String>> {
        let first = self.prompt(label)?;
        if first.chars().count() < MIN_NEW_PASSPHRASE {
            return Err(Error::Prompt(format!(
                "passphrase too short; minimum {MIN_NEW_PASSPHRASE} characters"
            )));
        }
        if self.env_secret().is_some() {
            return Ok(first);
        }
        let second = self.prompt("Confirm passphrase")?;
        if first != second {
            return Err(Error::Prompt("passphrases do not match".into()));
        }
        Ok(first)
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretPrompt for TerminalPrompt {
    fn prompt(&self, label: &str) -> Result<Zeroizing<String>> {
        if let Some(pw) = self.env_secret() {
            return Ok(pw);
        }
        rpassword::prompt_password(format!("{label}: "))
            .map(Zeroizing::new)
            .map_err(|e| Error::Prompt(e.to_string()))
    }
}
