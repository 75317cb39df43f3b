use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::non_empty_env;

/// API key supplied by the user. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Trimmed key, or `None` when blank.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.
    pub fn from_env() -> Option<Self> {
        non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .and_then(Self::new)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<char>>()
            .into_iter()
            .rev()
            .collect();
        if self.0.chars().count() <= 4 {
            "****".to_string()
        } else {
            format!("****{tail}")
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

/// Session-owned credential lifecycle: absent until the user provides one,
/// then shared by every backend call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CredentialState {
    #[default]
    Absent,
    Set(Credential),
}

impl CredentialState {
    pub fn get(&self) -> Option<&Credential> {
        match self {
            CredentialState::Absent => None,
            CredentialState::Set(credential) => Some(credential),
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, CredentialState::Set(_))
    }
}

impl From<Option<Credential>> for CredentialState {
    fn from(value: Option<Credential>) -> Self {
        match value {
            Some(credential) => CredentialState::Set(credential),
            None => CredentialState::Absent,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    gemini_api_key: String,
}

/// Local key file, `<config_dir>/ethereal/credential.json` by default.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_location() -> Result<Self> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("could not determine config directory"))?;
        Ok(Self::new(config_dir.join("ethereal").join("credential.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        let stored: StoredCredential = serde_json::from_str(&raw)
            .with_context(|| format!("invalid credential file {}", self.path.display()))?;
        Ok(Credential::new(stored.gemini_api_key))
    }

    pub fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = StoredCredential {
            gemini_api_key: credential.expose().to_string(),
        };
        let body = serde_json::to_string_pretty(&payload)?;
        owner_only_file(&self.path)
            .and_then(|mut file| file.write_all(body.as_bytes()))
            .with_context(|| format!("failed writing {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)
            .with_context(|| format!("failed removing {}", self.path.display()))?;
        Ok(true)
    }
}

// Truncates an existing file; new files are created 0600 on Unix.
fn owner_only_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}
