//! Process configuration, read from the environment at startup.

use std::path::PathBuf;

use anyhow::{bail, Result};

/// Name of the SQLite database file inside the state directory.
const DATABASE_FILE: &str = "whiteflag-state.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the record database. Created if missing.
    pub state_dir: PathBuf,
}

impl Config {
    /// Read configuration from the environment.
    ///
    /// `WHITEFLAG_STATE_DIR` picks the state directory; it defaults to the
    /// working directory.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let state_dir = match lookup("WHITEFLAG_STATE_DIR") {
            Some(raw) => {
                if raw.trim().is_empty() {
                    bail!("WHITEFLAG_STATE_DIR is set but empty");
                }
                PathBuf::from(raw)
            }
            None => PathBuf::from("."),
        };

        Ok(Self { state_dir })
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join(DATABASE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_working_directory() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("."));
        assert_eq!(config.database_path(), PathBuf::from("./whiteflag-state.db"));
    }

    #[test]
    fn test_honours_state_dir_override() {
        let config = Config::from_lookup(|name| match name {
            "WHITEFLAG_STATE_DIR" => Some("/var/lib/whiteflag".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/whiteflag"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/whiteflag/whiteflag-state.db")
        );
    }

    #[test]
    fn test_rejects_blank_state_dir() {
        let result = Config::from_lookup(|name| match name {
            "WHITEFLAG_STATE_DIR" => Some("   ".to_string()),
            _ => None,
        });
        assert!(result.is_err());
    }
}
