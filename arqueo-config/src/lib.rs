//! Typed settings for Arqueo binaries, loaded from an optional TOML file and
//! `ARQUEO_*` environment overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Runtime settings for the engine and CLI.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database holding the fund, movement and closing records.
    pub database_path: PathBuf,
    /// Tenant the CLI operates on.
    pub company: String,
    /// Operator name stamped on mutations when no identity source is wired.
    pub operator: String,
    /// Seconds a movement stays claimed after an edit completes.
    pub edit_cooldown_secs: u64,
    /// Minutes east of UTC defining the fund's calendar days (e.g. -360 for
    /// UTC-6).
    pub utc_offset_minutes: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("arqueo.db"),
            company: "default".to_string(),
            operator: "operador".to_string(),
            edit_cooldown_secs: 3,
            utc_offset_minutes: 0,
        }
    }
}

impl Settings {
    /// Load settings, layering `path` (if it exists) and the environment
    /// over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(file) = path {
            builder = builder.add_source(File::from(file).required(false));
        }
        builder
            .add_source(Environment::with_prefix("ARQUEO"))
            .build()
            .context("failed to assemble configuration")?
            .try_deserialize()
            .context("invalid configuration values")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_without_a_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.company, "default");
        assert_eq!(settings.edit_cooldown_secs, 3);
        assert_eq!(settings.utc_offset_minutes, 0);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arqueo.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "company = \"acme\"\nedit_cooldown_secs = 10").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.company, "acme");
        assert_eq!(settings.edit_cooldown_secs, 10);
    }
}
