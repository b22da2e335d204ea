//! Wrangler manifest read/write with atomic semantics.
//!
//! The manifest (`wrangler.toml`) is a TOML document with top-level `name`,
//! `main`, `compatibility_date`, an optional top-level `[[d1_databases]]`
//! array (the production bindings), and `[env.<name>]` subtables carrying
//! their own bindings. Keys the mutator does not understand are kept in
//! flattened passthrough tables so round-trips preserve them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Environment;
use crate::errors::ManifestError;
use crate::events::{DeployEvent, EventSender};

/// One `[[d1_databases]]` entry binding a logical name to a database.
///
/// Accepts both `database_name` and `databaseName` key forms on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseBinding {
    pub binding: String,
    #[serde(alias = "databaseName")]
    pub database_name: String,
    #[serde(alias = "databaseId")]
    pub database_id: String,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl DatabaseBinding {
    pub fn new(
        binding: impl Into<String>,
        database_name: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            binding: binding.into(),
            database_name: database_name.into(),
            database_id: database_id.into(),
            extra: toml::Table::new(),
        }
    }
}

/// An `[env.<name>]` subtable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub d1_databases: Vec<DatabaseBinding>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

/// Parsed wrangler manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WranglerConfig {
    pub name: String,
    pub main: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility_date: Option<String>,
    /// Top-level bindings; these ARE the production bindings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub d1_databases: Vec<DatabaseBinding>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, EnvSection>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl Default for WranglerConfig {
    /// Minimal default used when no manifest exists yet.
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            main: "src/index.js".to_string(),
            compatibility_date: None,
            d1_databases: Vec::new(),
            env: BTreeMap::new(),
            extra: toml::Table::new(),
        }
    }
}

/// Result of `validate`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl WranglerConfig {
    pub fn minimal(name: impl Into<String>, environment: Environment) -> Self {
        let mut config = Self {
            name: name.into(),
            ..Self::default()
        };
        config.ensure_environment(environment);
        config
    }

    /// Idempotently make sure the environment has a section to hold
    /// bindings. `production` lives at the top level, so nothing is added
    /// for it. Returns true when the document changed.
    pub fn ensure_environment(&mut self, environment: Environment) -> bool {
        if environment == Environment::Production {
            return false;
        }
        let name = environment.as_str();
        if self.env.contains_key(name) {
            false
        } else {
            self.env.insert(name.to_string(), EnvSection::default());
            true
        }
    }

    pub fn has_environment(&self, environment: Environment) -> bool {
        environment == Environment::Production || self.env.contains_key(environment.as_str())
    }

    /// Append a binding, or update the entry whose `database_name` matches.
    /// Returns true when the document changed.
    pub fn add_database_binding(
        &mut self,
        environment: Environment,
        binding: DatabaseBinding,
    ) -> bool {
        self.ensure_environment(environment);
        let bindings = self.bindings_mut(environment);
        match bindings
            .iter_mut()
            .find(|b| b.database_name == binding.database_name)
        {
            Some(existing) => {
                if *existing == binding {
                    false
                } else {
                    *existing = binding;
                    true
                }
            }
            None => {
                bindings.push(binding);
                true
            }
        }
    }

    /// Remove the binding with the given `database_name`. Returns true when
    /// something was removed.
    pub fn remove_database_binding(
        &mut self,
        environment: Environment,
        database_name: &str,
    ) -> bool {
        let bindings = self.bindings_mut(environment);
        let before = bindings.len();
        bindings.retain(|b| b.database_name != database_name);
        bindings.len() != before
    }

    pub fn database_bindings(&self, environment: Environment) -> &[DatabaseBinding] {
        if environment == Environment::Production {
            &self.d1_databases
        } else {
            self.env
                .get(environment.as_str())
                .map(|section| section.d1_databases.as_slice())
                .unwrap_or(&[])
        }
    }

    fn bindings_mut(&mut self, environment: Environment) -> &mut Vec<DatabaseBinding> {
        if environment == Environment::Production {
            &mut self.d1_databases
        } else {
            &mut self
                .env
                .entry(environment.as_str().to_string())
                .or_default()
                .d1_databases
        }
    }

    /// Check required keys and collect warnings.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        if self.name.trim().is_empty() {
            report.errors.push("missing required key: name".to_string());
        }
        if self.main.trim().is_empty() {
            report.errors.push("missing required key: main".to_string());
        }
        match self.compatibility_date {
            Some(ref date) if !date.trim().is_empty() => {}
            _ => report
                .errors
                .push("missing required key: compatibility_date".to_string()),
        }
        if self.env.is_empty() {
            report
                .warnings
                .push("no [env.<name>] sections defined; only production is deployable".to_string());
        }
        report.valid = report.errors.is_empty();
        report
    }
}

/// File-backed manifest mutator with atomic write semantics.
pub struct ManifestMutator {
    path: PathBuf,
    dry_run: bool,
    events: EventSender,
}

impl ManifestMutator {
    pub fn new(path: impl Into<PathBuf>, dry_run: bool, events: EventSender) -> Self {
        Self {
            path: path.into(),
            dry_run,
            events,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and parse the manifest. A missing file yields the minimal
    /// default; a malformed file is a `ConfigParseError`.
    pub fn read(&self) -> Result<WranglerConfig, ManifestError> {
        if !self.path.exists() {
            return Ok(WranglerConfig::default());
        }
        let content =
            std::fs::read_to_string(&self.path).map_err(|source| ManifestError::ReadFailed {
                path: self.path.clone(),
                source,
            })?;
        toml::from_str(&content).map_err(|err| ManifestError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    /// Serialize and atomically replace the manifest (write temp, rename).
    /// In dry-run mode the serialized content goes to the event channel and
    /// the file is untouched.
    pub fn write(&self, config: &WranglerConfig) -> Result<(), ManifestError> {
        let serialized = toml::to_string_pretty(config).map_err(|err| ManifestError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })?;

        if self.dry_run {
            self.events.emit(DeployEvent::DryRunArtifact {
                description: format!("write {}", self.path.display()),
                content: serialized,
            });
            return Ok(());
        }

        let tmp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &serialized).map_err(|source| ManifestError::WriteFailed {
            path: tmp_path.clone(),
            source,
        })?;

        if let Err(source) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(ManifestError::WriteFailed {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }

    /// Create and persist a minimal manifest.
    pub fn create_minimal(
        &self,
        name: &str,
        environment: Environment,
    ) -> Result<WranglerConfig, ManifestError> {
        let config = WranglerConfig::minimal(name, environment);
        self.write(&config)?;
        Ok(config)
    }

    /// File-level `ensure_environment`: read, mutate, write when changed.
    pub fn ensure_environment(&self, environment: Environment) -> Result<bool, ManifestError> {
        let mut config = self.read()?;
        let changed = config.ensure_environment(environment);
        if changed {
            self.write(&config)?;
        }
        Ok(changed)
    }

    /// File-level binding upsert.
    pub fn add_database_binding(
        &self,
        environment: Environment,
        binding: DatabaseBinding,
    ) -> Result<bool, ManifestError> {
        let mut config = self.read()?;
        let changed = config.add_database_binding(environment, binding);
        if changed {
            self.write(&config)?;
        }
        Ok(changed)
    }

    /// File-level binding removal.
    pub fn remove_database_binding(
        &self,
        environment: Environment,
        database_name: &str,
    ) -> Result<bool, ManifestError> {
        let mut config = self.read()?;
        let changed = config.remove_database_binding(environment, database_name);
        if changed {
            self.write(&config)?;
        }
        Ok(changed)
    }

    pub fn database_bindings(
        &self,
        environment: Environment,
    ) -> Result<Vec<DatabaseBinding>, ManifestError> {
        Ok(self.read()?.database_bindings(environment).to_vec())
    }

    pub fn validate(&self) -> Result<ValidationReport, ManifestError> {
        Ok(self.read()?.validate())
    }
}
