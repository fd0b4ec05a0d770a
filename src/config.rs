// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of pinlock's settings file. The settings file is read
//! once at start up into a [`Settings`] value, which is then handed by
//! reference to every component that needs project or machine information.
//! Nothing in pinlock reads configuration from global state.
//!
//! # General Layout
//!
//! ```toml
//! [solver]
//! program = "spack"
//! environment = "$SPACK_ENV"
//!
//! [[package]]
//! name = "amr-wind"
//! git = "https://github.com/Exawind/amr-wind.git"
//!
//! [[package.version]]
//! name = "main"
//! branch = "main"
//!
//! [[develop]]
//! name = "amr-wind"
//! source = "~/src/amr-wind"
//! build = "~/build/amr-wind"
//! prefix = "~/install/amr-wind"
//!
//! [[machine]]
//! name = "perlmutter"
//!
//! [[machine.rule]]
//! env = "NERSC_HOST"
//! equals = "perlmutter"
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Settings layout.
///
/// Composed of four parts: how to reach the host solver, the version catalog
/// of packages that may track branches, the developed packages used for
/// compile command merging, and declarative machine detection rules.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// How to invoke the host dependency solver.
    #[serde(default)]
    pub solver: SolverSettings,

    /// Version catalog of packages.
    #[serde(default, rename = "package", skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<PackageEntry>,

    /// Packages under development.
    #[serde(default, rename = "develop", skip_serializing_if = "Vec::is_empty")]
    pub develop: Vec<DevelopEntry>,

    /// Machine detection rules.
    #[serde(default, rename = "machine", skip_serializing_if = "Vec::is_empty")]
    pub machines: Vec<MachineEntry>,
}

impl Settings {
    /// Load settings from target path.
    ///
    /// A missing settings file is not an error. Default settings are used
    /// instead.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if settings file exists but cannot be
    ///   read.
    /// - Return [`ConfigError::Deserialize`] if settings file is malformed.
    #[instrument(skip(path), level = "debug")]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("no settings at {:?}, using defaults", path.display());
            return Ok(Self::default());
        }

        debug!("load settings from {:?}", path.display());
        read_to_string(path)
            .map_err(|err| ConfigError::Read {
                source: err,
                path: path.to_path_buf(),
            })?
            .parse()
    }

    /// Find package entry in version catalog by name.
    pub fn package(&self, name: impl AsRef<str>) -> Option<&PackageEntry> {
        self.packages
            .iter()
            .find(|package| package.name == name.as_ref())
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on all path fields.
        if let Some(environment) = &settings.solver.environment {
            settings.solver.environment = Some(expand_path(environment)?);
        }
        for entry in &mut settings.develop {
            entry.source = expand_path(&entry.source)?;
            entry.build = expand_path(&entry.build)?;
            entry.prefix = expand_path(&entry.prefix)?;
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Host solver invocation settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SolverSettings {
    /// Executable of the host tool.
    #[serde(default = "default_program")]
    pub program: String,

    /// Extra arguments placed before the subcommand.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment directory to solve in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<PathBuf>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            environment: None,
        }
    }
}

fn default_program() -> String {
    "spack".into()
}

/// Version catalog entry for a single package.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PackageEntry {
    /// Name of the package.
    pub name: String,

    /// Repository URL to query branches from.
    pub git: String,

    /// Declared versions of the package.
    #[serde(default, rename = "version", skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<VersionEntry>,
}

impl PackageEntry {
    /// Find declared version by name.
    pub fn version(&self, name: impl AsRef<str>) -> Option<&VersionEntry> {
        self.versions
            .iter()
            .find(|version| version.name == name.as_ref())
    }
}

/// Declared version of a package.
///
/// At most one of `branch`, `tag`, or `commit` is expected. Only versions
/// with a branch can be pinned.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct VersionEntry {
    /// Version label, e.g., "main" or "1.0.0".
    pub name: String,

    /// Branch the version tracks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Tag the version refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Commit the version refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    /// Repository URL that overrides the package level one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,
}

/// Package under development.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct DevelopEntry {
    /// Name of the package.
    pub name: String,

    /// Source tree of the package.
    pub source: PathBuf,

    /// Build directory containing `compile_commands.json`.
    pub build: PathBuf,

    /// Install prefix of the package.
    pub prefix: PathBuf,
}

/// Declarative machine detection entry.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineEntry {
    /// Name of the machine.
    pub name: String,

    /// All rules must hold for the machine to match.
    #[serde(default, rename = "rule", skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<MachineRule>,
}

/// Environment variable predicate.
///
/// Every predicate given must hold, checked in the following order:
/// `equals`, `prefix`, then `set`. With no predicate given, the variable only
/// needs to be set.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineRule {
    /// Environment variable to inspect.
    pub env: String,

    /// Variable must equal this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<String>,

    /// Variable must start with this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Variable must, or must not, be set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<bool>,
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read settings file.
    #[error("failed to read settings at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
