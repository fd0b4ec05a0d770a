// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dependency specification model.
//!
//! A __specification__ names a build target together with the version,
//! compiler, compiler flags, and variants it was solved with. Pinlock never
//! builds anything itself. It only reads specifications produced by the host
//! solver, and renders them back into the textual form the host understands.
//!
//! # Specification Strings
//!
//! The textual form of a specification reads as follows:
//!
//! ```text
//! name@version%compiler@compiler-version cflags="-O2" +cuda~rocm build_type=Release
//! ```
//!
//! Compiler flags are always rendered in a fixed key order. Boolean variants
//! are folded into a single token sorted by name, followed by every valued
//! variant sorted by name.
//!
//! # Git-Ref Versions
//!
//! A version can either be a plain token like `main` or `1.0.0`, or a
//! __git-ref__ version like `git.<commit>=<label>`. A git-ref version carries
//! the exact commit that was built together with the human readable version
//! label it stands in for.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult, Write},
    str::FromStr,
};

/// Compiler flag keys in rendering order.
pub const FLAG_KEYS: [&str; 6] = ["cflags", "cxxflags", "fflags", "cppflags", "ldflags", "ldlibs"];

/// Accessors any concrete graph node must provide.
///
/// Pinning and lock comparison only ever talk to graph nodes through this
/// trait, so neither depends on the exact shape of the host's objects.
pub trait SpecNode {
    /// Name of the package.
    fn name(&self) -> &str;

    /// Solved version.
    fn version(&self) -> &Version;

    /// Solved variants keyed by variant name.
    fn variants(&self) -> &BTreeMap<String, VariantValue>;

    /// Compiler the node was solved with, if any.
    fn compiler(&self) -> Option<&Compiler>;

    /// Compiler flags keyed by flag name.
    fn flags(&self) -> &BTreeMap<String, Vec<String>>;

    /// Digest over the node's own attributes and its dependencies' content
    /// hashes.
    fn content_hash(&self) -> &str;

    /// Digest over the full transitive dependency structure, as recorded by
    /// the solver.
    fn graph_hash(&self) -> Option<&str>;

    /// Check if node has been fully solved.
    fn is_concrete(&self) -> bool {
        self.graph_hash().is_some() && self.version().is_concrete()
    }

    /// Render compiler, flags, and variants, leaving out denied variant keys.
    fn qualifiers(&self, deny: &[&str]) -> String {
        let mut out = String::new();
        if let Some(compiler) = self.compiler() {
            let _ = write!(out, "%{compiler}");
        }

        for key in FLAG_KEYS {
            if let Some(values) = self.flags().get(key).filter(|values| !values.is_empty()) {
                let _ = write!(out, " {key}=\"{}\"", values.join(" "));
            }
        }

        let variants = self
            .variants()
            .iter()
            .filter(|(key, _)| !deny.contains(&key.as_str()));

        let mut toggles = String::new();
        let mut valued = String::new();
        for (key, value) in variants {
            match value {
                VariantValue::Bool(true) => {
                    let _ = write!(toggles, "+{key}");
                }
                VariantValue::Bool(false) => {
                    let _ = write!(toggles, "~{key}");
                }
                VariantValue::Single(value) => {
                    let _ = write!(valued, " {key}={}", quote_value(value));
                }
                VariantValue::Multi(values) if values.is_empty() => continue,
                VariantValue::Multi(values) => {
                    let _ = write!(valued, " {key}={}", quote_value(&values.join(",")));
                }
            }
        }

        if !toggles.is_empty() {
            out.push(' ');
            out.push_str(&toggles);
        }
        out.push_str(&valued);

        out
    }

    /// Render full specification string with the node's own version.
    fn to_spec_string(&self) -> String {
        format!("{}@{}{}", self.name(), self.version(), self.qualifiers(&[]))
    }
}

/// Solved version of a specification.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    /// Plain version token, e.g., "main", "1.0.0".
    Plain(String),

    /// Commit qualified version, e.g., "git.abc123=main".
    GitRef {
        commit: String,
        label: Option<String>,
    },
}

impl Version {
    /// Construct git-ref version pairing a commit with a version label.
    pub fn git_ref(commit: impl Into<String>, label: impl Into<String>) -> Self {
        Self::GitRef {
            commit: commit.into(),
            label: Some(label.into()),
        }
    }

    /// Human readable version label used for catalog lookups.
    ///
    /// Git-ref versions answer with their paired label, so a pinned version
    /// looks up the same catalog entry as the version it was pinned from.
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Plain(token) => Some(token.as_str()),
            Self::GitRef { label, .. } => label.as_deref(),
        }
    }

    /// Check if version names exactly one version.
    ///
    /// Ranges ("1.0:2.0") and lists ("1.0,1.1") are not concrete.
    pub fn is_concrete(&self) -> bool {
        match self {
            Self::Plain(token) => {
                !token.is_empty()
                    && !token.contains([':', ','])
                    && !token.contains(char::is_whitespace)
            }
            Self::GitRef { commit, .. } => !commit.is_empty(),
        }
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let data = data.trim().trim_start_matches('=');
        let version = match data.strip_prefix("git.") {
            Some(rest) => match rest.split_once('=') {
                Some((commit, label)) => Self::git_ref(commit, label),
                None => Self::GitRef {
                    commit: rest.into(),
                    label: None,
                },
            },
            None => Self::Plain(data.into()),
        };

        Ok(version)
    }
}

impl Display for Version {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Plain(token) => fmt.write_str(token),
            Self::GitRef {
                commit,
                label: Some(label),
            } => write!(fmt, "git.{commit}={label}"),
            Self::GitRef {
                commit,
                label: None,
            } => write!(fmt, "git.{commit}"),
        }
    }
}

/// Value of a single variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariantValue {
    Bool(bool),
    Single(String),
    Multi(Vec<String>),
}

impl Display for VariantValue {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Bool(value) => write!(fmt, "{value}"),
            Self::Single(value) => fmt.write_str(value),
            Self::Multi(values) => fmt.write_str(&values.join(",")),
        }
    }
}

/// Compiler identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Compiler {
    pub name: String,
    pub version: Option<String>,
}

impl Compiler {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl Display for Compiler {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match &self.version {
            Some(version) => write!(fmt, "{}@{version}", self.name),
            None => fmt.write_str(&self.name),
        }
    }
}

/// A node of a solved dependency graph.
///
/// Constructed by the graph loader. Only the loader ever fills in the
/// content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteSpec {
    pub name: String,
    pub version: Version,
    pub compiler: Option<Compiler>,
    pub flags: BTreeMap<String, Vec<String>>,
    pub variants: BTreeMap<String, VariantValue>,
    pub graph_hash: Option<String>,
    pub(crate) content_hash: String,
}

impl ConcreteSpec {
    /// Construct new specification with no compiler, flags, or variants.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            compiler: None,
            flags: BTreeMap::new(),
            variants: BTreeMap::new(),
            graph_hash: None,
            content_hash: String::new(),
        }
    }

    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_flag(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.flags.insert(key.into(), values);
        self
    }

    pub fn with_variant(mut self, key: impl Into<String>, value: VariantValue) -> Self {
        self.variants.insert(key.into(), value);
        self
    }

    pub fn with_graph_hash(mut self, hash: impl Into<String>) -> Self {
        self.graph_hash = Some(hash.into());
        self
    }
}

impl SpecNode for ConcreteSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &Version {
        &self.version
    }

    fn variants(&self) -> &BTreeMap<String, VariantValue> {
        &self.variants
    }

    fn compiler(&self) -> Option<&Compiler> {
        self.compiler.as_ref()
    }

    fn flags(&self) -> &BTreeMap<String, Vec<String>> {
        &self.flags
    }

    fn content_hash(&self) -> &str {
        &self.content_hash
    }

    fn graph_hash(&self) -> Option<&str> {
        self.graph_hash.as_deref()
    }
}

fn quote_value(value: &str) -> String {
    if value.contains(char::is_whitespace) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}
