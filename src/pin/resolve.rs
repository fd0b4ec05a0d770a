// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version to branch resolution.
//!
//! A solved node can only be pinned if its version is declared to track a
//! branch. That knowledge lives in the __version catalog__, which maps each
//! package's declared versions to a branch, tag, or commit.

use crate::{
    config::Settings,
    spec::{SpecNode, Version},
};

use tracing::{debug, warn};

/// Association between a declared version and the branch it tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchBinding {
    /// Name of the package.
    pub package: String,

    /// Declared version label.
    pub version: String,

    /// Branch the version tracks.
    pub branch: String,

    /// Repository to query the branch from.
    pub url: String,
}

/// Outcome of a branch lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchLookup {
    /// Version tracks a branch.
    Branch(BranchBinding),

    /// Version is fixed, or the package is unknown to the catalog.
    NotBranch,

    /// Version is no longer declared by the package.
    Stale,
}

/// Source of declared versions.
pub trait VersionCatalog {
    /// Look up how a package declares a version.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError`] if the declaration itself is unusable.
    fn lookup(&self, package: &str, version: &str) -> Result<BranchLookup>;
}

impl VersionCatalog for Settings {
    fn lookup(&self, package: &str, version: &str) -> Result<BranchLookup> {
        let Some(entry) = self.package(package) else {
            return Ok(BranchLookup::NotBranch);
        };

        let Some(declared) = entry.version(version) else {
            return Ok(BranchLookup::Stale);
        };

        let Some(branch) = &declared.branch else {
            return Ok(BranchLookup::NotBranch);
        };

        if declared.tag.is_some() || declared.commit.is_some() {
            return Err(ResolveError::Conflicting {
                package: package.into(),
                version: version.into(),
            });
        }

        let url = declared.git.clone().unwrap_or_else(|| entry.git.clone());
        if url.is_empty() {
            return Err(ResolveError::NoRepository {
                package: package.into(),
            });
        }

        Ok(BranchLookup::Branch(BranchBinding {
            package: package.into(),
            version: version.into(),
            branch: branch.clone(),
            url,
        }))
    }
}

/// Determine branch a solved node is pinned to.
///
/// Nodes that were pinned before look up their paired version label, so
/// pinning them again resolves the same branch. Stale versions are reported
/// as a warning and skipped by the caller.
///
/// # Errors
///
/// - Return [`ResolveError`] if the catalog declaration is unusable.
pub fn lookup_branch(catalog: &impl VersionCatalog, node: &impl SpecNode) -> Result<BranchLookup> {
    let Some(label) = node.version().label() else {
        debug!("{} has no version label to look up", node.name());
        return Ok(BranchLookup::NotBranch);
    };

    let lookup = catalog.lookup(node.name(), label)?;
    match &lookup {
        BranchLookup::Branch(binding) => debug!(
            "{}@{} tracks branch {:?} of {}",
            node.name(),
            label,
            binding.branch,
            binding.url
        ),
        BranchLookup::NotBranch => debug!("{}@{} does not track a branch", node.name(), label),
        BranchLookup::Stale => match node.version() {
            Version::GitRef { .. } => warn!(
                "{}@{} pairs with version {:?} that is no longer declared, skipping",
                node.name(),
                node.version(),
                label
            ),
            Version::Plain(_) => warn!(
                "{}@{} is no longer declared, skipping",
                node.name(),
                label
            ),
        },
    }

    Ok(lookup)
}

/// Branch resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Version declares a branch along with a tag or commit.
    #[error("{package}@{version} declares a branch together with a tag or commit")]
    Conflicting { package: String, version: String },

    /// Package declares no repository to query.
    #[error("package {package:?} declares no git repository")]
    NoRepository { package: String },
}

/// Friendly result alias :3
pub type Result<T, E = ResolveError> = std::result::Result<T, E>;
