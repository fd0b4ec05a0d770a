// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pin branch tracking versions to commits.
//!
//! A version that tracks a branch resolves to whatever the branch points to
//! at solve time, so two solves a day apart can build different code.
//! __Pinning__ replaces such versions with a commit qualified version, i.e.,
//! `git.<commit>=<label>`, that keeps naming the same human readable version
//! while freezing the exact commit.
//!
//! # Pin Cycle
//!
//! Each root constraint of an environment goes through the following states:
//!
//! 1. __Unpinned__: the constraint is solved into a concrete graph.
//! 2. __RootResolved__: the root node is pinned if root pinning is enabled.
//! 3. __DepsResolved__: every transitive dependency is pinned if dependency
//!    pinning is enabled. Each pinned dependency replaces the constraint's
//!    `^<spec>` fragment of the same package, or is appended in traversal
//!    order.
//! 4. __Reconciled__: the assembled constraint is solved again from scratch
//!    to confirm that the pinned graph is still satisfiable.
//! 5. __Persisted__: the constraint replaces the original one in the
//!    manifest.
//!
//! Nodes that cannot be pinned, e.g., fixed versions, stale versions, or
//! nodes that are not concrete, are skipped. A failed remote query or a failed
//! reconciliation aborts the whole operation before anything is persisted.
//!
//! # See Also
//!
//! 1. [`resolve`]
//! 2. [`remote`]
//! 3. [`rewrite`]

pub mod remote;
pub mod resolve;
pub mod rewrite;

use crate::{
    graph::{GraphRoot, SpecGraph},
    manifest::ManifestDrafter,
    pin::{
        remote::{resolve_branch_tip, RemoteRefs},
        resolve::{lookup_branch, BranchLookup, VersionCatalog},
        rewrite::pinned_spec_string,
    },
    solver::Solver,
    spec::SpecNode,
};

use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{debug, info, instrument, warn};

/// Which nodes of a graph to pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinPolicy {
    pub roots: bool,
    pub dependencies: bool,
}

impl PinPolicy {
    /// Pin roots and dependencies alike.
    pub fn all() -> Self {
        Self {
            roots: true,
            dependencies: true,
        }
    }
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self::all()
    }
}

/// State of a single pin cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PinState {
    Unpinned,
    RootResolved,
    DepsResolved,
    Reconciled,
    Persisted,
}

impl PinState {
    /// State that follows this one.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Unpinned => Some(Self::RootResolved),
            Self::RootResolved => Some(Self::DepsResolved),
            Self::DepsResolved => Some(Self::Reconciled),
            Self::Reconciled => Some(Self::Persisted),
            Self::Persisted => None,
        }
    }
}

impl Display for PinState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Unpinned => "unpinned",
            Self::RootResolved => "root-resolved",
            Self::DepsResolved => "deps-resolved",
            Self::Reconciled => "reconciled",
            Self::Persisted => "persisted",
        };
        fmt.write_str(name)
    }
}

/// Root constraint along with its pinned replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedRoot {
    /// Constraint as written in the manifest.
    pub original: String,

    /// Assembled pinned constraint.
    pub pinned: String,

    /// How far the pin cycle got.
    pub state: PinState,
}

impl PinnedRoot {
    fn advance(&mut self, to: PinState) {
        debug_assert_eq!(self.state.next(), Some(to));
        debug!("{:?}: {} -> {}", self.original, self.state, to);
        self.state = to;
    }
}

/// Pin orchestrator.
///
/// Talks to the host solver, the remote, and the version catalog strictly
/// through their traits. Everything runs sequentially, one remote query at
/// a time.
#[derive(Debug)]
pub struct Pinner<'a, S, R, C>
where
    S: Solver,
    R: RemoteRefs,
    C: VersionCatalog,
{
    solver: &'a S,
    remote: &'a R,
    catalog: &'a C,
    policy: PinPolicy,
}

impl<'a, S, R, C> Pinner<'a, S, R, C>
where
    S: Solver,
    R: RemoteRefs,
    C: VersionCatalog,
{
    /// Construct new pin orchestrator.
    pub fn new(solver: &'a S, remote: &'a R, catalog: &'a C, policy: PinPolicy) -> Self {
        Self {
            solver,
            remote,
            catalog,
            policy,
        }
    }

    /// Pin a single node.
    ///
    /// Returns `None` if the node does not track a branch, is stale, or is
    /// not concrete.
    ///
    /// # Errors
    ///
    /// - Return [`PinError::Resolve`] if the catalog declaration is unusable.
    /// - Return [`PinError::Remote`] if the branch tip cannot be resolved.
    pub fn pin_node(&self, node: &impl SpecNode) -> Result<Option<String>> {
        if !node.is_concrete() {
            warn!("{} is not concrete, skipping", node.name());
            return Ok(None);
        }

        let binding = match lookup_branch(self.catalog, node)? {
            BranchLookup::Branch(binding) => binding,
            BranchLookup::NotBranch | BranchLookup::Stale => return Ok(None),
        };

        let commit = resolve_branch_tip(self.remote, &binding.url, &binding.branch)?;
        Ok(pinned_spec_string(node, &commit))
    }

    /// Assemble pinned constraint for a root of a solved graph.
    ///
    /// The root's own pinned specification comes first, or the original
    /// constraint if the root is not pinned. A pinned dependency replaces the
    /// original constraint's `^` fragment of the same package, or follows in
    /// traversal order if there is none.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Pinner::pin_node`].
    pub fn pin_graph(
        &self,
        graph: &SpecGraph,
        root: &GraphRoot,
        pinned: &mut PinnedRoot,
    ) -> Result<()> {
        let mut constraint = Constraint::parse(&pinned.original);
        let node = graph.node(root.index);
        if self.policy.roots {
            if let Some(spec) = self.pin_node(node)? {
                constraint = Constraint::new(spec);
            }
        }
        pinned.advance(PinState::RootResolved);

        if self.policy.dependencies {
            for index in graph.dependencies(root.index) {
                if let Some(spec) = self.pin_node(graph.node(index))? {
                    constraint.pin_dependency(spec);
                }
            }
        }
        pinned.pinned = constraint.to_string();
        pinned.advance(PinState::DepsResolved);

        Ok(())
    }

    /// Solve, pin, and reconcile a single root constraint.
    ///
    /// # Errors
    ///
    /// - Return [`PinError::Solver`] if the constraint cannot be solved.
    /// - Return [`PinError::Reconcile`] if the pinned constraint cannot be
    ///   solved again.
    /// - Return any error of [`Pinner::pin_node`].
    #[instrument(skip(self), level = "debug")]
    pub fn pin_constraint(&self, constraint: &str, fresh: bool) -> Result<PinnedRoot> {
        let graph = self.solver.solve(constraint, fresh)?;
        let root = graph
            .roots()
            .first()
            .ok_or_else(|| PinError::NoRoot {
                spec: constraint.into(),
            })?;

        let mut pinned = PinnedRoot {
            original: constraint.into(),
            pinned: constraint.into(),
            state: PinState::Unpinned,
        };
        self.pin_graph(&graph, root, &mut pinned)?;
        self.reconcile(graph.node(root.index).name(), &pinned.pinned)?;
        pinned.advance(PinState::Reconciled);

        Ok(pinned)
    }

    /// Solve pinned constraint again from scratch.
    ///
    /// # Errors
    ///
    /// - Return [`PinError::Reconcile`] if the pinned constraint cannot be
    ///   solved.
    /// - Return [`PinError::RootMismatch`] if the solved root is a different
    ///   package.
    pub fn reconcile(&self, name: &str, pinned: &str) -> Result<SpecGraph> {
        let graph = self
            .solver
            .solve(pinned, true)
            .map_err(|err| PinError::Reconcile {
                spec: pinned.into(),
                source: err,
            })?;

        let solved = graph
            .roots()
            .first()
            .map(|root| graph.node(root.index).name().to_string())
            .unwrap_or_default();
        if solved != name {
            return Err(PinError::RootMismatch {
                expected: name.into(),
                solved,
            });
        }

        Ok(graph)
    }

    /// Pin root constraints of an environment manifest.
    ///
    /// Only constraints whose package name appears in `select` are pinned,
    /// unless `select` is empty. Every selected constraint is pinned and
    /// reconciled before the manifest is touched. With `dry_run` set, the
    /// manifest is never written.
    ///
    /// # Errors
    ///
    /// - Return [`PinError::Manifest`] if manifest cannot be read or written.
    /// - Return any error of [`Pinner::pin_constraint`].
    #[instrument(skip(self, manifest, select), level = "debug")]
    pub fn pin_manifest(
        &self,
        manifest: &ManifestDrafter,
        select: &[String],
        fresh: bool,
        dry_run: bool,
    ) -> Result<Vec<PinnedRoot>> {
        let mut pinned = Vec::new();
        for constraint in manifest.current_specs()? {
            let name = constraint_name(&constraint);
            if !select.is_empty() && !select.iter().any(|selected| selected == name) {
                debug!("skip unselected root {constraint:?}");
                continue;
            }

            info!("pin {constraint}");
            pinned.push(self.pin_constraint(&constraint, fresh)?);
        }

        if dry_run {
            return Ok(pinned);
        }

        manifest.edit(|specs| {
            for root in &mut pinned {
                if specs.replace(&root.original, root.pinned.clone()) {
                    root.advance(PinState::Persisted);
                }
            }
        })?;

        Ok(pinned)
    }
}

/// Package name of a root constraint.
///
/// Everything up to the first version, compiler, variant, or whitespace
/// marker.
pub fn constraint_name(constraint: &str) -> &str {
    let constraint = constraint.trim();
    let end = constraint
        .find(|ch: char| matches!(ch, '@' | '%' | '+' | '~' | '^') || ch.is_whitespace())
        .unwrap_or(constraint.len());

    &constraint[..end]
}

/// Root constraint split into its head and `^` dependency fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    head: String,
    dependencies: Vec<String>,
}

impl Constraint {
    /// Construct constraint without dependency fragments.
    pub fn new(head: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            dependencies: Vec::new(),
        }
    }

    /// Split constraint at every `^` outside of a quoted value.
    pub fn parse(constraint: &str) -> Self {
        let mut fragments = Vec::new();
        let mut quote = None;
        let mut start = 0;
        for (index, ch) in constraint.char_indices() {
            match (quote, ch) {
                (Some(open), _) if ch == open => quote = None,
                (Some(_), _) => {}
                (None, '"' | '\'') => quote = Some(ch),
                (None, '^') => {
                    fragments.push(constraint[start..index].trim());
                    start = index + 1;
                }
                (None, _) => {}
            }
        }
        fragments.push(constraint[start..].trim());

        let head = fragments.remove(0).to_string();
        let dependencies = fragments
            .into_iter()
            .filter(|fragment| !fragment.is_empty())
            .map(ToString::to_string)
            .collect();

        Self { head, dependencies }
    }

    /// Replace dependency fragment naming the same package, or append.
    pub fn pin_dependency(&mut self, spec: String) {
        let name = constraint_name(&spec);
        match self
            .dependencies
            .iter_mut()
            .find(|fragment| constraint_name(fragment) == name)
        {
            Some(fragment) => *fragment = spec,
            None => self.dependencies.push(spec),
        }
    }
}

impl Display for Constraint {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.head)?;
        for dependency in &self.dependencies {
            write!(fmt, " ^{dependency}")?;
        }

        Ok(())
    }
}

/// Pin error types.
#[derive(Debug, thiserror::Error)]
pub enum PinError {
    /// Catalog declaration is unusable.
    #[error(transparent)]
    Resolve(#[from] crate::pin::resolve::ResolveError),

    /// Branch tip cannot be resolved.
    #[error(transparent)]
    Remote(#[from] crate::pin::remote::RemoteError),

    /// Original constraint cannot be solved.
    #[error(transparent)]
    Solver(#[from] crate::solver::SolverError),

    /// Pinned constraint cannot be solved again.
    #[error("pinned constraint {spec:?} is unsatisfiable")]
    Reconcile {
        spec: String,
        #[source]
        source: crate::solver::SolverError,
    },

    /// Solver returned a graph without a root.
    #[error("solving {spec:?} produced no root")]
    NoRoot { spec: String },

    /// Reconciled graph is rooted at a different package.
    #[error("reconciled root is {solved:?}, expected {expected:?}")]
    RootMismatch { expected: String, solved: String },

    /// Manifest cannot be read or written.
    #[error(transparent)]
    Manifest(#[from] crate::manifest::ManifestError),
}

/// Friendly result alias :3
pub type Result<T, E = PinError> = std::result::Result<T, E>;
