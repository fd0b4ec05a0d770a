// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Lockfile drift detection.
//!
//! Compare two solved graphs, old and new, and classify every package whose
//! solved nodes differ between them:
//!
//! - __removed__: package only exists in the old graph.
//! - __added__: package only exists in the new graph.
//! - __rebuild-required__: package exists in both, but its content hash
//!   differs, i.e., it would be built differently.
//! - __unexpected-drift__: package exists in both with the same content hash,
//!   yet a different graph hash. The solver produced a different graph shape
//!   for logically identical content.
//!
//! Only rebuild-required differences can be accepted, and only for packages
//! the caller explicitly allows. Every difference is collected before any
//! verdict is made, so the report is always complete.

use crate::{
    graph::SpecGraph,
    spec::{ConcreteSpec, SpecNode, VariantValue},
};

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, instrument};

/// Kind of difference between two solved graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Classification {
    Removed,
    Added,
    RebuildRequired,
    UnexpectedDrift,
}

impl Display for Classification {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Removed => "removed",
            Self::Added => "added",
            Self::RebuildRequired => "rebuild-required",
            Self::UnexpectedDrift => "unexpected-drift",
        };
        fmt.write_str(name)
    }
}

/// Single difference between two solved graphs, keyed by package name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphDifference {
    pub name: String,
    pub old: Option<ConcreteSpec>,
    pub new: Option<ConcreteSpec>,
    pub classification: Classification,
}

impl GraphDifference {
    fn classify(name: &str, old: Option<&ConcreteSpec>, new: Option<&ConcreteSpec>) -> Self {
        let classification = match (old, new) {
            (Some(old), Some(new)) if old.content_hash() != new.content_hash() => {
                Classification::RebuildRequired
            }
            (Some(_), Some(_)) => Classification::UnexpectedDrift,
            (Some(_), None) => Classification::Removed,
            (None, _) => Classification::Added,
        };

        Self {
            name: name.into(),
            old: old.cloned(),
            new: new.cloned(),
            classification,
        }
    }

    /// Check if difference is tolerable given allowed package names.
    pub fn is_acceptable(&self, allow: &BTreeSet<String>) -> bool {
        match self.classification {
            Classification::RebuildRequired => allow.contains(&self.name),
            Classification::Removed | Classification::Added | Classification::UnexpectedDrift => {
                false
            }
        }
    }
}

/// Compute differences between two solved graphs.
///
/// A package is not a difference if its set of graph hashes is the same in
/// both graphs. Otherwise unmatched old and new nodes are paired up in graph
/// hash order. A leftover node is compared against the closest node of the
/// same package in the other graph, and is only removed or added if the
/// package is missing from that graph entirely.
pub fn compare(old: &SpecGraph, new: &SpecGraph) -> Vec<GraphDifference> {
    let old_by_name = group_by_name(old);
    let new_by_name = group_by_name(new);
    let names = old_by_name
        .keys()
        .chain(new_by_name.keys())
        .copied()
        .collect::<BTreeSet<_>>();

    let mut differences = Vec::new();
    for name in names {
        let old_nodes = old_by_name.get(name).cloned().unwrap_or_default();
        let new_nodes = new_by_name.get(name).cloned().unwrap_or_default();

        let old_hashes = old_nodes
            .iter()
            .map(|node| node.graph_hash())
            .collect::<BTreeSet<_>>();
        let new_hashes = new_nodes
            .iter()
            .map(|node| node.graph_hash())
            .collect::<BTreeSet<_>>();
        if old_hashes == new_hashes {
            continue;
        }

        let old_only = old_nodes
            .iter()
            .copied()
            .filter(|node| !new_hashes.contains(&node.graph_hash()))
            .collect::<Vec<_>>();
        let new_only = new_nodes
            .iter()
            .copied()
            .filter(|node| !old_hashes.contains(&node.graph_hash()))
            .collect::<Vec<_>>();

        // INVARIANT: Only a name missing from one graph is removed or added.
        for at in 0..old_only.len().max(new_only.len()) {
            let (old, new) = match (old_only.get(at).copied(), new_only.get(at).copied()) {
                (Some(old), None) => (Some(old), closest(old, &new_nodes)),
                (None, Some(new)) => (closest(new, &old_nodes), Some(new)),
                pair => pair,
            };
            let difference = GraphDifference::classify(name, old, new);
            debug!("{name}: {}", difference.classification);
            differences.push(difference);
        }
    }

    differences
}

/// Node of the same package most like `node`, preferring equal content
/// hash, then equal version, then lowest graph hash.
fn closest<'a>(
    node: &ConcreteSpec,
    candidates: &[&'a ConcreteSpec],
) -> Option<&'a ConcreteSpec> {
    candidates.iter().copied().min_by_key(|candidate| {
        (
            candidate.content_hash() != node.content_hash(),
            candidate.version() != node.version(),
        )
    })
}

fn group_by_name(graph: &SpecGraph) -> BTreeMap<&str, Vec<&ConcreteSpec>> {
    let mut groups: BTreeMap<&str, Vec<&ConcreteSpec>> = BTreeMap::new();
    for node in graph.nodes() {
        groups.entry(node.name()).or_default().push(node);
    }

    for nodes in groups.values_mut() {
        nodes.sort_by(|lhs, rhs| lhs.graph_hash().cmp(&rhs.graph_hash()));
    }

    groups
}

/// Evaluated comparison of two lockfiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDiff {
    pub differences: Vec<GraphDifference>,
    allow: BTreeSet<String>,
}

impl LockDiff {
    /// Compare two solved graphs against a list of packages allowed to be
    /// rebuilt.
    #[instrument(skip_all, level = "debug")]
    pub fn evaluate(
        old: &SpecGraph,
        new: &SpecGraph,
        allow: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            differences: compare(old, new),
            allow: allow.into_iter().map(Into::into).collect(),
        }
    }

    /// Differences that are not tolerable.
    pub fn unacceptable(&self) -> impl Iterator<Item = &GraphDifference> {
        self.differences
            .iter()
            .filter(|difference| !difference.is_acceptable(&self.allow))
    }

    /// Check if every difference is tolerable.
    pub fn is_acceptable(&self) -> bool {
        self.unacceptable().next().is_none()
    }

    /// Names of packages that differ.
    pub fn names(&self) -> BTreeSet<&str> {
        self.differences
            .iter()
            .map(|difference| difference.name.as_str())
            .collect()
    }
}

impl Display for LockDiff {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.differences.is_empty() {
            return writeln!(fmt, "lockfiles are equivalent");
        }

        for difference in &self.differences {
            let verdict = if difference.is_acceptable(&self.allow) {
                "allowed"
            } else {
                "unacceptable"
            };
            writeln!(
                fmt,
                "{}: {} ({verdict})",
                difference.classification, difference.name
            )?;

            match (&difference.old, &difference.new) {
                (Some(old), Some(new)) => write_decomposition(fmt, old, new)?,
                (Some(node), None) | (None, Some(node)) => {
                    writeln!(fmt, "  {} {}", short_hash(node), node.to_spec_string())?
                }
                (None, None) => {}
            }
        }

        let unacceptable = self.unacceptable().count();
        writeln!(
            fmt,
            "{} difference(s), {unacceptable} unacceptable",
            self.differences.len()
        )
    }
}

fn write_decomposition(
    fmt: &mut Formatter<'_>,
    old: &ConcreteSpec,
    new: &ConcreteSpec,
) -> FmtResult {
    writeln!(fmt, "  graph hash: {} -> {}", short_hash(old), short_hash(new))?;
    if old.content_hash() == new.content_hash() {
        writeln!(fmt, "  content hash: unchanged")?;
    }

    if old.compiler() != new.compiler() {
        let show = |node: &ConcreteSpec| {
            node.compiler()
                .map(ToString::to_string)
                .unwrap_or_else(|| "<none>".into())
        };
        writeln!(fmt, "  compiler: {} -> {}", show(old), show(new))?;
    }

    if old.version() != new.version() {
        writeln!(fmt, "  version: {} -> {}", old.version(), new.version())?;
    }

    let keys = old
        .variants()
        .keys()
        .chain(new.variants().keys())
        .collect::<BTreeSet<_>>();
    for key in keys {
        let lhs = old.variants().get(key);
        let rhs = new.variants().get(key);
        if lhs != rhs {
            writeln!(fmt, "  variant {key}: {} -> {}", show_variant(lhs), show_variant(rhs))?;
        }
    }

    let keys = old
        .flags()
        .keys()
        .chain(new.flags().keys())
        .collect::<BTreeSet<_>>();
    for key in keys {
        let lhs = old.flags().get(key).cloned().unwrap_or_default();
        let rhs = new.flags().get(key).cloned().unwrap_or_default();
        if lhs != rhs {
            writeln!(fmt, "  {key}: {:?} -> {:?}", lhs.join(" "), rhs.join(" "))?;
        }
    }

    Ok(())
}

fn show_variant(value: Option<&VariantValue>) -> String {
    value
        .map(ToString::to_string)
        .unwrap_or_else(|| "<unset>".into())
}

fn short_hash(node: &ConcreteSpec) -> &str {
    let hash = node.graph_hash().unwrap_or("<none>");
    hash.get(..8).unwrap_or(hash)
}
