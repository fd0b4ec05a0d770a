// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Solved dependency graphs.
//!
//! The host solver hands back solved graphs in two JSON shapes. A __lockfile__
//! lists its roots separately from a table of nodes keyed by graph hash:
//!
//! ```json
//! {
//!   "roots": [{ "hash": "abc", "spec": "amr-wind@main" }],
//!   "concrete_specs": { "abc": { "name": "amr-wind", "version": "main", ... } }
//! }
//! ```
//!
//! The output of `spack spec --json` instead lists its nodes in order, with
//! the root first:
//!
//! ```json
//! { "spec": { "nodes": [{ "name": "amr-wind", "hash": "abc", ... }] } }
//! ```
//!
//! Both shapes are loaded into a [`SpecGraph`]. Loading checks that the graph
//! is self-consistent, i.e., every root and dependency reference resolves to
//! a node, and computes each node's content hash bottom-up.

use crate::spec::{Compiler, ConcreteSpec, SpecNode, VariantValue, Version, FLAG_KEYS};

use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Solved dependency graph.
///
/// Edges point from a dependent to its dependency. Nodes are never modified
/// once the graph is loaded.
#[derive(Debug, Clone, Default)]
pub struct SpecGraph {
    graph: DiGraph<ConcreteSpec, ()>,
    roots: Vec<GraphRoot>,
}

/// Root of a solved graph along with the constraint it was solved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRoot {
    pub index: NodeIndex,
    pub constraint: Option<String>,
}

impl SpecGraph {
    /// Load lockfile from target path.
    ///
    /// # Errors
    ///
    /// - Return [`GraphError::Read`] if lockfile cannot be read.
    /// - Return any error of [`SpecGraph::from_lockfile`].
    #[instrument(skip(path), level = "debug")]
    pub fn load_lockfile(path: impl AsRef<Path>) -> Result<Self> {
        debug!("load lockfile {:?}", path.as_ref().display());
        let data = read_to_string(path.as_ref()).map_err(|err| GraphError::Read {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;

        Self::from_lockfile(&data)
    }

    /// Construct graph from lockfile data.
    ///
    /// # Errors
    ///
    /// - Return [`GraphError::Parse`] if data is not a valid lockfile.
    /// - Return [`GraphError::MissingRoot`] if a root references an unknown
    ///   node.
    /// - Return [`GraphError::MissingDependency`] if a node references an
    ///   unknown dependency.
    /// - Return [`GraphError::Cycle`] if the graph is not acyclic.
    pub fn from_lockfile(data: &str) -> Result<Self> {
        let lockfile: LockRecord = serde_json::from_str(data)?;
        let records = lockfile
            .concrete_specs
            .into_iter()
            .map(|(hash, mut record)| {
                record.hash.get_or_insert(hash);
                record
            })
            .collect::<Vec<_>>();

        let (mut graph, indices) = build(records)?;
        for root in lockfile.roots {
            let index = *indices
                .get(&root.hash)
                .ok_or_else(|| GraphError::MissingRoot { hash: root.hash.clone() })?;
            graph.roots.push(GraphRoot {
                index,
                constraint: Some(root.spec),
            });
        }

        Ok(graph)
    }

    /// Construct graph from `spack spec --json` output.
    ///
    /// The first node listed is taken as the only root.
    ///
    /// # Errors
    ///
    /// - Return [`GraphError::Parse`] if data is not valid solver output.
    /// - Return [`GraphError::Empty`] if no nodes are listed.
    /// - Return any validation error of [`SpecGraph::from_lockfile`].
    pub fn from_spec_json(data: &str) -> Result<Self> {
        let document: SpecDocument = serde_json::from_str(data)?;
        let root_hash = document
            .spec
            .nodes
            .first()
            .ok_or(GraphError::Empty)?
            .hash
            .clone()
            .ok_or_else(|| GraphError::MissingHash {
                name: document.spec.nodes[0].name.clone(),
            })?;

        let (mut graph, indices) = build(document.spec.nodes)?;
        let index = *indices
            .get(&root_hash)
            .ok_or(GraphError::MissingRoot { hash: root_hash })?;
        graph.roots.push(GraphRoot {
            index,
            constraint: None,
        });

        Ok(graph)
    }

    /// Roots of graph in declaration order.
    pub fn roots(&self) -> &[GraphRoot] {
        &self.roots
    }

    /// Node at target index.
    ///
    /// # Panics
    ///
    /// - Will panic if index does not belong to this graph.
    pub fn node(&self, index: NodeIndex) -> &ConcreteSpec {
        &self.graph[index]
    }

    /// Iterate over every node of graph.
    pub fn nodes(&self) -> impl Iterator<Item = &ConcreteSpec> {
        self.graph.node_weights()
    }

    /// Number of nodes in graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Find root by package name.
    pub fn root_named(&self, name: impl AsRef<str>) -> Option<&GraphRoot> {
        self.roots
            .iter()
            .find(|root| self.graph[root.index].name == name.as_ref())
    }

    /// Traverse graph in preorder starting from target node.
    ///
    /// Dependencies are visited in (name, graph hash) order. Each node is
    /// visited once, so the traversal order is stable for a fixed graph.
    pub fn traverse(&self, start: NodeIndex) -> Vec<NodeIndex> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![start];

        // Use DFS with an explicit stack. Children are pushed in reverse so
        // the smallest child is popped first.
        while let Some(index) = stack.pop() {
            if !seen.insert(index) {
                continue;
            }
            order.push(index);

            let mut children = self.graph.neighbors(index).collect::<Vec<_>>();
            children.sort_by(|lhs, rhs| self.order_key(*rhs).cmp(&self.order_key(*lhs)));
            stack.extend(children);
        }

        order
    }

    /// Transitive dependencies of target node in traversal order.
    pub fn dependencies(&self, start: NodeIndex) -> Vec<NodeIndex> {
        self.traverse(start).into_iter().skip(1).collect()
    }

    fn order_key(&self, index: NodeIndex) -> (&str, Option<&str>) {
        let node = &self.graph[index];
        (node.name.as_str(), node.graph_hash.as_deref())
    }
}

fn build(records: Vec<NodeRecord>) -> Result<(SpecGraph, HashMap<String, NodeIndex>)> {
    let mut graph = SpecGraph::default();
    let mut indices = HashMap::new();
    let mut edges = Vec::new();

    for record in records {
        let hash = record.hash.clone().ok_or_else(|| GraphError::MissingHash {
            name: record.name.clone(),
        })?;
        let dependencies = record.dependencies.clone();
        let index = graph.graph.add_node(record.into_spec());
        indices.insert(hash, index);
        edges.push((index, dependencies));
    }

    for (index, dependencies) in edges {
        for dependency in dependencies {
            let target = *indices
                .get(&dependency.hash)
                .ok_or_else(|| GraphError::MissingDependency {
                    node: graph.graph[index].name.clone(),
                    dependency: dependency.name.clone(),
                    hash: dependency.hash.clone(),
                })?;
            graph.graph.update_edge(index, target, ());
        }
    }

    assign_content_hashes(&mut graph.graph)?;
    debug!("loaded graph with {} nodes", graph.graph.node_count());

    Ok((graph, indices))
}

fn assign_content_hashes(graph: &mut DiGraph<ConcreteSpec, ()>) -> Result<()> {
    let order = toposort(&*graph, None).map_err(|cycle| GraphError::Cycle {
        name: graph[cycle.node_id()].name.clone(),
    })?;

    // INVARIANT: Dependencies are hashed before their dependents.
    for index in order.into_iter().rev() {
        let mut dependency_hashes = graph
            .neighbors(index)
            .map(|dependency| graph[dependency].content_hash.clone())
            .collect::<Vec<_>>();
        dependency_hashes.sort();

        let mut hasher = Sha256::new();
        hasher.update(graph[index].to_spec_string().as_bytes());
        for hash in dependency_hashes {
            hasher.update(b"\n");
            hasher.update(hash.as_bytes());
        }
        graph[index].content_hash = format!("{:x}", hasher.finalize());
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct LockRecord {
    #[serde(default)]
    roots: Vec<RootRecord>,

    #[serde(default)]
    concrete_specs: BTreeMap<String, NodeRecord>,
}

#[derive(Debug, Deserialize)]
struct RootRecord {
    hash: String,
    spec: String,
}

#[derive(Debug, Deserialize)]
struct SpecDocument {
    spec: NodeList,
}

#[derive(Debug, Deserialize)]
struct NodeList {
    nodes: Vec<NodeRecord>,
}

#[derive(Debug, Deserialize)]
struct NodeRecord {
    name: String,

    #[serde(default)]
    version: Option<String>,

    #[serde(default)]
    compiler: Option<CompilerRecord>,

    #[serde(default)]
    parameters: BTreeMap<String, Value>,

    #[serde(default)]
    dependencies: Vec<EdgeRecord>,

    #[serde(default)]
    hash: Option<String>,
}

impl NodeRecord {
    fn into_spec(self) -> ConcreteSpec {
        let version = self
            .version
            .as_deref()
            .unwrap_or_default()
            .parse::<Version>()
            .unwrap_or_else(|never| match never {});
        let mut spec = ConcreteSpec::new(self.name, version);
        spec.graph_hash = self.hash;
        spec.compiler = self.compiler.map(|compiler| {
            Compiler::new(
                compiler.name,
                compiler
                    .version
                    .map(|version| version.trim_start_matches('=').to_string()),
            )
        });

        for (key, value) in self.parameters {
            if FLAG_KEYS.contains(&key.as_str()) {
                spec.flags.insert(key, value_to_strings(value));
                continue;
            }

            let variant = match value {
                Value::Bool(value) => VariantValue::Bool(value),
                Value::String(value) => VariantValue::Single(value),
                Value::Number(value) => VariantValue::Single(value.to_string()),
                Value::Array(_) => VariantValue::Multi(value_to_strings(value)),
                _ => continue,
            };
            spec.variants.insert(key, variant);
        }

        spec
    }
}

#[derive(Debug, Deserialize)]
struct CompilerRecord {
    name: String,

    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EdgeRecord {
    name: String,
    hash: String,
}

fn value_to_strings(value: Value) -> Vec<String> {
    match value {
        Value::Array(values) => values
            .into_iter()
            .map(|value| match value {
                Value::String(value) => value,
                other => other.to_string(),
            })
            .collect(),
        Value::String(value) => value.split_whitespace().map(ToString::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Graph loading error types.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Graph document cannot be read.
    #[error("failed to read graph document at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Graph document is malformed.
    #[error(transparent)]
    Parse(#[from] serde_json::Error),

    /// Solver output contained no nodes.
    #[error("solver output contains no nodes")]
    Empty,

    /// Node carries no graph hash, so it was never solved.
    #[error("node {name:?} has no graph hash")]
    MissingHash { name: String },

    /// Root references a node that does not exist.
    #[error("root references unknown node {hash:?}")]
    MissingRoot { hash: String },

    /// Node references a dependency that does not exist.
    #[error("node {node:?} references unknown dependency {dependency:?} ({hash})")]
    MissingDependency {
        node: String,
        dependency: String,
        hash: String,
    },

    /// Graph contains a dependency cycle.
    #[error("dependency cycle through node {name:?}")]
    Cycle { name: String },
}

/// Friendly result alias :3
pub type Result<T, E = GraphError> = std::result::Result<T, E>;
