// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod pin;

use anyhow::Result;
use pinlock::{
    config::Settings,
    graph::SpecGraph,
    manifest::ManifestDrafter,
    pin::{
        constraint_name,
        remote::{ref_matches, RemoteError, RemoteRef, RemoteRefs},
    },
    solver::{Solver, SolverError},
};
use serde_json::{json, Value};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashSet, VecDeque},
    fs::{read_to_string, write},
    path::PathBuf,
};
use tempfile::TempDir;

/// Package known to the fake solver.
#[derive(Debug, Clone)]
pub(crate) struct FakePackage {
    name: String,
    version: String,
    dependencies: Vec<String>,
    parameters: Value,
}

impl FakePackage {
    pub(crate) fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
            parameters: json!({}),
        }
    }

    pub(crate) fn depends_on(mut self, names: &[&str]) -> Self {
        self.dependencies = names.iter().map(ToString::to_string).collect();
        self
    }

    pub(crate) fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Solver that resolves constraints against a fixed set of packages.
///
/// Versions named in a constraint, e.g., `pkgA@git.abc=main ^pkgB@1.0`,
/// override the package's default version. Everything is compiled with the
/// same compiler.
#[derive(Debug, Default)]
pub(crate) struct FakeSolver {
    packages: Vec<FakePackage>,
    reject: Option<String>,
    pub(crate) calls: RefCell<Vec<(String, bool)>>,
}

impl FakeSolver {
    pub(crate) fn new(packages: Vec<FakePackage>) -> Self {
        Self {
            packages,
            ..Default::default()
        }
    }

    /// Refuse to solve any constraint containing `pattern`.
    pub(crate) fn rejecting(mut self, pattern: &str) -> Self {
        self.reject = Some(pattern.into());
        self
    }

    fn package(&self, name: &str) -> Option<&FakePackage> {
        self.packages.iter().find(|package| package.name == name)
    }
}

impl Solver for FakeSolver {
    fn solve(&self, spec: &str, fresh: bool) -> Result<SpecGraph, SolverError> {
        self.calls.borrow_mut().push((spec.into(), fresh));

        if let Some(pattern) = &self.reject {
            if spec.contains(pattern.as_str()) {
                return Err(SolverError::Unsatisfiable {
                    spec: spec.into(),
                    message: format!("==> Error: {pattern} conflicts with package constraints"),
                });
            }
        }

        let overrides = spec
            .split(" ^")
            .filter_map(|fragment| {
                let name = constraint_name(fragment);
                let version = fragment.trim().strip_prefix(name)?.strip_prefix('@')?;
                let end = version
                    .find(|ch: char| matches!(ch, '%' | '+' | '~') || ch.is_whitespace())
                    .unwrap_or(version.len());
                Some((name.to_string(), version[..end].to_string()))
            })
            .collect::<BTreeMap<_, _>>();

        let hash_of = |package: &FakePackage| {
            let version = overrides.get(&package.name).unwrap_or(&package.version);
            format!("{}-{}", package.name, version.replace(['.', '='], "-"))
        };

        let root = constraint_name(spec);
        let mut nodes = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root.to_string()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }

            let package = self.package(&name).ok_or_else(|| SolverError::Unsatisfiable {
                spec: spec.into(),
                message: format!("==> Error: unknown package {name}"),
            })?;
            let dependencies = package
                .dependencies
                .iter()
                .filter_map(|name| self.package(name))
                .map(|dependency| json!({ "name": dependency.name, "hash": hash_of(dependency) }))
                .collect::<Vec<_>>();

            nodes.push(json!({
                "name": package.name,
                "version": overrides.get(&package.name).unwrap_or(&package.version),
                "compiler": { "name": "gcc", "version": "=12.1.0" },
                "parameters": package.parameters,
                "dependencies": dependencies,
                "hash": hash_of(package),
            }));
            queue.extend(package.dependencies.iter().cloned());
        }

        let document = json!({ "spec": { "_meta": { "version": 4 }, "nodes": nodes } });
        Ok(SpecGraph::from_spec_json(&document.to_string())?)
    }
}

/// Remote that advertises a fixed set of references.
#[derive(Debug, Default)]
pub(crate) struct FakeRemote {
    refs: BTreeMap<String, Vec<RemoteRef>>,
    unreachable: bool,
    pub(crate) queries: Cell<usize>,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_ref(mut self, url: &str, name: &str, commit: &str) -> Self {
        self.refs.entry(url.into()).or_default().push(RemoteRef {
            commit: commit.into(),
            name: name.into(),
        });
        self
    }

    pub(crate) fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

impl RemoteRefs for FakeRemote {
    fn list_refs(&self, url: &str, pattern: &str) -> Result<Vec<RemoteRef>, RemoteError> {
        self.queries.set(self.queries.get() + 1);
        if self.unreachable {
            return Err(RemoteError::Git2(git2::Error::from_str(
                "failed to resolve address: network unreachable",
            )));
        }

        Ok(self
            .refs
            .get(url)
            .into_iter()
            .flatten()
            .filter(|tip| ref_matches(&tip.name, pattern))
            .cloned()
            .collect())
    }
}

/// Spack environment directory holding a single manifest.
pub(crate) struct EnvFixture {
    _dir: TempDir,
    manifest_path: PathBuf,
}

impl EnvFixture {
    pub(crate) fn new(manifest: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let manifest_path = dir.path().join("spack.yaml");
        write(&manifest_path, manifest)?;

        Ok(Self {
            _dir: dir,
            manifest_path,
        })
    }

    pub(crate) fn drafter(&self) -> ManifestDrafter {
        ManifestDrafter::new(&self.manifest_path)
    }

    pub(crate) fn manifest(&self) -> Result<String> {
        Ok(read_to_string(&self.manifest_path)?)
    }
}

/// Version catalog with branch tracking packages.
pub(crate) fn catalog() -> Settings {
    let settings = r#"
        [[package]]
        name = "pkgA"
        git = "https://example.com/pkgA.git"

        [[package.version]]
        name = "main"
        branch = "main"

        [[package]]
        name = "pkgB"
        git = "https://example.com/pkgB.git"

        [[package.version]]
        name = "develop"
        branch = "develop"

        [[package.version]]
        name = "1.0"
        tag = "v1.0"

        [[package]]
        name = "pkgC"
        git = "https://example.com/pkgC.git"

        [[package.version]]
        name = "develop"
        branch = "develop"
    "#;

    settings
        .parse()
        .unwrap_or_else(|err| panic!("catalog fixture is malformed: {err}"))
}
