// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host dependency solver access.
//!
//! Pinlock never solves dependency graphs itself. Every solve is delegated to
//! the host tool through the [`Solver`] trait, whose default implementation
//! shells out to `spack spec --json`.

use crate::{config::SolverSettings, graph::SpecGraph};

use std::{
    ffi::{OsStr, OsString},
    process::Command,
};
use tracing::{debug, instrument};

/// Layer of indirection for the host solver.
pub trait Solver {
    /// Solve a specification string into a concrete graph.
    ///
    /// With `fresh` set, the solver must not reuse any previously solved
    /// nodes.
    fn solve(&self, spec: &str, fresh: bool) -> Result<SpecGraph>;
}

/// Solver that runs the Spack executable.
#[derive(Debug, Clone)]
pub struct SpackSolver {
    settings: SolverSettings,
}

impl SpackSolver {
    /// Construct new Spack solver from solver settings.
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    fn expand_bin_args(&self, spec: &str, fresh: bool) -> Vec<OsString> {
        let mut bin_args: Vec<OsString> = self.settings.args.iter().map(Into::into).collect();
        if let Some(environment) = &self.settings.environment {
            bin_args.push("-e".into());
            bin_args.push(environment.as_os_str().to_owned());
        }

        bin_args.extend(["spec".into(), "--json".into()]);
        if fresh {
            bin_args.push("--fresh".into());
        }
        bin_args.push(spec.into());

        bin_args
    }
}

impl Solver for SpackSolver {
    #[instrument(skip(self), level = "debug")]
    fn solve(&self, spec: &str, fresh: bool) -> Result<SpecGraph> {
        let bin_args = self.expand_bin_args(spec, fresh);
        let output = syscall_non_interactive(&self.settings.program, bin_args).map_err(|err| {
            match err {
                SyscallError::Failed(message) => SolverError::Unsatisfiable {
                    spec: spec.to_string(),
                    message,
                },
                SyscallError::Io(err) => SolverError::Syscall(err),
            }
        })?;

        debug!("solver produced {} bytes of output", output.len());
        Ok(SpecGraph::from_spec_json(&output)?)
    }
}

enum SyscallError {
    Failed(String),
    Io(std::io::Error),
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> std::result::Result<String, SyscallError> {
    let output = Command::new(cmd.as_ref())
        .args(args)
        .output()
        .map_err(SyscallError::Io)?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

    if !output.status.success() {
        // INVARIANT: Chomp trailing newlines.
        let message = stderr.trim_end().to_string();
        return Err(SyscallError::Failed(message));
    }

    if !stderr.is_empty() {
        debug!("solver stderr: {}", stderr.trim_end());
    }

    Ok(stdout)
}

/// Solver error types.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    /// Solver rejected the specification.
    #[error("cannot solve {spec:?}:\n{message}")]
    Unsatisfiable { spec: String, message: String },

    /// Solver produced output that is not a valid graph.
    #[error(transparent)]
    Graph(#[from] crate::graph::GraphError),

    /// Solver could not be executed.
    #[error(transparent)]
    Syscall(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = SolverError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bin_args_for_fresh_solve_in_environment() {
        let solver = SpackSolver::new(SolverSettings {
            program: "spack".into(),
            args: vec!["-d".into()],
            environment: Some("/envs/exawind".into()),
        });

        let result = solver.expand_bin_args("amr-wind@main +cuda", true);
        let expect: Vec<OsString> = [
            "-d",
            "-e",
            "/envs/exawind",
            "spec",
            "--json",
            "--fresh",
            "amr-wind@main +cuda",
        ]
        .into_iter()
        .map(Into::into)
        .collect();
        assert_eq!(result, expect);
    }

    #[test]
    fn bin_args_for_plain_solve() {
        let solver = SpackSolver::new(SolverSettings::default());
        let result = solver.expand_bin_args("zlib", false);
        let expect: Vec<OsString> = ["spec", "--json", "zlib"]
            .into_iter()
            .map(Into::into)
            .collect();
        assert_eq!(result, expect);
    }

    #[test]
    fn missing_program_is_syscall_error() {
        let solver = SpackSolver::new(SolverSettings {
            program: "/nonexistent/pinlock-solver".into(),
            ..Default::default()
        });

        let result = solver.solve("zlib", false);
        assert!(matches!(result, Err(SolverError::Syscall(_))));
    }
}
