// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reproducible Spack environments.
//!
//! Pinlock freezes branch tracking versions of an environment to the exact
//! commits they currently point to, detects unacceptable drift between two
//! environment lockfiles, and merges compilation databases of packages under
//! development.

pub mod compile_commands;
pub mod config;
pub mod graph;
pub mod lockdiff;
pub mod machine;
pub mod manifest;
pub mod path;
pub mod pin;
pub mod solver;
pub mod spec;
