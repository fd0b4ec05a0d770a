// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pinned specification rendering.

use crate::spec::{SpecNode, Version};

use tracing::warn;

/// Variants that never carry over into a pinned specification.
///
/// Development paths and patch lists only make sense on the machine that
/// produced them. The build system variant is set by the package itself.
pub const DENYLIST: [&str; 3] = ["dev_path", "patches", "build_system"];

/// Render specification string of a node pinned to `commit`.
///
/// The version becomes `git.<commit>=<label>`, where the label is the
/// node's human readable version. Compiler, flags, and variants carry over
/// verbatim, minus the [`DENYLIST`].
///
/// Returns `None` for nodes that are not concrete, or carry no version
/// label to pair the commit with.
pub fn pinned_spec_string(node: &impl SpecNode, commit: &str) -> Option<String> {
    if !node.is_concrete() {
        warn!("{} is not concrete, skipping", node.name());
        return None;
    }

    let Some(label) = node.version().label() else {
        warn!("{}@{} has no version label, skipping", node.name(), node.version());
        return None;
    };

    let version = Version::git_ref(commit, label);
    Some(format!(
        "{}@{version}{}",
        node.name(),
        node.qualifiers(&DENYLIST)
    ))
}
