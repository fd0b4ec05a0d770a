// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine default locations of files that pinlock reads or writes when the
//! user does not name them explicitly.

use std::path::{Path, PathBuf};

/// Name of the manifest file inside of a Spack environment directory.
pub const MANIFEST_FILE: &str = "spack.yaml";

/// Determine default absolute path to pinlock's configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/pinlock/config.toml` as the
/// default. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("pinlock").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine path to the manifest of a Spack environment.
///
/// Uses the given environment directory when present, otherwise falls back
/// to `$SPACK_ENV`, and finally to the current directory.
pub fn manifest_path(env_dir: Option<&Path>) -> PathBuf {
    let dir = match env_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::var_os("SPACK_ENV")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    dir.join(MANIFEST_FILE)
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn manifest_path_prefers_explicit_dir() {
        let result = manifest_path(Some(Path::new("/envs/exawind")));
        assert_eq!(result, PathBuf::from("/envs/exawind/spack.yaml"));
    }

    #[sealed_test(env = [("SPACK_ENV", "/envs/active")])]
    fn manifest_path_uses_active_environment() {
        let result = manifest_path(None);
        assert_eq!(result, PathBuf::from("/envs/active/spack.yaml"));
    }
}
