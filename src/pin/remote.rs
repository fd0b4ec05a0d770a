// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote branch tip queries.
//!
//! Branch tips are always queried fresh from the remote. Nothing is cached,
//! and nothing is retried. A transport failure halts the whole pin
//! operation, which is fine for an infrequent, human supervised task.

use auth_git2::{GitAuthenticator, Prompter};
use git2::{Config, Direction, Remote, RemoteCallbacks};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{path::Path, time::Duration};
use tracing::{debug, info, instrument};

/// Reference advertised by a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    /// Commit the reference points to.
    pub commit: String,

    /// Full reference name, e.g., "refs/heads/main".
    pub name: String,
}

/// Layer of indirection for remote queries.
pub trait RemoteRefs {
    /// List references of remote at `url` that match `pattern`.
    ///
    /// Matching follows `git ls-remote <url> <pattern>`. See [`ref_matches`].
    fn list_refs(&self, url: &str, pattern: &str) -> Result<Vec<RemoteRef>>;
}

/// Remote queries through libgit2.
#[derive(Debug, Default)]
pub struct Git2Remote;

impl Git2Remote {
    pub fn new() -> Self {
        Self
    }
}

impl RemoteRefs for Git2Remote {
    /// List matching references of remote.
    ///
    /// Shows a spinner while connected. If credentials are required, the user
    /// is prompted for them and the spinner is suspended for input.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Git2`] if connecting or listing fails.
    #[instrument(skip(self), level = "debug")]
    fn list_refs(&self, url: &str, pattern: &str) -> Result<Vec<RemoteRef>> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
        bar.set_message(format!("query {url} for {pattern}"));
        bar.enable_steady_tick(Duration::from_millis(100));

        let prompter = IndicatifPrompter::new(bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter);
        let config = Config::open_default()?;

        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));

        let mut remote = Remote::create_detached(url)?;
        let connection = remote.connect_auth(Direction::Fetch, Some(rc), None)?;
        let refs = connection
            .list()?
            .iter()
            .filter(|head| ref_matches(head.name(), pattern))
            .map(|head| RemoteRef {
                commit: head.oid().to_string(),
                name: head.name().to_string(),
            })
            .collect::<Vec<_>>();

        bar.finish_and_clear();
        debug!("{url} advertises {} refs matching {pattern:?}", refs.len());

        Ok(refs)
    }
}

/// Match reference name against an ls-remote style pattern.
///
/// A pattern matches a reference when it equals the full name, or equals a
/// trailing run of its `/` separated components. Thus "main" matches
/// "refs/heads/main" and "refs/tags/main" alike.
pub fn ref_matches(name: &str, pattern: &str) -> bool {
    name == pattern
        || name
            .strip_suffix(pattern)
            .is_some_and(|head| head.ends_with('/'))
}

/// Resolve tip of a branch to exactly one commit.
///
/// # Errors
///
/// - Return [`RemoteError::NoMatch`] if nothing matches the branch.
/// - Return [`RemoteError::Ambiguous`] if several references match.
/// - Return any error of the underlying [`RemoteRefs`] implementation.
#[instrument(skip(remote), level = "debug")]
pub fn resolve_branch_tip(remote: &impl RemoteRefs, url: &str, branch: &str) -> Result<String> {
    let mut refs = remote.list_refs(url, branch)?;
    match refs.len() {
        0 => Err(RemoteError::NoMatch {
            url: url.into(),
            branch: branch.into(),
        }),
        1 => {
            let tip = refs.remove(0);
            info!("{url} {} is at {}", tip.name, tip.commit);
            Ok(tip.commit)
        }
        _ => Err(RemoteError::Ambiguous {
            url: url.into(),
            branch: branch.into(),
            refs: refs.into_iter().map(|tip| tip.name).collect(),
        }),
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Remote query error types.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// No reference matches the branch.
    #[error("no reference of {url} matches branch {branch:?}")]
    NoMatch { url: String, branch: String },

    /// More than one reference matches the branch.
    #[error("branch {branch:?} of {url} is ambiguous, matches {refs:?}")]
    Ambiguous {
        url: String,
        branch: String,
        refs: Vec<String>,
    },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RemoteError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    struct FixedRefs(Vec<RemoteRef>);

    impl RemoteRefs for FixedRefs {
        fn list_refs(&self, _url: &str, pattern: &str) -> Result<Vec<RemoteRef>> {
            Ok(self
                .0
                .iter()
                .filter(|tip| ref_matches(&tip.name, pattern))
                .cloned()
                .collect())
        }
    }

    fn tip(commit: &str, name: &str) -> RemoteRef {
        RemoteRef {
            commit: commit.into(),
            name: name.into(),
        }
    }

    #[test_case("refs/heads/main", "main", true; "branch suffix")]
    #[test_case("refs/heads/main", "refs/heads/main", true; "full name")]
    #[test_case("refs/heads/feature/main", "main", true; "nested branch")]
    #[test_case("refs/heads/domain", "main", false; "partial component")]
    #[test_case("refs/heads/main", "heads/main", true; "multiple components")]
    #[test_case("HEAD", "main", false; "head")]
    #[test]
    fn match_references(name: &str, pattern: &str, expect: bool) {
        use pretty_assertions::assert_eq;
        assert_eq!(ref_matches(name, pattern), expect);
    }

    #[test]
    fn single_match_resolves() -> anyhow::Result<()> {
        let remote = FixedRefs(vec![
            tip("abc123", "refs/heads/main"),
            tip("def456", "refs/heads/develop"),
        ]);
        assert_eq!(resolve_branch_tip(&remote, "url", "main")?, "abc123");

        Ok(())
    }

    #[test]
    fn no_match_is_fatal() {
        let remote = FixedRefs(vec![tip("def456", "refs/heads/develop")]);
        let result = resolve_branch_tip(&remote, "url", "main");
        assert!(matches!(result, Err(RemoteError::NoMatch { .. })));
    }

    #[test]
    fn several_matches_are_fatal() {
        let remote = FixedRefs(vec![
            tip("abc123", "refs/heads/main"),
            tip("fff000", "refs/tags/main"),
        ]);
        let result = resolve_branch_tip(&remote, "url", "main");
        assert!(matches!(result, Err(RemoteError::Ambiguous { ref refs, .. }) if refs.len() == 2));
    }
}
