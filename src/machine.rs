// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Declarative machine detection.
//!
//! Machines are identified purely through environment variable predicates
//! listed in the settings file. No detection code is ever executed.

use crate::config::{MachineEntry, MachineRule};

use std::env;
use tracing::{debug, instrument};

/// Detect current machine from process environment.
///
/// Returns name of first machine whose rules all hold, in settings order.
#[instrument(skip(machines), level = "debug")]
pub fn detect(machines: &[MachineEntry]) -> Option<&str> {
    detect_with(machines, |name| env::var(name).ok())
}

/// Detect machine through custom variable lookup.
///
/// A machine without any rules never matches.
pub fn detect_with(
    machines: &[MachineEntry],
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<&str> {
    let found = machines
        .iter()
        .find(|machine| {
            !machine.rules.is_empty() && machine.rules.iter().all(|rule| holds(rule, &lookup))
        })
        .map(|machine| machine.name.as_str());
    debug!("detected machine {found:?}");

    found
}

fn holds(rule: &MachineRule, lookup: &impl Fn(&str) -> Option<String>) -> bool {
    let value = lookup(&rule.env);

    if let Some(equals) = &rule.equals {
        if value.as_deref() != Some(equals.as_str()) {
            return false;
        }
    }

    if let Some(prefix) = &rule.prefix {
        if !value.as_deref().is_some_and(|value| value.starts_with(prefix.as_str())) {
            return false;
        }
    }

    match rule.set {
        Some(set) => value.is_some() == set,
        None => value.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn machines() -> Vec<MachineEntry> {
        let settings: Settings = r#"
            [[machine]]
            name = "empty"

            [[machine]]
            name = "perlmutter"

            [[machine.rule]]
            env = "NERSC_HOST"
            equals = "perlmutter"

            [[machine.rule]]
            env = "LMOD_SYSTEM_NAME"
            set = true

            [[machine]]
            name = "kestrel"

            [[machine.rule]]
            env = "NREL_CLUSTER"
            prefix = "kestrel"

            [[machine]]
            name = "workstation"

            [[machine.rule]]
            env = "HOME"

            [[machine.rule]]
            env = "NERSC_HOST"
            set = false
        "#
        .parse()
        .unwrap();

        settings.machines
    }

    #[sealed_test(env = [("NERSC_HOST", "perlmutter"), ("LMOD_SYSTEM_NAME", "perlmutter")])]
    fn all_rules_must_hold() {
        assert_eq!(detect(&machines()), Some("perlmutter"));
    }

    #[sealed_test(env = [("NERSC_HOST", "perlmutter")])]
    fn partial_match_falls_through() {
        std::env::remove_var("LMOD_SYSTEM_NAME");
        std::env::remove_var("NREL_CLUSTER");
        assert_eq!(detect(&machines()), None);
    }

    #[sealed_test(env = [("NREL_CLUSTER", "kestrel-gpu"), ("HOME", "/home/dev")])]
    fn first_match_wins() {
        std::env::remove_var("NERSC_HOST");
        assert_eq!(detect(&machines()), Some("kestrel"));
    }

    #[test]
    fn lookup_is_injectable() {
        let machines = machines();
        let result = detect_with(&machines, |name| (name == "HOME").then(|| "/root".into()));
        assert_eq!(result, Some("workstation"));

        let result = detect_with(&machines, |_| None);
        assert_eq!(result, None);
    }
}
