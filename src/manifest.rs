// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Environment manifest handling.
//!
//! A Spack environment is declared by a __manifest__, i.e., the `spack.yaml`
//! file at the top of the environment directory. Pinlock only ever touches a
//! single field of it: the list of root constraints at `spack.specs`.
//!
//! ```yaml
//! spack:
//!   include: [../../configs/base]
//!   specs:
//!   - amr-wind@main +cuda   # tracks upstream
//!   - nalu-wind@master
//!   view: false
//! ```
//!
//! # Preserving Unrelated Content
//!
//! Manifests are hand written, so comments and layout matter to their owners.
//! Edits are therefore applied to the matching list item lines directly,
//! leaving every other line untouched. Only when the list cannot be located
//! line by line, e.g., flow style `specs: [a, b]`, is the document rewritten
//! structurally, which loses comments. Either way the result is parsed again
//! and checked before anything is written.

use serde_yaml::Value;
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};
use tracing::{debug, instrument, warn};

/// Manage root constraints in a manifest file.
#[derive(Clone, Debug)]
pub struct ManifestDrafter {
    manifest_path: PathBuf,
}

impl ManifestDrafter {
    /// Construct new manifest drafter for target manifest file.
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
        }
    }

    /// List current root constraints.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::ReadManifest`] if manifest cannot be read.
    /// - Return [`ManifestError::Parse`] if manifest is not valid YAML.
    /// - Return [`ManifestError::MissingSpecs`] if manifest has no
    ///   `spack.specs` list.
    pub fn current_specs(&self) -> Result<Vec<String>> {
        let content = self.read()?;
        Ok(parse_specs(&content)?.into_iter().flatten().collect())
    }

    /// Edit root constraints.
    ///
    /// Read current constraints into [`SpecsEdit`] instance, and directly
    /// edit them before writing the result back into the manifest. Nothing
    /// is written if the editor made no changes.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::ReadManifest`] if manifest cannot be read.
    /// - Return [`ManifestError::WriteManifest`] if manifest cannot be
    ///   written.
    /// - Return [`ManifestError::Verify`] if edited manifest does not hold the
    ///   edited constraints.
    #[instrument(skip(self, editor), level = "debug")]
    pub fn edit<E>(&self, editor: E) -> Result<()>
    where
        E: FnOnce(&mut SpecsEdit),
    {
        let content = self.read()?;
        let mut specs = SpecsEdit::new(parse_specs(&content)?);
        editor(&mut specs);

        if !specs.changed {
            debug!("manifest {:?} unchanged", self.manifest_path.display());
            return Ok(());
        }

        let rendered = render(&content, &specs)?;
        write(&self.manifest_path, rendered.as_bytes()).map_err(|err| {
            ManifestError::WriteManifest {
                source: err,
                manifest_path: self.manifest_path.clone(),
            }
        })?;

        Ok(())
    }

    fn read(&self) -> Result<String> {
        read_to_string(&self.manifest_path).map_err(|err| ManifestError::ReadManifest {
            source: err,
            manifest_path: self.manifest_path.clone(),
        })
    }
}

/// Root constraint editor.
///
/// # Invariant
///
/// - Positions of constraints never change.
/// - Entries that are not plain constraints, e.g., matrices, are never
///   touched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SpecsEdit {
    entries: Vec<Option<String>>,
    changed: bool,
}

impl SpecsEdit {
    fn new(entries: Vec<Option<String>>) -> Self {
        Self {
            entries,
            changed: false,
        }
    }

    /// Current root constraints.
    pub fn specs(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().flatten().map(String::as_str)
    }

    /// Replace first constraint equal to `old` with `new`.
    ///
    /// Returns `false` if no such constraint exists.
    pub fn replace(&mut self, old: impl AsRef<str>, new: impl Into<String>) -> bool {
        let slot = self
            .entries
            .iter_mut()
            .flatten()
            .find(|entry| entry.as_str() == old.as_ref());

        match slot {
            Some(entry) => {
                let new = new.into();
                if *entry != new {
                    *entry = new;
                    self.changed = true;
                }
                true
            }
            None => false,
        }
    }
}

fn parse_specs(content: &str) -> Result<Vec<Option<String>>> {
    let document: Value = serde_yaml::from_str(content)?;
    let specs = document
        .get("spack")
        .and_then(|spack| spack.get("specs"))
        .and_then(Value::as_sequence)
        .ok_or(ManifestError::MissingSpecs)?;

    Ok(specs
        .iter()
        .map(|entry| entry.as_str().map(ToString::to_string))
        .collect())
}

fn render(content: &str, specs: &SpecsEdit) -> Result<String> {
    if let Some(rendered) = render_in_place(content, specs) {
        if parse_specs(&rendered)? == specs.entries {
            return Ok(rendered);
        }
    }

    warn!("cannot edit manifest in place, rewriting it without comments");
    let rendered = render_structural(content, specs)?;
    if parse_specs(&rendered)? != specs.entries {
        return Err(ManifestError::Verify);
    }

    Ok(rendered)
}

fn render_in_place(content: &str, specs: &SpecsEdit) -> Option<String> {
    let lines = content.lines().collect::<Vec<_>>();
    let items = locate_spec_items(&lines)?;
    if items.len() != specs.entries.len() {
        return None;
    }

    let mut out = lines.iter().map(ToString::to_string).collect::<Vec<_>>();
    for (line_no, entry) in items.into_iter().zip(&specs.entries) {
        let Some(entry) = entry else { continue };
        let line = lines[line_no];
        let dash = line.find('-')?;
        let (prefix, rest) = line.split_at(dash + 1);
        let value = rest.trim_start();
        let gap = &rest[..rest.len() - value.len()];
        let comment = trailing_comment(value);
        let scalar = value[..value.len() - comment.len()].trim_end();

        if unquote(scalar) == entry.as_str() {
            continue;
        }

        let spacing = &value[scalar.len()..value.len() - comment.len()];
        out[line_no] = format!("{prefix}{gap}{}{spacing}{comment}", quote(entry));
    }

    let mut rendered = out.join("\n");
    if content.ends_with('\n') {
        rendered.push('\n');
    }

    Some(rendered)
}

// Line numbers of the item lines of the `spack.specs` block list.
fn locate_spec_items(lines: &[&str]) -> Option<Vec<usize>> {
    let spack = lines
        .iter()
        .position(|line| indent_of(line) == 0 && is_block_key(line, "spack"))?;

    let child_indent = lines[spack + 1..]
        .iter()
        .find(|line| is_content(line))
        .map(|line| indent_of(line))?;

    let specs = lines[spack + 1..]
        .iter()
        .position(|line| indent_of(line) == child_indent && is_block_key(line, "specs"))
        .map(|offset| spack + 1 + offset)?;

    let mut items = Vec::new();
    let mut item_indent = None;
    for (line_no, line) in lines.iter().enumerate().skip(specs + 1) {
        if !is_content(line) {
            continue;
        }

        let indent = indent_of(line);
        let is_item = line.trim_start().starts_with("- ") || line.trim() == "-";
        match item_indent {
            None if is_item && indent >= child_indent => {
                item_indent = Some(indent);
                items.push(line_no);
            }
            Some(expected) if is_item && indent == expected => items.push(line_no),
            Some(expected) if indent > expected => continue,
            _ => break,
        }
    }

    Some(items)
}

fn render_structural(content: &str, specs: &SpecsEdit) -> Result<String> {
    let mut document: Value = serde_yaml::from_str(content)?;
    let sequence = document
        .get_mut("spack")
        .and_then(|spack| spack.get_mut("specs"))
        .and_then(Value::as_sequence_mut)
        .ok_or(ManifestError::MissingSpecs)?;

    for (slot, entry) in sequence.iter_mut().zip(&specs.entries) {
        if let Some(entry) = entry {
            *slot = Value::String(entry.clone());
        }
    }

    Ok(serde_yaml::to_string(&document)?)
}

// Key whose value is a nested block, e.g., `specs:` or `specs: # note`.
fn is_block_key(line: &str, key: &str) -> bool {
    line.trim()
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .is_some_and(|rest| rest.trim().is_empty() || rest.trim_start().starts_with('#'))
}

fn is_content(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn trailing_comment(value: &str) -> &str {
    let mut quote = None;
    let mut previous = ' ';
    for (at, ch) in value.char_indices() {
        match (quote, ch) {
            (None, '\'' | '"') if at == 0 => quote = Some(ch),
            (Some(open), ch) if ch == open => quote = None,
            (None, '#') if previous.is_whitespace() => return &value[at..],
            _ => {}
        }
        previous = ch;
    }

    ""
}

fn unquote(scalar: &str) -> String {
    if let Some(inner) = scalar.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return inner.replace("''", "'");
    }
    if let Some(inner) = scalar.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return inner.replace("\\\"", "\"");
    }

    scalar.to_string()
}

fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.starts_with(|ch: char| "-?:,[]{}#&*!|>'\"%@`^~+ ".contains(ch))
        || value.contains(": ")
        || value.contains(" #")
        || value.ends_with(':')
        || value.contains('"')
        || value.contains('\'');

    if needs_quotes {
        format!("'{}'", value.replace('\'', "''"))
    } else {
        value.to_string()
    }
}

/// Manifest error types.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Manifest cannot be read from.
    #[error("failed to read manifest at {:?}", manifest_path.display())]
    ReadManifest {
        #[source]
        source: std::io::Error,
        manifest_path: PathBuf,
    },

    /// Manifest cannot be written to.
    #[error("failed to write manifest at {:?}", manifest_path.display())]
    WriteManifest {
        #[source]
        source: std::io::Error,
        manifest_path: PathBuf,
    },

    /// Manifest is not valid YAML.
    #[error(transparent)]
    Parse(#[from] serde_yaml::Error),

    /// Manifest has no root constraint list.
    #[error("manifest has no 'spack.specs' list")]
    MissingSpecs,

    /// Edited manifest no longer holds the edited constraints.
    #[error("edited manifest does not hold the edited constraints")]
    Verify,
}

/// Friendly result alias :3
pub type Result<T, E = ManifestError> = std::result::Result<T, E>;
