// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Compilation database merging for developed packages.
//!
//! Each developed package produces its own `compile_commands.json` in its
//! build tree. Those databases point at installed headers of every other
//! developed package, i.e., `<prefix>/include`, which makes editors jump to
//! copies of headers instead of the sources being worked on.
//!
//! Post-processing runs in two passes:
//!
//! 1. Read every package's database, and gather the include directories
//!    that live inside the package's own source tree.
//! 2. Redirect include flags that point into another developed package's
//!    `<prefix>/include` to that package's gathered source directories.
//!
//! Each pass runs one blocking task per package. The second pass only starts
//! once every task of the first pass is done. Results are merged in package
//! order into a single database.

use crate::config::DevelopEntry;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Name of compilation database file.
pub const DATABASE_FILE: &str = "compile_commands.json";

/// Single entry of a compilation database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    pub directory: String,
    pub file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Include flag matcher for compile commands.
///
/// Understands `-I<dir>`, `-I <dir>`, `-isystem<dir>`, and `-isystem <dir>`,
/// in both the `command` string and `arguments` list forms.
#[derive(Debug, Clone)]
pub struct IncludeFlags {
    command: Regex,
    token: Regex,
}

impl IncludeFlags {
    /// Construct new include flag matcher.
    ///
    /// # Errors
    ///
    /// - Return [`CompileCommandsError::Regex`] if matching rules fail to
    ///   compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            command: Regex::new(
                r#"(?P<lead>^|\s)(?P<flag>-isystem|-I)(?P<sep>\s*)(?P<path>"[^"]*"|[^\s"]+)"#,
            )?,
            token: Regex::new(r"^(?P<flag>-isystem|-I)(?P<path>.*)$")?,
        })
    }

    /// Include directories of entry, resolved against its working directory.
    pub fn paths(&self, entry: &CompileCommand) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(command) = &entry.command {
            for caps in self.command.captures_iter(command) {
                paths.push(resolve(&entry.directory, unquote(&caps["path"])));
            }
        }

        if let Some(arguments) = &entry.arguments {
            let mut tokens = arguments.iter();
            while let Some(token) = tokens.next() {
                let Some(caps) = self.token.captures(token) else {
                    continue;
                };

                let path = match &caps["path"] {
                    "" => match tokens.next() {
                        Some(path) => path.as_str(),
                        None => break,
                    },
                    path => path,
                };
                paths.push(resolve(&entry.directory, path));
            }
        }

        paths
    }

    /// Rewrite include directories of entry.
    ///
    /// The `redirect` closure receives each resolved include directory, and
    /// returns the directories to include in its place. Returning `None`
    /// leaves the flag untouched. A single flag may expand into several.
    pub fn rewrite(
        &self,
        entry: &mut CompileCommand,
        mut redirect: impl FnMut(&Path) -> Option<Vec<PathBuf>>,
    ) {
        let directory = entry.directory.clone();

        if let Some(command) = entry.command.take() {
            let rewritten = self.command.replace_all(&command, |caps: &Captures<'_>| {
                let path = resolve(&directory, unquote(&caps["path"]));
                match redirect(&path) {
                    Some(targets) => {
                        let flags = targets
                            .iter()
                            .map(|target| {
                                format!("{}{}{}", &caps["flag"], &caps["sep"], quote(target))
                            })
                            .collect::<Vec<_>>()
                            .join(" ");
                        format!("{}{flags}", &caps["lead"])
                    }
                    None => caps[0].to_string(),
                }
            });
            entry.command = Some(rewritten.into_owned());
        }

        if let Some(arguments) = entry.arguments.take() {
            let mut rewritten = Vec::with_capacity(arguments.len());
            let mut tokens = arguments.into_iter();
            while let Some(token) = tokens.next() {
                let Some((flag, path, detached)) = self.split_token(&token, &mut tokens) else {
                    rewritten.push(token);
                    continue;
                };

                match redirect(&resolve(&directory, &path)) {
                    Some(targets) => {
                        for target in targets {
                            if detached {
                                rewritten.push(flag.clone());
                                rewritten.push(target.display().to_string());
                            } else {
                                rewritten.push(format!("{flag}{}", target.display()));
                            }
                        }
                    }
                    None if detached => {
                        rewritten.push(flag);
                        rewritten.push(path);
                    }
                    None => rewritten.push(token),
                }
            }
            entry.arguments = Some(rewritten);
        }
    }

    fn split_token(
        &self,
        token: &str,
        rest: &mut impl Iterator<Item = String>,
    ) -> Option<(String, String, bool)> {
        let caps = self.token.captures(token)?;
        let flag = caps["flag"].to_string();
        match &caps["path"] {
            "" => rest.next().map(|path| (flag, path, true)),
            path => Some((flag, path.to_string(), false)),
        }
    }
}

/// Compile commands of a single developed package.
#[derive(Debug, Clone)]
struct PackageCommands {
    name: String,
    install_include: PathBuf,
    source_includes: Vec<PathBuf>,
    entries: Vec<CompileCommand>,
}

/// Where a package installs its headers, and where they really live.
#[derive(Debug, Clone)]
struct HeaderRedirect {
    name: String,
    install_include: PathBuf,
    source_includes: Vec<PathBuf>,
}

/// Merge compilation databases of developed packages into one.
///
/// Returns the number of entries written to `output`.
///
/// # Errors
///
/// - Return [`CompileCommandsError::MissingDatabase`] if a package has no
///   compilation database in its build tree.
/// - Return [`CompileCommandsError::Read`] or [`CompileCommandsError::Parse`]
///   if a database cannot be loaded.
/// - Return [`CompileCommandsError::Write`] if output cannot be written.
/// - Return [`CompileCommandsError::Join`] if a task panics.
#[instrument(skip(packages), level = "debug")]
pub async fn post_process(packages: &[DevelopEntry], output: &Path) -> Result<usize> {
    if packages.is_empty() {
        warn!("no developed packages configured");
    }

    let flags = Arc::new(IncludeFlags::new()?);

    let mut tasks = JoinSet::new();
    for (position, package) in packages.iter().cloned().enumerate() {
        let flags = flags.clone();
        tasks.spawn_blocking(move || (position, gather(package, &flags)));
    }
    let gathered = join_ordered(tasks).await?;

    // INVARIANT: Every package is gathered before any redirect happens.
    let redirects = Arc::new(
        gathered
            .iter()
            .map(|package| HeaderRedirect {
                name: package.name.clone(),
                install_include: package.install_include.clone(),
                source_includes: package.source_includes.clone(),
            })
            .collect::<Vec<_>>(),
    );

    let mut tasks = JoinSet::new();
    for (position, package) in gathered.into_iter().enumerate() {
        let flags = flags.clone();
        let redirects = redirects.clone();
        tasks.spawn_blocking(move || (position, Ok(redirect(package, &redirects, &flags))));
    }
    let redirected = join_ordered(tasks).await?;

    let merged = redirected
        .into_iter()
        .flat_map(|package| package.entries)
        .collect::<Vec<_>>();

    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        mkdirp::mkdirp(parent).map_err(|err| CompileCommandsError::Write {
            source: err,
            path: parent.to_path_buf(),
        })?;
    }

    let data = serde_json::to_string_pretty(&merged)?;
    write(output, data).map_err(|err| CompileCommandsError::Write {
        source: err,
        path: output.to_path_buf(),
    })?;
    info!("wrote {} entries to {}", merged.len(), output.display());

    Ok(merged.len())
}

async fn join_ordered<T: Send + 'static>(
    mut tasks: JoinSet<(usize, Result<T>)>,
) -> Result<Vec<T>> {
    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let (position, result) = joined?;
        results.push((position, result?));
    }
    results.sort_by_key(|(position, _)| *position);

    Ok(results.into_iter().map(|(_, result)| result).collect())
}

fn gather(package: DevelopEntry, flags: &IncludeFlags) -> Result<PackageCommands> {
    let database = locate_database(&package)?;
    let data = read_to_string(&database).map_err(|err| CompileCommandsError::Read {
        source: err,
        path: database.clone(),
    })?;
    let entries: Vec<CompileCommand> =
        serde_json::from_str(&data).map_err(|err| CompileCommandsError::Parse {
            source: err,
            path: database.clone(),
        })?;

    let mut source_includes = Vec::new();
    for path in entries.iter().flat_map(|entry| flags.paths(entry)) {
        if path.starts_with(&package.source) && !source_includes.contains(&path) {
            source_includes.push(path);
        }
    }
    debug!(
        "{} has {} entries, {} source include directories",
        package.name,
        entries.len(),
        source_includes.len()
    );

    Ok(PackageCommands {
        name: package.name,
        install_include: package.prefix.join("include"),
        source_includes,
        entries,
    })
}

fn redirect(
    mut package: PackageCommands,
    redirects: &[HeaderRedirect],
    flags: &IncludeFlags,
) -> PackageCommands {
    let others = redirects
        .iter()
        .filter(|other| other.name != package.name && !other.source_includes.is_empty())
        .collect::<Vec<_>>();

    let mut count = 0;
    for entry in &mut package.entries {
        flags.rewrite(entry, |path| {
            let other = others
                .iter()
                .find(|other| path.starts_with(&other.install_include))?;
            count += 1;
            Some(other.source_includes.clone())
        });
    }
    debug!("{} has {count} redirected include flags", package.name);

    package
}

fn locate_database(package: &DevelopEntry) -> Result<PathBuf> {
    let direct = package.build.join(DATABASE_FILE);
    if direct.is_file() {
        return Ok(direct);
    }

    // Host build trees usually nest the real build directory one level down.
    let pattern = Path::new(&glob::Pattern::escape(&package.build.to_string_lossy()))
        .join("*")
        .join(DATABASE_FILE);
    let mut found = glob::glob(&pattern.to_string_lossy())?
        .filter_map(|entry| entry.ok())
        .collect::<Vec<_>>();
    found.sort();

    found
        .into_iter()
        .next()
        .ok_or_else(|| CompileCommandsError::MissingDatabase {
            name: package.name.clone(),
            build: package.build.clone(),
        })
}

fn resolve(directory: &str, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(directory).join(path)
    }
}

/// Render path as a single shell word, quoting it if it has whitespace.
fn quote(path: &Path) -> String {
    let path = path.display().to_string();
    if path.contains(char::is_whitespace) {
        format!("\"{path}\"")
    } else {
        path
    }
}

fn unquote(path: &str) -> &str {
    path.strip_prefix('"')
        .and_then(|path| path.strip_suffix('"'))
        .unwrap_or(path)
}

/// Compilation database error types.
#[derive(Debug, thiserror::Error)]
pub enum CompileCommandsError {
    /// Package has no compilation database.
    #[error("no {DATABASE_FILE} for {name:?} under {:?}", build.display())]
    MissingDatabase { name: String, build: PathBuf },

    /// Compilation database cannot be read.
    #[error("failed to read compilation database at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Compilation database is malformed.
    #[error("malformed compilation database at {:?}", path.display())]
    Parse {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Merged compilation database cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Merged compilation database cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Build tree cannot be searched.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Include flag rules fail to compile.
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// Task failed to run to completion.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Friendly result alias :3
pub type Result<T, E = CompileCommandsError> = std::result::Result<T, E>;
