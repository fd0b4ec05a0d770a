// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use pinlock::{
    compile_commands::{post_process, DATABASE_FILE},
    config::Settings,
    graph::SpecGraph,
    lockdiff::LockDiff,
    machine::detect,
    manifest::ManifestDrafter,
    path::{default_config_path, manifest_path},
    pin::{remote::Git2Remote, PinPolicy, Pinner},
    solver::SpackSolver,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  pinlock [options] <pinlock-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to settings file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let settings = match self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::load(default_config_path()?)?,
        };

        match self.command {
            Command::Pin(opts) => run_pin(settings, opts),
            Command::LockDiff(opts) => run_lock_diff(opts),
            Command::CompileCommands(opts) => run_compile_commands(settings, opts).await,
            Command::FindMachine => run_find_machine(settings),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Pin branch tracking versions of environment roots to commits.
    #[command(override_usage = "pinlock pin [options] [<spec_name>]...")]
    Pin(PinOptions),

    /// Compare two environment lockfiles for unacceptable differences.
    #[command(override_usage = "pinlock lock-diff [options] --old <path> --new <path>")]
    LockDiff(LockDiffOptions),

    /// Merge compilation databases of packages under development.
    #[command(override_usage = "pinlock compile-commands [options]")]
    CompileCommands(CompileCommandsOptions),

    /// Print name of machine matching current environment.
    #[command(override_usage = "pinlock find-machine")]
    FindMachine,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PinOptions {
    /// Names of root specs to pin, all roots if none are given.
    #[arg(value_name = "spec_name")]
    pub specs: Vec<String>,

    /// Only pin root specs.
    #[arg(short, long, group = "policy")]
    pub roots: bool,

    /// Only pin dependencies of root specs.
    #[arg(short, long, group = "policy")]
    pub dependencies: bool,

    /// Pin root specs and their dependencies.
    #[arg(short, long, group = "policy")]
    pub all: bool,

    /// Solve without reusing previously installed specs.
    #[arg(short, long)]
    pub fresh: bool,

    /// Spack environment directory to pin.
    #[arg(short, long, value_name = "path")]
    pub env: Option<PathBuf>,

    /// Show pinned specs without writing the manifest.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

impl PinOptions {
    fn policy(&self) -> PinPolicy {
        if self.all {
            PinPolicy::all()
        } else if self.roots {
            PinPolicy {
                roots: true,
                dependencies: false,
            }
        } else if self.dependencies {
            PinPolicy {
                roots: false,
                dependencies: true,
            }
        } else {
            PinPolicy::all()
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LockDiffOptions {
    /// Lockfile to compare against.
    #[arg(long, required = true, value_name = "path")]
    pub old: PathBuf,

    /// Lockfile to check.
    #[arg(long, required = true, value_name = "path")]
    pub new: PathBuf,

    /// Packages that are allowed to require a rebuild.
    #[arg(short, long, num_args = 1.., value_name = "name")]
    pub skip_package_diffs: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CompileCommandsOptions {
    /// Path to write merged compilation database to.
    #[arg(short, long, value_name = "path", default_value = DATABASE_FILE)]
    pub output: PathBuf,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn run_pin(mut settings: Settings, opts: PinOptions) -> Result<()> {
    if let Some(env) = &opts.env {
        settings.solver.environment = Some(env.clone());
    }

    let manifest = ManifestDrafter::new(manifest_path(settings.solver.environment.as_deref()));
    let solver = SpackSolver::new(settings.solver.clone());
    let remote = Git2Remote::new();
    let pinner = Pinner::new(&solver, &remote, &settings, opts.policy());

    let pinned = pinner.pin_manifest(&manifest, &opts.specs, opts.fresh, opts.dry_run)?;
    for root in pinned {
        if opts.dry_run {
            println!("{} -> {}", root.original, root.pinned);
        } else {
            info!("{}: {}", root.state, root.pinned);
        }
    }

    Ok(())
}

fn run_lock_diff(opts: LockDiffOptions) -> Result<()> {
    let old = SpecGraph::load_lockfile(&opts.old)?;
    let new = SpecGraph::load_lockfile(&opts.new)?;

    let diff = LockDiff::evaluate(&old, &new, opts.skip_package_diffs);
    print!("{diff}");

    if !diff.is_acceptable() {
        return Err(anyhow!(
            "{} unacceptable lockfile difference(s)",
            diff.unacceptable().count()
        ));
    }

    Ok(())
}

async fn run_compile_commands(settings: Settings, opts: CompileCommandsOptions) -> Result<()> {
    post_process(&settings.develop, &opts.output).await?;
    Ok(())
}

fn run_find_machine(settings: Settings) -> Result<()> {
    let name = detect(&settings.machines)
        .ok_or_else(|| anyhow!("no machine matches current environment"))?;
    println!("{name}");

    Ok(())
}
