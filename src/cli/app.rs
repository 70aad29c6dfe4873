//! Main CLI application structure

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use super::output::{Output, OutputFormat};
use super::{project_cmd, query, watch};
use crate::storage::{Config, Workspace};

#[derive(Parser)]
#[command(name = "buildtree")]
#[command(author, version, about = "Incremental project tree for multi-module builds")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the global config setting)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new buildtree workspace
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Start managing project descriptors (files or directories)
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Profile to enable
        #[arg(long = "profile", short = 'P')]
        profiles: Vec<String>,

        /// Profile to disable
        #[arg(long = "disable-profile")]
        disabled_profiles: Vec<String>,
    },

    /// Stop managing project descriptors
    Remove {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show or change the explicit profile selection
    Profiles {
        /// Profile to enable
        #[arg(long)]
        enable: Vec<String>,

        /// Profile to disable
        #[arg(long)]
        disable: Vec<String>,

        /// Clear the selection before applying --enable/--disable
        #[arg(long)]
        clear: bool,
    },

    /// Exclude projects from resolution
    Ignore {
        /// Descriptor files or directories
        paths: Vec<PathBuf>,

        /// Glob pattern matched against descriptor paths
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Remove the given paths and patterns instead
        #[arg(long)]
        unignore: bool,
    },

    /// Re-read descriptors (all managed projects when none are given)
    Update {
        files: Vec<PathBuf>,

        /// Re-read even if nothing changed on disk
        #[arg(long)]
        force: bool,
    },

    /// Resolve dependencies, plugins and folders for every project
    Resolve {
        /// Also download sources and javadoc
        #[arg(long)]
        download: bool,
    },

    /// Print the aggregator/module tree
    Tree,

    /// Show one project by descriptor path or coordinate
    Show {
        /// Descriptor path, or group:artifact[:version]
        target: String,
    },

    /// Find resolved artifacts in the index
    Find {
        group: String,
        artifact: Option<String>,
        #[arg(id = "artifact_version", value_name = "VERSION")]
        version: Option<String>,
    },

    /// List problems across all projects
    Problems,

    /// Watch descriptors and keep the tree up to date
    Watch,
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let format = cli.format.unwrap_or_else(|| {
        Config::load()
            .map(|config| config.global.default_format.into())
            .unwrap_or_default()
    });
    let output = Output::new(format, cli.verbose);

    match cli.command {
        Commands::Init { path } => {
            output.verbose_ctx("init", &format!("Initializing workspace at: {}", path.display()));
            let workspace = Workspace::init(&path)?;
            output.verbose_ctx("init", &format!("Created state directory at: {}", workspace.state_dir().display()));
            output.success(&format!("Initialized buildtree workspace at {}", workspace.root().display()));
        }

        Commands::Add { files, profiles, disabled_profiles } => {
            project_cmd::add(&output, &files, profiles, disabled_profiles)?
        }
        Commands::Remove { files } => project_cmd::remove(&output, &files)?,
        Commands::Profiles { enable, disable, clear } => project_cmd::profiles(&output, enable, disable, clear)?,
        Commands::Ignore { paths, patterns, unignore } => project_cmd::ignore(&output, &paths, patterns, unignore)?,
        Commands::Update { files, force } => {
            output.verbose_ctx("update", &format!("files={:?}, force={}", files, force));
            project_cmd::update(&output, &files, force)?
        }
        Commands::Resolve { download } => project_cmd::resolve(&output, download)?,

        Commands::Tree => query::tree(&output)?,
        Commands::Show { target } => query::show(&output, &target)?,
        Commands::Find { group, artifact, version } => {
            query::find(&output, &group, artifact.as_deref(), version.as_deref())?
        }
        Commands::Problems => query::problems(&output)?,

        Commands::Watch => watch::run(&output)?,
    }

    Ok(())
}

/// Installs the stderr subscriber; `BUILDTREE_LOG` or `RUST_LOG` override the level
fn init_logging(verbose: bool) {
    let default = if verbose { "buildtree=debug" } else { "buildtree=warn" };
    let filter = EnvFilter::try_from_env("BUILDTREE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_add_with_profiles() {
        let cli = Cli::parse_from([
            "buildtree", "add", "app", "lib/project.toml", "-P", "dev", "--disable-profile", "ci",
        ]);
        match cli.command {
            Commands::Add { files, profiles, disabled_profiles } => {
                assert_eq!(files.len(), 2);
                assert_eq!(profiles, vec!["dev"]);
                assert_eq!(disabled_profiles, vec!["ci"]);
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn format_is_optional() {
        let cli = Cli::parse_from(["buildtree", "tree"]);
        assert!(cli.format.is_none());

        let cli = Cli::parse_from(["buildtree", "--format", "json", "problems"]);
        assert_eq!(cli.format, Some(OutputFormat::Json));
    }
}
