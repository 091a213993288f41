//! Command-line argument parsing

use crate::error::{ReplicationError, Result};
use crate::model::{Filter, Registry};
use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "registry-replicator")]
#[command(about = "Drive the replication core by hand: inspect registries and copy or delete artifacts")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet mode
    #[arg(long = "quiet", short = 'q', global = true, help = "Only print errors and results")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the registered adapter types and their endpoint patterns
    Adapters,

    /// Check that a registry is reachable with its credential
    Health {
        #[arg(long = "registry", short = 'r', help = "Registry as inline JSON or a path to a JSON file")]
        registry: String,
    },

    /// Fetch the resources of a registry that survive the filters
    List {
        #[arg(long = "registry", short = 'r', help = "Registry as inline JSON or a path to a JSON file")]
        registry: String,

        #[command(flatten)]
        filters: FilterArgs,

        #[arg(long = "charts", help = "List Helm charts instead of artifacts")]
        charts: bool,
    },

    /// Copy tags of one repository between two registries
    Copy {
        #[arg(long = "src", help = "Source registry as inline JSON or a path to a JSON file")]
        src: String,

        #[arg(long = "dst", help = "Destination registry as inline JSON or a path to a JSON file")]
        dst: String,

        #[command(flatten)]
        target: TargetArgs,

        #[arg(long = "dst-repository", help = "Destination repository, defaults to the source name")]
        dst_repository: Option<String>,

        #[arg(long = "override", help = "Replace destination tags whose content differs")]
        override_existing: bool,

        #[arg(long = "speed", help = "Bandwidth limit in KiB/s")]
        speed: Option<u32>,
    },

    /// Delete tags or artifacts from a registry
    Delete {
        #[arg(long = "registry", short = 'r', help = "Registry as inline JSON or a path to a JSON file")]
        registry: String,

        #[command(flatten)]
        target: TargetArgs,

        #[arg(long = "tag-only", help = "Remove only the tags, keep the artifacts")]
        tag_only: bool,
    },
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct FilterArgs {
    #[arg(long = "name", help = "Repository name pattern")]
    pub name: Option<String>,

    #[arg(long = "tag", help = "Tag pattern")]
    pub tag: Option<String>,

    #[arg(long = "label", help = "Required label, repeatable")]
    pub labels: Vec<String>,
}

impl FilterArgs {
    pub fn to_filters(&self) -> Vec<Filter> {
        let mut filters = Vec::new();
        if let Some(name) = &self.name {
            filters.push(Filter::name(name.clone()));
        }
        if let Some(tag) = &self.tag {
            filters.push(Filter::tag(tag.clone()));
        }
        if !self.labels.is_empty() {
            filters.push(Filter::label(self.labels.clone()));
        }
        filters
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TargetArgs {
    #[arg(long = "repository", help = "Repository or chart name")]
    pub repository: String,

    #[arg(long = "reference", required = true, help = "Tag, digest or chart version, repeatable")]
    pub references: Vec<String>,

    #[arg(long = "chart", help = "The target is a Helm chart")]
    pub chart: bool,
}

/// Reads a registry given inline (`{...}`) or as a file path
pub fn parse_registry(value: &str) -> Result<Registry> {
    let trimmed = value.trim_start();
    let content = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        std::fs::read_to_string(value)
            .map_err(|e| ReplicationError::invalid(format!("cannot read registry file {}: {}", value, e)))?
    };
    let registry: Registry = serde_json::from_str(&content)
        .map_err(|e| ReplicationError::invalid(format!("invalid registry definition: {}", e)))?;
    registry.validate()?;
    Ok(registry)
}
