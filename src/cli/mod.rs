//! CLI definitions - clap v4 derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::model::{LabelSource, ModelKind};

pub mod commands;

/// tagwise - tag co-occurrence statistics classifier
#[derive(Parser, Debug)]
#[command(name = "tagwise")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Machine-readable JSON output
    #[arg(long, short = 'm', global = true)]
    pub machine: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (default: ~/.config/tagwise/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Which model to operate on
    #[arg(long, global = true, value_enum, default_value_t = ModelKind::Rating)]
    pub model: ModelKind,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the model from trusted-labeled items
    Train,

    /// Classify a single item
    Infer {
        /// Item id
        item_id: i64,
    },

    /// Classify every unlabeled item
    InferAll {
        /// Stop after this many items
        #[arg(long)]
        limit: Option<u64>,

        /// Worker threads (default: number of CPUs)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Show model statistics and staleness
    Stats,

    /// Set or clear an item's label
    Label {
        /// Item id
        item_id: i64,

        /// Label name; omit to clear
        #[arg(long)]
        label: Option<String>,

        /// Assignment source
        #[arg(long, value_enum, default_value_t = LabelSource::User)]
        source: LabelSource,

        /// Confidence to record alongside the label
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// Inspect or change classifier configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Nuclear recovery: clear machine labels, retrain, re-infer everything
    Recover {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print one effective config value
    Get { key: String },
    /// Override a config value
    Set { key: String, value: f64 },
    /// Print all effective config values
    List,
    /// Drop all overrides, restoring defaults
    Reset,
}
