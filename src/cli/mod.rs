use clap::{Parser, Subcommand};

mod errors;
mod handlers;
mod validation;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Enable debug logging
    #[clap(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the default config and create the collection
    Init {},

    /// Set feedback on a record and sync the index
    Feedback {
        /// Record id
        id: String,

        /// positive, negative or none
        feedback: String,
    },

    /// Edit a record and sync the index
    Edit {
        /// Record id
        id: String,

        /// Category tag
        #[clap(short, long)]
        schema: Option<String>,

        #[clap(long)]
        hidden: Option<bool>,

        /// Record type
        #[clap(short = 't', long = "type")]
        kind: Option<String>,

        #[clap(short, long)]
        question: Option<String>,

        /// JSON file with `[{"role": .., "message": ..}]`
        #[clap(short, long)]
        messages_file: Option<String>,
    },

    /// Find positively rated conversations similar to a query
    Search {
        query: String,

        /// Only this category tag
        #[clap(short, long)]
        schema: Option<String>,

        /// Only this record type
        #[clap(short = 't', long = "type")]
        kind: Option<String>,

        #[clap(short, long)]
        limit: Option<usize>,

        /// Minimum similarity score
        #[clap(long, allow_hyphen_values = true)]
        min_score: Option<f32>,
    },

    /// Rebuild or repair the index from the record store
    Seed {
        #[clap(short, long)]
        batch_size: Option<usize>,

        /// Only upsert positive records, skip removal and pruning
        #[clap(long, default_value = "false")]
        positive_only: bool,

        /// Page token printed by an interrupted run
        #[clap(long)]
        resume_from: Option<String>,
    },

    /// Import records from a JSON array file
    Import {
        file: String,
    },

    /// Show record and index counts
    Status {},
}
