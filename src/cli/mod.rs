//! CLI module for ontolink.
//!
//! Subcommands:
//! - `init`: Create the graph, identity indexes and vector indexes
//! - `import`: Load one ontology file and link its hierarchy
//! - `map umls`: Cross-map ICD10 and HPO through UMLS concepts
//! - `embed`: Attach label embeddings
//! - `patients`: Ingest a patient annotation file
//! - `run`: The full two-pass pipeline
//! - `stats`: Node and edge counts

mod embed;
mod import;
mod init;
mod run;

use std::future::Future;

use clap::{Parser, Subcommand};
use color_eyre::Result;

use crate::config::{Backend, Config};
use crate::context::Context;
use crate::error::AppError;
use crate::models::RunReport;
use crate::parser::ErrorPolicy;

pub use embed::EmbedArgs;
pub use import::{ImportArgs, MapCommand};
pub use run::RunArgs;

/// ontolink - ICD10 and HPO knowledge graph loader
#[derive(Parser)]
#[command(name = "ontolink")]
#[command(about = "Load ICD10, HPO, UMLS and patient data into a knowledge graph")]
#[command(version)]
pub struct App {
    /// Graph store backend (overrides configuration)
    #[arg(long, global = true)]
    pub backend: Option<Backend>,

    /// What to do with malformed input lines (overrides configuration)
    #[arg(long, global = true)]
    pub on_error: Option<ErrorPolicy>,

    /// Run in verbose mode
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the graph and its constraints and indexes
    Init,

    /// Import an ontology file
    Import(ImportArgs),

    /// Cross-map loaded ontologies
    Map {
        #[command(subcommand)]
        command: MapCommand,
    },

    /// Attach label embeddings to disease and phenotype nodes
    Embed(EmbedArgs),

    /// Ingest a patient annotation CSV file
    Patients {
        /// Patient annotation file
        file: std::path::PathBuf,
    },

    /// Run the full two-pass pipeline
    Run(RunArgs),

    /// Show node and edge counts
    Stats,
}

impl App {
    /// Run the CLI application. Returns the process exit code.
    pub async fn run(self) -> Result<i32> {
        match &self.command {
            Command::Init => self.run_init().await,
            Command::Import(args) => self.run_import(args).await,
            Command::Map { command } => self.run_map(command).await,
            Command::Embed(args) => self.run_embed(args).await,
            Command::Patients { file } => self.run_patients(file).await,
            Command::Run(args) => self.run_pipeline(args).await,
            Command::Stats => self.run_stats().await,
        }
    }

    /// Configuration with the command-line overrides applied.
    fn config(&self) -> Result<Config, AppError> {
        let mut config = Config::load()?;
        if let Some(backend) = self.backend {
            config.store.backend = backend;
        }
        if let Some(policy) = self.on_error {
            config.import.on_error = policy;
        }
        Ok(config)
    }

    /// Connects, runs `op` and closes the store, also when `op` failed.
    async fn with_context<T, F, Fut>(&self, op: F) -> Result<T, AppError>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let ctx = Context::connect(self.config()?).await?;
        let result = op(ctx.clone()).await;
        if let Err(e) = ctx.close().await {
            tracing::warn!("Failed to close store: {}", e);
        }
        result
    }
}

/// Prints a run report and turns it into an exit code.
fn finish(report: RunReport) -> i32 {
    print!("{}", report);
    for warning in &report.warnings {
        tracing::debug!("{}", warning);
    }
    report.exit_code()
}
