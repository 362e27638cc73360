//! Import, map and patient command handlers.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use color_eyre::Result;

use crate::services::{ImportKind, ImportService, MappingService, PatientService};

use super::{finish, App};

#[derive(Args)]
pub struct ImportArgs {
    /// Kind of ontology file
    #[arg(value_enum)]
    pub kind: ImportKind,

    /// Input file
    pub file: PathBuf,
}

#[derive(Subcommand)]
pub enum MapCommand {
    /// Cross-map through a UMLS MRCONSO.RRF concept file
    Umls {
        /// Concept file
        file: PathBuf,
    },
}

impl App {
    pub async fn run_import(&self, args: &ImportArgs) -> Result<i32> {
        let report = self
            .with_context(|ctx| async move {
                let service = ctx.resolve::<ImportService>();
                Ok(service.import(args.kind, &args.file).await)
            })
            .await?;
        Ok(finish(report))
    }

    pub async fn run_map(&self, command: &MapCommand) -> Result<i32> {
        let MapCommand::Umls { file } = command;
        let report = self
            .with_context(|ctx| async move {
                let service = ctx.resolve::<MappingService>();
                Ok(service.map_umls(file).await)
            })
            .await?;
        Ok(finish(report))
    }

    pub async fn run_patients(&self, file: &Path) -> Result<i32> {
        let report = self
            .with_context(|ctx| async move {
                let service = ctx.resolve::<PatientService>();
                Ok(service.ingest(file).await)
            })
            .await?;
        Ok(finish(report))
    }
}
