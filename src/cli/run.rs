//! Full pipeline command handler.

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use crate::services::{PipelineService, RunPlan};

use super::{finish, App};

#[derive(Args)]
pub struct RunArgs {
    /// ICD10 chapters file
    #[arg(long)]
    pub chapters: Option<PathBuf>,

    /// ICD10 groups (blocks) file
    #[arg(long)]
    pub groups: Option<PathBuf>,

    /// ICD10 codes file
    #[arg(long)]
    pub codes: Option<PathBuf>,

    /// HPO term table
    #[arg(long)]
    pub hpo: Option<PathBuf>,

    /// UMLS concept file
    #[arg(long)]
    pub umls: Option<PathBuf>,

    /// Patient annotation files (repeatable)
    #[arg(long)]
    pub patients: Vec<PathBuf>,

    /// Attach embeddings after loading
    #[arg(long)]
    pub embed: bool,
}

impl From<&RunArgs> for RunPlan {
    fn from(args: &RunArgs) -> Self {
        RunPlan {
            chapters: args.chapters.clone(),
            groups: args.groups.clone(),
            codes: args.codes.clone(),
            hpo: args.hpo.clone(),
            umls: args.umls.clone(),
            patients: args.patients.clone(),
            embed: args.embed,
        }
    }
}

impl App {
    pub async fn run_pipeline(&self, args: &RunArgs) -> Result<i32> {
        let plan = RunPlan::from(args);
        let report = self
            .with_context(|ctx| async move {
                let pipeline = ctx.resolve::<PipelineService>();
                Ok(pipeline.run(&plan).await)
            })
            .await?;
        Ok(finish(report))
    }
}
