//! Embed command handler.

use clap::Args;
use color_eyre::Result;

use crate::embedding::EmbedTarget;
use crate::services::EmbeddingService;

use super::{finish, App};

#[derive(Args)]
pub struct EmbedArgs {
    /// Which nodes to embed
    #[arg(long, value_enum, default_value_t = EmbedTarget::All)]
    pub target: EmbedTarget,

    /// Recompute vectors that already exist
    #[arg(long)]
    pub force: bool,
}

impl App {
    pub async fn run_embed(&self, args: &EmbedArgs) -> Result<i32> {
        let report = self
            .with_context(|ctx| async move {
                let service = ctx.resolve::<EmbeddingService>();
                Ok(service.embed(args.target, args.force).await)
            })
            .await?;
        Ok(finish(report))
    }
}
