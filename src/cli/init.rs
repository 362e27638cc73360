//! Init and stats command handlers.

use color_eyre::Result;

use crate::services::PipelineService;

use super::App;

impl App {
    /// Run the init command to create the graph schema.
    pub async fn run_init(&self) -> Result<i32> {
        self.with_context(|ctx| async move { ctx.resolve::<PipelineService>().init().await })
            .await?;
        println!("Schema ready");
        Ok(0)
    }

    pub async fn run_stats(&self) -> Result<i32> {
        let stats = self
            .with_context(|ctx| async move { ctx.resolve::<PipelineService>().stats().await })
            .await?;
        println!("{}", stats);
        Ok(0)
    }
}
