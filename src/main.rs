//! ontolink - clinical ontology graph loader

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ontolink::cli::App;
use ontolink::error::AppError;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let app = App::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default = if app.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match app.run().await {
        Ok(code) => code,
        Err(report) => {
            let code = report
                .downcast_ref::<AppError>()
                .map(AppError::exit_code)
                .unwrap_or(1);
            eprintln!("Error: {:?}", report);
            code
        }
    };
    std::process::exit(code);
}
