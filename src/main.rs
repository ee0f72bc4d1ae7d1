use a2i::{
    config::{DatabaseConfig, ServiceConfig},
    supervisor::Supervisor,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the incidents pipeline.
    Run,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    let subscriber =
        FmtSubscriber::builder().with_env_filter(EnvFilter::from_default_env()).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run_pipeline().await?,
    }

    Ok(())
}

async fn run_pipeline() -> Result<(), Box<dyn std::error::Error>> {
    let database_config = DatabaseConfig::load()?;
    let service_config = ServiceConfig::load()?;

    let supervisor = Supervisor::builder()
        .database_config(database_config)
        .service_config(service_config)
        .build()
        .await?;

    tracing::info!("Supervisor initialized, starting the pipeline...");

    supervisor.run().await?;

    Ok(())
}
