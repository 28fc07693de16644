//! Field Sensor Service entry point

use clap::Parser;

use sensorsrv::core::bootstrap::{self, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    bootstrap::initialize_logging(&args)?;
    bootstrap::run(args).await?;
    Ok(())
}
