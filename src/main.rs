use anyhow::Context;
use stackdriver_output::app::{self, App, Config};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load(std::env::args_os()).context("Failed to load configuration")?;
    app::setup_logging(config.log_level, config.log_format)?;

    let app = App::from_config(config).context("Failed to initialize output")?;
    let summary = app.run().await?;
    info!(
        "Run finished: {} delivered, {} abandoned, {} deliveries",
        summary.delivered, summary.abandoned, summary.deliveries
    );

    if summary.abandoned > 0 {
        anyhow::bail!("{} inputs were not delivered", summary.abandoned);
    }
    Ok(())
}
