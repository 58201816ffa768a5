use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use zer0_common::Config;
use zer0_graph::{migrate::migrate, GraphClient};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("zer0=info".parse()?))
        .init();

    info!("zer0 migrate starting...");

    let config = Config::from_env();
    config.log_redacted();

    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await?;
    migrate(&client).await?;

    info!("Migrations complete");
    Ok(())
}
