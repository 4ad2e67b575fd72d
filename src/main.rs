use anyhow::Result;

use claude_station::config::{Config, UserPaths};
use claude_station::{cli, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    let paths = UserPaths::from_home();
    let _log_guard = logging::init(&config, &paths)?;

    cli::run(config).await
}
