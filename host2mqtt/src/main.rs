use std::process::exit;

use anyhow::Result;
use tracing::error;

use host2mqtt::config::{self, Settings};
use host2mqtt::runtime::Runtime;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let path = config::config_path();
    let settings = match Settings::load(&path) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };

    let runtime = Runtime::new(settings)?;
    runtime.run().await
}
