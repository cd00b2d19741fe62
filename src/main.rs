use anyhow::{anyhow, Result};
use clap::Parser;
use log::LevelFilter;
use syslog::{BasicLogger, Facility, Formatter3164};

use feedbackd::{application::Application, cli::Cli, settings::SettingsManager};

fn init_log(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "feedbackd".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|()| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log(cli.verbose)?;

    let settings = SettingsManager::load(cli.settings).await?;

    Application::builder()
        .with_settings(settings)
        .with_replace(cli.replace)
        .build()?
        .run()
        .await
}
