mod cli;

use anyhow::Context;
use cli::Action;
use log::info;
use mips_relay::config::{parse_log_level, Config};
use mips_relay::gate::RateGate;
use mips_relay::logging::{self, cleaner};
use mips_relay::mips::MipsClient;
use mips_relay::runner::App;
use mips_relay::telegram::{Destination, TelegramGateway};
use std::path::Path;
use std::sync::Arc;

fn clean_logs(dir: &Path, retention_days: u64, delete: bool) -> anyhow::Result<()> {
    let files = cleaner::clean_log_files(dir, retention_days, delete)
        .with_context(|| format!("cleaning {}", dir.display()))?;
    let verb = if delete { "deleted" } else { "would delete" };
    for f in &files {
        println!("{verb} {}", f.display());
    }
    Ok(())
}

async fn execute(
    cfg: &Config,
    gate: Arc<RateGate>,
    telegram: &TelegramGateway,
    action: Action,
) -> anyhow::Result<()> {
    match action {
        Action::CheckConfig => {
            println!("config {} is valid", cfg.env);
            for target in cfg.targets() {
                println!("{target}");
            }
        }
        Action::Send { text, log_chat } => {
            let dest = if log_chat {
                Destination::Logs
            } else {
                Destination::Updates
            };
            telegram.send_message(&text, dest, None).await?;
            info!("message sent to {:?}", dest);
        }
        Action::Devices { is_online } => {
            let mips = MipsClient::new(&cfg.mips, gate)?;
            for device in mips.get_devices(is_online).await? {
                println!("{}", serde_json::to_string(&device)?);
            }
        }
        Action::Run { once } => {
            let mips = MipsClient::new(&cfg.mips, gate)?;
            App::new(mips, cfg.sleep_between_runs).run(once).await?;
        }
        Action::CleanLogs {
            dir,
            retention_days,
            delete,
        } => clean_logs(&dir, retention_days, delete)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli::build_cli().get_matches();
    let opts = cli::parse(&matches);

    if opts.version {
        println!("mips-relay {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let Some(action) = opts.action else {
        cli::build_cli().print_help()?;
        return Ok(());
    };

    // Log cleanup runs without a config file.
    if let Action::CleanLogs {
        dir,
        retention_days,
        delete,
    } = &action
    {
        cli::init_logging(opts.log_level.as_deref());
        return clean_logs(dir, *retention_days, *delete);
    }

    let mut cfg = Config::from_env_in(opts.config_dir.as_deref()).context("loading config")?;
    if let Some(level) = opts.log_level.as_deref() {
        cfg.log_level = parse_log_level(level)?;
    }

    // One gate for the whole process: log delivery and job traffic to
    // Telegram share the same bucket.
    let gate = Arc::new(RateGate::from_targets(cfg.targets()));
    let telegram = Arc::new(TelegramGateway::new(&cfg.telegram, gate.clone())?);
    let handle = logging::install(&cfg.logging, cfg.log_level, Some(telegram.clone()))?;
    info!("mips-relay {} starting with env {}", env!("CARGO_PKG_VERSION"), cfg.env);

    let result = execute(&cfg, gate, &telegram, action).await;
    if let Err(e) = &result {
        log::error!(tg = true; "{e:#}");
    }
    handle.shutdown().await;
    result
}
