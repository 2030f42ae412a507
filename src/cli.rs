use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CheckConfig,
    Send { text: String, log_chat: bool },
    Devices { is_online: Option<bool> },
    Run { once: bool },
    CleanLogs {
        dir: PathBuf,
        retention_days: u64,
        delete: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliOptions {
    pub log_level: Option<String>,
    pub config_dir: Option<PathBuf>,
    pub version: bool,
    pub action: Option<Action>,
}

pub fn build_cli() -> Command {
    Command::new("mips-relay")
        .about("Rate-gated MIPS polling job with Telegram reporting")
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .num_args(1)
                .help("Override LOGGING_LEVEL (e.g., info, debug)"),
        )
        .arg(
            Arg::new("config-dir")
                .long("config-dir")
                .global(true)
                .num_args(1)
                .value_parser(value_parser!(PathBuf))
                .help("Directory holding <ENV>.yaml (overrides CONFIG_DIR)"),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .help("Print version and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(Command::new("check-config").about("Load and validate the config, then print the targets"))
        .subcommand(
            Command::new("send")
                .about("Send a Telegram message")
                .arg(Arg::new("text").required(true))
                .arg(
                    Arg::new("log")
                        .long("log")
                        .help("Send to the log chat instead of the updates chat")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("devices")
                .about("List MIPS devices as JSON lines")
                .arg(Arg::new("online").long("online").action(ArgAction::SetTrue))
                .arg(Arg::new("offline").long("offline").action(ArgAction::SetTrue))
                .group(ArgGroup::new("state").args(["online", "offline"])),
        )
        .subcommand(
            Command::new("run")
                .about("Run the polling loop until interrupted")
                .arg(
                    Arg::new("once")
                        .long("once")
                        .help("Run a single cycle and exit")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("clean-logs")
                .about("Remove rotated log files past their retention")
                .arg(Arg::new("dir").required(true).value_parser(value_parser!(PathBuf)))
                .arg(
                    Arg::new("retention-days")
                        .long("retention-days")
                        .num_args(1)
                        .value_parser(value_parser!(u64))
                        .default_value("7"),
                )
                .arg(
                    Arg::new("delete")
                        .long("delete")
                        .help("Actually delete; without it only lists the files")
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn action_from(name: &str, sub: &ArgMatches) -> Option<Action> {
    Some(match name {
        "check-config" => Action::CheckConfig,
        "send" => Action::Send {
            text: sub.get_one::<String>("text")?.clone(),
            log_chat: sub.get_flag("log"),
        },
        "devices" => Action::Devices {
            is_online: if sub.get_flag("online") {
                Some(true)
            } else if sub.get_flag("offline") {
                Some(false)
            } else {
                None
            },
        },
        "run" => Action::Run {
            once: sub.get_flag("once"),
        },
        "clean-logs" => Action::CleanLogs {
            dir: sub.get_one::<PathBuf>("dir")?.clone(),
            retention_days: *sub.get_one::<u64>("retention-days")?,
            delete: sub.get_flag("delete"),
        },
        _ => return None,
    })
}

pub fn parse(matches: &ArgMatches) -> CliOptions {
    CliOptions {
        log_level: matches.get_one::<String>("log-level").cloned(),
        config_dir: matches.get_one::<PathBuf>("config-dir").cloned(),
        version: matches.get_flag("version"),
        action: matches
            .subcommand()
            .and_then(|(name, sub)| action_from(name, sub)),
    }
}

/// Console-only logging for commands that run without a config file.
pub fn init_logging(level: Option<&str>) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use mips_relay::logging::cleaner::DEFAULT_RETENTION_DAYS;

    fn parse_args(args: &[&str]) -> CliOptions {
        parse(&build_cli().try_get_matches_from(args).unwrap())
    }

    #[test]
    fn global_flags_after_subcommand() {
        let opts = parse_args(&["mips-relay", "run", "--once", "--log-level", "info", "--config-dir", "cfg"]);
        assert_eq!(opts.log_level.as_deref(), Some("info"));
        assert_eq!(opts.config_dir, Some(PathBuf::from("cfg")));
        assert_eq!(opts.action, Some(Action::Run { once: true }));
    }

    #[test]
    fn devices_state_flags() {
        assert_eq!(
            parse_args(&["mips-relay", "devices"]).action,
            Some(Action::Devices { is_online: None })
        );
        assert_eq!(
            parse_args(&["mips-relay", "devices", "--offline"]).action,
            Some(Action::Devices { is_online: Some(false) })
        );
        assert!(build_cli()
            .try_get_matches_from(["mips-relay", "devices", "--online", "--offline"])
            .is_err());
    }

    #[test]
    fn clean_logs_defaults_to_dry_run() {
        assert_eq!(
            parse_args(&["mips-relay", "clean-logs", "logs"]).action,
            Some(Action::CleanLogs {
                dir: "logs".into(),
                retention_days: DEFAULT_RETENTION_DAYS,
                delete: false,
            })
        );
    }

    #[test]
    fn no_subcommand() {
        let opts = parse_args(&["mips-relay", "--version"]);
        assert!(opts.version);
        assert_eq!(opts.action, None);
    }
}
