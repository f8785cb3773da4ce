use anyhow::Result;
use std::net::Ipv4Addr;

use crate::config::{MAX_SCAN_INTERVAL, MIN_SCAN_INTERVAL, PresenceConfig, ScannerSettings};
use crate::worker::WORKER_SUBCOMMAND;

/// Scanner flags shared by `run`, `scan-once` and `scan-worker`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub target: Option<Ipv4Addr>,
    pub community: Option<String>,
    pub interval: Option<u64>,
}

impl ScanOptions {
    fn is_empty(&self) -> bool {
        self.target.is_none() && self.community.is_none() && self.interval.is_none()
    }

    /// Override scanner settings with whatever was given on the command line.
    pub fn apply_to(&self, settings: &mut ScannerSettings) {
        if let Some(target) = self.target {
            settings.target_ip = target;
        }
        if let Some(community) = &self.community {
            settings.snmp_community = community.clone();
        }
        if let Some(interval) = self.interval {
            settings.interval_secs = interval.clamp(MIN_SCAN_INTERVAL, MAX_SCAN_INTERVAL);
        }
    }

    /// Same as `apply_to`, keeping the reconciler's interval in step.
    pub fn apply_to_config(&self, config: &mut PresenceConfig) {
        self.apply_to(&mut config.scanner);
        config.reconcile.interval_secs = config.scanner.interval_secs;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CliCommand {
    Run { options: ScanOptions },
    ScanOnce { options: ScanOptions },
    ScanWorker { options: ScanOptions },
    Status,
    Register { mac: String, name: String, track: bool },
    Track { mac: String, enabled: bool },
    Help,
    Version,
}

pub fn version_text() -> String {
    format!("presence-core {}", env!("CARGO_PKG_VERSION"))
}

pub fn usage_text() -> String {
    format!(
        "{version}
Presence detection and device identity correlation

Usage:
  presence-core [run] [--target <IP>] [--community <C>] [--interval <SECS>]
  presence-core scan-once [--target <IP>] [--community <C>]
  presence-core status
  presence-core register --mac <MAC> --name <NAME> [--track]
  presence-core track --mac <MAC> [--off]
  presence-core --help
  presence-core --version

Options:
      --target <IP>       SNMP target / gateway address
      --community <C>     SNMP v2c community
      --interval <SECS>   Seconds between scan cycles ({min}-{max})
      --mac <MAC>         Device MAC address
      --name <NAME>       Display name for a registered device
      --track             Track presence of the registered device
      --off               Stop tracking the device
  -h, --help              Show this help text
  -V, --version           Show version

Configuration is read from PRESENCE_* environment variables; flags override them.",
        version = version_text(),
        min = MIN_SCAN_INTERVAL,
        max = MAX_SCAN_INTERVAL
    )
}

fn cli_error(message: impl std::fmt::Display) -> anyhow::Error {
    anyhow::anyhow!("{}\n\n{}", message, usage_text())
}

fn parse_interval_arg(raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| {
            cli_error(format!(
                "Invalid value for --interval: '{}'. Expected a positive integer.",
                raw
            ))
        })
}

fn parse_target_arg(raw: &str) -> Result<Ipv4Addr> {
    raw.parse::<Ipv4Addr>().map_err(|_| {
        cli_error(format!(
            "Invalid value for --target: '{}'. Expected an IPv4 address.",
            raw
        ))
    })
}

/// Split `--flag=value` into its parts
fn split_inline(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('=') {
        Some((flag, value)) if flag.starts_with("--") => (flag, Some(value)),
        _ => (arg, None),
    }
}

pub fn parse_cli_args<I, S>(args: I) -> Result<CliCommand>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut iter = args.into_iter();
    let _program_name = iter.next();

    let mut command: Option<String> = None;
    let mut options = ScanOptions::default();
    let mut mac: Option<String> = None;
    let mut name: Option<String> = None;
    let mut track = false;
    let mut off = false;

    while let Some(arg) = iter.next() {
        let (flag, inline) = split_inline(arg.as_ref());
        let flag = flag.to_string();
        let inline = inline.map(str::to_string);

        let mut value = |flag: &str| -> Result<String> {
            let value = match inline.clone() {
                Some(v) => v,
                None => iter
                    .next()
                    .map(|v| v.as_ref().to_string())
                    .ok_or_else(|| cli_error(format!("Missing value for {}.", flag)))?,
            };
            if value.is_empty() {
                return Err(cli_error(format!("Missing value for {}.", flag)));
            }
            Ok(value)
        };

        match flag.as_str() {
            "-h" | "--help" => return Ok(CliCommand::Help),
            "-V" | "--version" => return Ok(CliCommand::Version),
            "run" | "scan-once" | "status" | "register" | "track" | WORKER_SUBCOMMAND => {
                if command.as_deref().is_some_and(|existing| existing != flag) {
                    return Err(cli_error("Multiple commands provided. Use only one command."));
                }
                command = Some(flag.clone());
            }
            "--target" => options.target = Some(parse_target_arg(&value("--target")?)?),
            "--community" => options.community = Some(value("--community")?),
            "--interval" => options.interval = Some(parse_interval_arg(&value("--interval")?)?),
            "--mac" => mac = Some(value("--mac")?),
            "--name" => name = Some(value("--name")?),
            "--track" => track = true,
            "--off" => off = true,
            _ => return Err(cli_error(format!("Unknown argument: {}", flag))),
        }
    }

    let command = command.unwrap_or_else(|| "run".to_string());
    let device_flags = mac.is_some() || name.is_some() || track || off;

    match command.as_str() {
        "run" | "scan-once" | WORKER_SUBCOMMAND => {
            if device_flags {
                return Err(cli_error(format!(
                    "--mac/--name/--track/--off are not valid with {}.",
                    command
                )));
            }
            Ok(match command.as_str() {
                "run" => CliCommand::Run { options },
                "scan-once" => CliCommand::ScanOnce { options },
                _ => CliCommand::ScanWorker { options },
            })
        }
        "status" => {
            if device_flags || !options.is_empty() {
                return Err(cli_error("status takes no options."));
            }
            Ok(CliCommand::Status)
        }
        "register" => {
            if !options.is_empty() || off {
                return Err(cli_error("register accepts only --mac, --name and --track."));
            }
            let mac = mac.ok_or_else(|| cli_error("register requires --mac."))?;
            let name = name.ok_or_else(|| cli_error("register requires --name."))?;
            Ok(CliCommand::Register { mac, name, track })
        }
        "track" => {
            if !options.is_empty() || name.is_some() || track {
                return Err(cli_error("track accepts only --mac and --off."));
            }
            let mac = mac.ok_or_else(|| cli_error("track requires --mac."))?;
            Ok(CliCommand::Track { mac, enabled: !off })
        }
        other => Err(cli_error(format!("Unknown command: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_help_flag() {
        let parsed = parse_cli_args(["presence-core", "--help"]).expect("help args should parse");
        assert_eq!(parsed, CliCommand::Help);
    }

    #[test]
    fn parse_version_flag() {
        let parsed = parse_cli_args(["presence-core", "-V"]).expect("version args should parse");
        assert_eq!(parsed, CliCommand::Version);
    }

    #[test]
    fn parse_default_run_command() {
        let parsed = parse_cli_args(["presence-core"]).expect("default args should parse");
        assert_eq!(
            parsed,
            CliCommand::Run {
                options: ScanOptions::default()
            }
        );
    }

    #[test]
    fn parse_worker_command_with_scan_flags() {
        let args = [
            "presence-core",
            "scan-worker",
            "--target",
            "10.0.0.1",
            "--community=home",
            "--interval",
            "30",
        ];
        let parsed = parse_cli_args(args).expect("scan-worker should parse");
        assert_eq!(
            parsed,
            CliCommand::ScanWorker {
                options: ScanOptions {
                    target: Some(Ipv4Addr::new(10, 0, 0, 1)),
                    community: Some("home".to_string()),
                    interval: Some(30),
                }
            }
        );
    }

    #[test]
    fn parse_register_command() {
        let args = [
            "presence-core",
            "register",
            "--mac",
            "AC:DE:48:00:11:22",
            "--name",
            "Kaia's Laptop",
            "--track",
        ];
        let parsed = parse_cli_args(args).expect("register should parse");
        assert_eq!(
            parsed,
            CliCommand::Register {
                mac: "AC:DE:48:00:11:22".to_string(),
                name: "Kaia's Laptop".to_string(),
                track: true
            }
        );
    }

    #[test]
    fn parse_track_off() {
        let args = ["presence-core", "track", "--mac", "AC:DE:48:00:11:22", "--off"];
        let parsed = parse_cli_args(args).expect("track should parse");
        assert_eq!(
            parsed,
            CliCommand::Track {
                mac: "AC:DE:48:00:11:22".to_string(),
                enabled: false
            }
        );
    }

    #[test]
    fn parse_register_requires_name() {
        let args = ["presence-core", "register", "--mac", "AC:DE:48:00:11:22"];
        let err = parse_cli_args(args).expect_err("register without name should fail");
        assert!(err.to_string().contains("register requires --name"));
    }

    #[test]
    fn parse_status_rejects_options() {
        let err = parse_cli_args(["presence-core", "status", "--interval", "5"])
            .expect_err("status should reject options");
        assert!(err.to_string().contains("status takes no options"));
    }

    #[test]
    fn parse_invalid_values() {
        let err = parse_cli_args(["presence-core", "--target", "gateway"])
            .expect_err("bad target should fail");
        assert!(err.to_string().contains("Expected an IPv4 address"));

        let err = parse_cli_args(["presence-core", "--interval", "0"])
            .expect_err("zero interval should fail");
        assert!(err.to_string().contains("positive integer"));
    }

    #[test]
    fn parse_multiple_commands_errors() {
        let err = parse_cli_args(["presence-core", "status", "run"])
            .expect_err("two commands should fail");
        assert!(err.to_string().contains("Multiple commands"));
    }

    #[test]
    fn parse_unknown_argument_errors() {
        let err = parse_cli_args(["presence-core", "--unknown"]).expect_err("unknown flag should fail");
        assert!(err.to_string().contains("Unknown argument"));
    }

    #[test]
    fn options_clamp_interval() {
        let mut config = PresenceConfig::from_env().unwrap();
        ScanOptions {
            interval: Some(1),
            ..ScanOptions::default()
        }
        .apply_to_config(&mut config);

        assert_eq!(config.scanner.interval_secs, MIN_SCAN_INTERVAL);
        assert_eq!(config.reconcile.interval_secs, MIN_SCAN_INTERVAL);
    }
}
