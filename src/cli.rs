//! CLI front end (C8): `actions` / `action` / `command` / `help` / `usage`
//! subcommands over the session and action dispatcher, built with the
//! `clap::Command` builder API.

use crate::action;
use crate::config;
use crate::error::{AmiError, CliUsageError};
use crate::session::{ConnectOptions, Session};
use clap::{Arg, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::TcpStream;

/// Static catalogue backing `actions`/`help <Name>`. Kept separate from the
/// dispatcher functions in [`crate::action`] since those are the thing
/// being described here, not the description itself.
const ACTION_TABLE: &[(&str, &str)] = &[
    ("Ping", "Ping — round-trip the connection; no arguments."),
    ("Command", "Command <console-cmd> — run a console command, returns its output lines."),
    (
        "Originate",
        "Originate --channel=<chan> (--context=..&--extension=..&--priority=.. | --application=..[--data=..]) [--timeout=ms] [--caller-id=..] [--account=..] [--async]",
    ),
    ("Hangup", "Hangup --channel=<chan> [--cause=<n>]"),
    ("Redirect", "Redirect --channel=<chan> --context=.. --extension=.. --priority=.. [--extra-channel=..]"),
    ("Setvar", "Setvar [--channel=<chan>] --variable=<name> --value=<value>"),
    ("Getvar", "Getvar [--channel=<chan>] --variable=<name> [--default=<value>]"),
    ("MailboxStatus", "MailboxStatus --mailbox=<box>"),
    ("MailboxCount", "MailboxCount --mailbox=<box>"),
    ("ExtensionState", "ExtensionState --extension=.. --context=.."),
    ("AbsoluteTimeout", "AbsoluteTimeout --channel=<chan> --timeout=<seconds>"),
    ("Monitor", "Monitor --channel=<chan> --file=.. --format=.. [--mix]"),
    ("StopMonitor", "StopMonitor --channel=<chan>"),
    ("ChangeMonitor", "ChangeMonitor --channel=<chan> --file=.."),
    ("PauseMonitor", "PauseMonitor --channel=<chan>"),
    ("UnpauseMonitor", "UnpauseMonitor --channel=<chan>"),
    ("SendText", "SendText --channel=<chan> --message=.."),
    ("DBGet", "DBGet --family=.. --key=.."),
    ("DBPut", "DBPut --family=.. --key=.. --value=.."),
    ("DBDel", "DBDel --family=.. --key=.."),
    ("DBDelTree", "DBDelTree --family=.. [--key=..]"),
    ("UserEvent", "UserEvent --name=.. [--key=value…]"),
    ("Bridge", "Bridge --channel1=.. --channel2=.. [--tone]"),
    ("ModuleLoad", "ModuleLoad --module=.. --load-type=.."),
    ("Reload", "Reload [--module=..]"),
    ("CoreSettings", "CoreSettings — no arguments."),
    ("CoreStatus", "CoreStatus — no arguments."),
    ("Status", "Status — list action; aggregates channel → fields."),
    ("QueueStatus", "QueueStatus — list action; aggregates queue → {fields, members, entries}."),
    ("ParkedCalls", "ParkedCalls — list action; aggregates extension → fields."),
    ("ZapShowChannels", "ZapShowChannels — list action; aggregates channel number → fields."),
];

fn build_command() -> Command {
    Command::new("amicli")
        .about("Command-line client for the Asterisk Manager Interface")
        .arg(Arg::new("config").long("config").value_name("PATH").help("explicit config file path"))
        .arg(Arg::new("connection").long("connection").value_name("NAME").help("named connection to use"))
        .arg(Arg::new("host").long("host").value_name("HOST").help("override the config's host"))
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("override the config's port"),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("actions").about("list actions and their signatures"))
        .subcommand(
            Command::new("action")
                .about("invoke an action by name")
                .arg(Arg::new("name").required(true))
                .arg(
                    Arg::new("args")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .help("--key=value pairs"),
                ),
        )
        .subcommand(
            Command::new("command")
                .about("run a console command (shortcut for the Command action)")
                .arg(Arg::new("line").required(true).num_args(1..).trailing_var_arg(true)),
        )
        .subcommand(
            Command::new("help")
                .about("show one action's signature")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(Command::new("usage").about("show this help text"))
}

/// Parse a list of `--key=value` tokens (as left over by clap's
/// `trailing_var_arg`) into key/value pairs. A bare `--` separator is
/// skipped; anything else is a usage error.
fn parse_kv_args(tokens: &[String]) -> Result<Vec<(String, String)>, CliUsageError> {
    let mut out = Vec::new();
    for token in tokens {
        if token == "--" {
            continue;
        }
        let Some(stripped) = token.strip_prefix("--") else {
            return Err(CliUsageError(format!("expected --key=value, got {token:?}")));
        };
        let Some((key, value)) = stripped.split_once('=') else {
            return Err(CliUsageError(format!("expected --key=value, got {token:?}")));
        };
        out.push((key.to_owned(), value.to_owned()));
    }
    Ok(out)
}

async fn connect_from_args(matches: &clap::ArgMatches) -> Result<Session, AmiError> {
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let connection_name = matches.get_one::<String>("connection").map(String::as_str);

    let profile = config::load(config_path.as_deref(), connection_name)?;
    let host = matches.get_one::<String>("host").cloned().unwrap_or(profile.host);
    let port = matches.get_one::<u16>("port").copied().unwrap_or(profile.port);

    let stream = TcpStream::connect((host.as_str(), port)).await?;
    Session::connect(
        stream,
        ConnectOptions {
            username: profile.username,
            secret: profile.secret,
            ..ConnectOptions::default()
        },
    )
    .await
}

pub async fn run() -> ExitCode {
    let command = build_command();
    let matches = match command.try_get_matches() {
        Ok(m) => m,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(2);
        }
    };

    match matches.subcommand() {
        Some(("actions", _)) => {
            for (name, sig) in ACTION_TABLE {
                println!("{name}: {sig}");
            }
            ExitCode::SUCCESS
        }
        Some(("help", sub)) => {
            let name = sub.get_one::<String>("name").unwrap();
            match ACTION_TABLE.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some((_, sig)) => {
                    println!("{sig}");
                    ExitCode::SUCCESS
                }
                None => {
                    eprintln!("unknown action: {name}");
                    ExitCode::from(2)
                }
            }
        }
        Some(("usage", _)) => {
            println!("{}", build_command().render_long_help());
            ExitCode::SUCCESS
        }
        Some(("action", sub)) => {
            let name = sub.get_one::<String>("name").unwrap().clone();
            let tokens: Vec<String> = sub.get_many::<String>("args").map(|v| v.cloned().collect()).unwrap_or_default();
            let args = match parse_kv_args(&tokens) {
                Ok(a) => a,
                Err(e) => {
                    eprintln!("usage error: {e}");
                    return ExitCode::from(2);
                }
            };

            let session = match connect_from_args(&matches).await {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("connection error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let result = action::invoke_raw(&session, &name, &args).await;
            let _ = session.close().await;
            match result {
                Ok(packet) => {
                    print!("{packet}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("action failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(("command", sub)) => {
            let parts: Vec<String> = sub.get_many::<String>("line").map(|v| v.cloned().collect()).unwrap_or_default();
            let line = parts.join(" ");

            let session = match connect_from_args(&matches).await {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("connection error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let result = action::command(&session, &line).await;
            let _ = session.close().await;
            match result {
                Ok(lines) => {
                    for line in lines {
                        println!("{line}");
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("action failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        _ => ExitCode::from(2),
    }
}
