//! Command-line interface and REPL
//!
//! Stands in for the UI collaborators: every line becomes a `ControlEvent`
//! or a read-only query against the session.

use anyhow::{anyhow, bail, Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::DeviceConfig;
use crate::control::{ControlEvent, Session};
use crate::sync::SyncStatus;

/// Parsed REPL line
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Devices,
    Status,
    Set {
        parameter_id: String,
        value: f64,
        address: Option<String>,
    },
    Retry { parameter_id: String },
    SyncAll,
    Select { device_id: String },
    Add(DeviceConfig),
    Remove { device_id: String },
    Toggle { device_id: String },
    Presets,
    SavePreset { name: String, description: String },
    LoadPreset { name: String },
    DeletePreset { name: String },
    FavoritePreset { name: String },
    Help,
    Quit,
}

/// Parse one input line; empty lines yield None
pub fn parse_command(line: &str) -> Result<Option<ReplCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let arg = |i: usize, what: &str| -> Result<String> {
        args.get(i)
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("missing <{}>", what))
    };

    let cmd = match verb.to_lowercase().as_str() {
        "devices" | "ls" => ReplCommand::Devices,
        "status" | "st" => ReplCommand::Status,
        "set" => {
            let parameter_id = arg(0, "param")?;
            let value = arg(1, "value")?
                .parse::<f64>()
                .context("value must be a number")?;
            ReplCommand::Set {
                parameter_id,
                value,
                address: args.get(2).map(|s| s.to_string()),
            }
        }
        "retry" => ReplCommand::Retry {
            parameter_id: arg(0, "param")?,
        },
        "sync" => ReplCommand::SyncAll,
        "select" | "use" => ReplCommand::Select {
            device_id: arg(0, "device")?,
        },
        "add" => {
            let id = arg(0, "id")?;
            let host = arg(1, "host")?;
            let port = arg(2, "port")?
                .parse::<u16>()
                .context("port must be 1-65535")?;
            let name = if args.len() > 3 {
                args[3..].join(" ")
            } else {
                id.clone()
            };
            ReplCommand::Add(DeviceConfig {
                id,
                name,
                host,
                port,
                enabled: true,
            })
        }
        "remove" | "rm" => ReplCommand::Remove {
            device_id: arg(0, "device")?,
        },
        "toggle" => ReplCommand::Toggle {
            device_id: arg(0, "device")?,
        },
        "presets" => ReplCommand::Presets,
        "preset" => {
            let action = arg(0, "save|load|delete|fav")?;
            let name = arg(1, "name")?;
            match action.as_str() {
                "save" => ReplCommand::SavePreset {
                    name,
                    description: args.get(2..).map(|rest| rest.join(" ")).unwrap_or_default(),
                },
                "load" => ReplCommand::LoadPreset { name },
                "delete" | "rm" => ReplCommand::DeletePreset { name },
                "fav" | "favorite" => ReplCommand::FavoritePreset { name },
                other => bail!("unknown preset action '{}'", other),
            }
        }
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => bail!("unknown command '{}' (try 'help')", other),
    };
    Ok(Some(cmd))
}

/// Map a mutating command to a session event
///
/// `set` resolves group and address from the catalogue; an explicit address
/// overrides the catalogue one and is required for parameters outside it.
pub fn to_event(cmd: &ReplCommand, session: &Session) -> Result<Option<ControlEvent>> {
    let event = match cmd {
        ReplCommand::Set {
            parameter_id,
            value,
            address,
        } => {
            let known = session.groups().into_iter().find_map(|g| {
                g.parameters
                    .iter()
                    .find(|p| &p.id == parameter_id)
                    .map(|p| (g.id.clone(), p.address.clone()))
            });
            let (group_id, address) = match (known, address) {
                (Some((group_id, _)), Some(address)) => (group_id, address.clone()),
                (None, Some(address)) => (String::new(), address.clone()),
                (Some((group_id, address)), None) => (group_id, address),
                (None, None) => bail!("unknown parameter '{}': give an address", parameter_id),
            };
            ControlEvent::ParameterChanged {
                group_id,
                parameter_id: parameter_id.clone(),
                address,
                value: *value,
            }
        }
        ReplCommand::Retry { parameter_id } => ControlEvent::RetrySync {
            parameter_id: parameter_id.clone(),
        },
        ReplCommand::SyncAll => ControlEvent::SyncAll,
        ReplCommand::Select { device_id } => ControlEvent::SelectDevice {
            device_id: device_id.clone(),
        },
        ReplCommand::Add(device) => ControlEvent::AddDevice(device.clone()),
        ReplCommand::Remove { device_id } => ControlEvent::RemoveDevice {
            device_id: device_id.clone(),
        },
        ReplCommand::Toggle { device_id } => ControlEvent::ToggleDevice {
            device_id: device_id.clone(),
        },
        ReplCommand::SavePreset { name, description } => ControlEvent::SavePreset {
            name: name.clone(),
            description: description.clone(),
        },
        ReplCommand::LoadPreset { name } => ControlEvent::LoadPreset { name: name.clone() },
        ReplCommand::DeletePreset { name } => ControlEvent::DeletePreset { name: name.clone() },
        ReplCommand::FavoritePreset { name } => ControlEvent::FavoritePreset { name: name.clone() },
        ReplCommand::Devices
        | ReplCommand::Status
        | ReplCommand::Presets
        | ReplCommand::Help
        | ReplCommand::Quit => return Ok(None),
    };
    Ok(Some(event))
}

/// Run one command against the session; returns false on quit
pub async fn execute(session: &Session, cmd: ReplCommand) -> bool {
    match &cmd {
        ReplCommand::Quit => return false,
        ReplCommand::Help => print_help(),
        ReplCommand::Devices => print_devices(session),
        ReplCommand::Status => print_status(session),
        ReplCommand::Presets => print_presets(session),
        _ => match to_event(&cmd, session) {
            Ok(Some(event)) => match session.handle(event).await {
                Ok(()) => println!("{}", "ok".green()),
                Err(e) => println!("{} {:#}", "error:".red().bold(), e),
            },
            Ok(None) => {}
            Err(e) => println!("{} {:#}", "error:".red().bold(), e),
        },
    }
    true
}

/// Read lines on a detached thread and forward parsed commands
///
/// Runs outside the runtime's blocking pool so a pending readline never
/// holds up shutdown. The channel closes on EOF, Ctrl-C at the prompt, or `quit`.
pub fn spawn_repl(tx: mpsc::Sender<ReplCommand>) -> std::thread::JoinHandle<Result<()>> {
    std::thread::spawn(move || {
        let mut rl = DefaultEditor::new()?;
        println!("{}", "Type 'help' for commands.".dimmed());

        loop {
            match rl.readline("osc-sync> ") {
                Ok(line) => {
                    let _ = rl.add_history_entry(line.as_str());
                    match parse_command(&line) {
                        Ok(Some(cmd)) => {
                            let quit = cmd == ReplCommand::Quit;
                            if tx.blocking_send(cmd).is_err() || quit {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => println!("{} {:#}", "error:".red().bold(), e),
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                    let _ = tx.blocking_send(ReplCommand::Quit);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!("REPL closed");
        Ok(())
    })
}

fn print_help() {
    println!("\n{}", "Commands:".bold());
    for (usage, what) in [
        ("devices", "list devices"),
        ("status", "parameter states and counts"),
        ("set <param> <value> [address]", "change a parameter on the selected device"),
        ("retry <param>", "re-send a parameter's last value"),
        ("sync", "push every configured parameter"),
        ("select <device>", "choose the target device"),
        ("add <id> <host> <port> [name]", "add and connect a device"),
        ("remove <device>", "remove a device"),
        ("toggle <device>", "enable/disable a device"),
        ("presets", "list presets, favorites first"),
        ("preset save <name> [description]", "snapshot current values"),
        ("preset load|delete|fav <name>", "apply, remove or star a preset"),
        ("quit", "exit"),
    ] {
        println!("  {:<32} {}", usage.cyan(), what);
    }
}

fn print_devices(session: &Session) {
    let views = session.device_views();
    if views.is_empty() {
        println!("{}", "No devices".dimmed());
        return;
    }
    for v in views {
        let marker = if v.selected { "▶" } else { " " };
        let state = if v.connected {
            "connected".green()
        } else if v.descriptor.enabled {
            "disconnected".red()
        } else {
            "disabled".dimmed()
        };
        println!(
            "{} {:<16} {:<20} {:<22} {} ({} msgs)",
            marker,
            v.descriptor.id.bright_white(),
            v.descriptor.name,
            format!("{}:{}", v.descriptor.host, v.descriptor.port),
            state,
            v.message_count
        );
    }
}

fn print_presets(session: &Session) {
    let presets = session.presets();
    if presets.is_empty() {
        println!("{}", "No presets".dimmed());
        return;
    }
    for p in presets {
        let star = if p.favorite { "★".yellow() } else { " ".normal() };
        println!(
            "{} {:<20} {:>3} values  {}  {}",
            star,
            p.name.bright_white(),
            p.len(),
            p.created_at
                .with_timezone(&chrono::Local)
                .format("%m-%d %H:%M"),
            p.description.dimmed()
        );
    }
}

fn print_status(session: &Session) {
    let states = session.engine().parameters();
    for s in &states {
        let status = match s.status {
            SyncStatus::Idle => "idle".dimmed(),
            SyncStatus::Syncing => "syncing".yellow(),
            SyncStatus::Synced => "synced".green(),
            SyncStatus::Error => "error".red(),
        };
        let when = s
            .last_sync_time
            .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "  {:<16} {:<20} {:>10} {:<8} {}",
            s.id, s.address, s.value, status, when
        );
        if let (SyncStatus::Error, Some(reason)) = (s.status, &s.last_error) {
            println!("  {:<16} {}", "", reason.red().dimmed());
        }
    }

    let summary = session.summary();
    println!(
        "\n  {} synced, {} syncing, {} error, {} total",
        summary.synced.to_string().green(),
        summary.syncing.to_string().yellow(),
        summary.error.to_string().red(),
        summary.total
    );
}
