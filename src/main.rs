//! blebind - BLE remote button binder
//!
//! Records raw input-event sequences from a two-part Bluetooth remote
//! (keyboard half + mouse half) and fuzzy-matches live sequences
//! against the recorded set to trigger shell commands.

mod config;
mod device;
mod dispatch;
mod event;
mod matcher;
mod scan;
mod sequence;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::Config;
use device::{CancelFlag, Remote};
use sequence::Capture;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "blebind",
    about = "Bind BLE remote button sequences to shell commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover the remote's input devices and save them to the config.
    Scan {
        /// Device name prefix to look for.
        prefix: Option<String>,
    },
    /// Show configured devices and scripts.
    List,
    /// Print tokens live as buttons are pressed. Ctrl-C to stop.
    Monitor,
    /// Capture one sequence and bind it to a name.
    Record {
        /// Binding name.
        name: String,
        /// Command to run when the sequence matches. Stored on first
        /// record; later records for the same name add sequences only.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Remove all recorded sequences for a name (its script is kept).
    Delete {
        /// Binding name.
        name: String,
    },
    /// Match live sequences against the bindings and run commands.
    Run,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || handler_flag.set())
        .context("Failed to install Ctrl-C handler")?;

    match cli.command {
        Command::Scan { prefix } => {
            cmd_scan(prefix.as_deref().unwrap_or(config::DEFAULT_PREFIX))
        }
        Command::List => cmd_list(),
        Command::Monitor => cmd_monitor(&cancel),
        Command::Record { name, command } => cmd_record(&name, &command, &cancel),
        Command::Delete { name } => cmd_delete(&name),
        Command::Run => cmd_run(&cancel),
    }
}

fn cmd_scan(prefix: &str) -> Result<()> {
    let found = scan::scan(prefix)?;
    if !found.found_any() {
        bail!(
            "no matching mouse/kbd devices ({prefix} ...) found in {}; \
             try power-cycling the remote",
            scan::PROC_INPUT_DEVICES
        );
    }

    let mut cfg = Config::load()?;
    cfg.device.name_prefix = prefix.to_string();
    if let Some(vendor) = found.vendor {
        cfg.device.vendor = vendor;
    }
    if let Some(product) = found.product {
        cfg.device.product = product;
    }
    if let Some(kbd) = found.kbd {
        println!("Keyboard: {}", kbd.display());
        cfg.inputs.kbd = Some(kbd);
    }
    if let Some(mouse) = found.mouse {
        println!("Mouse: {}", mouse.display());
        cfg.inputs.mouse = Some(mouse);
    }

    cfg.save()?;
    println!("Saved to {}", Config::path()?.display());

    check_permissions(&cfg);
    Ok(())
}

fn cmd_list() -> Result<()> {
    let cfg = Config::load()?;

    println!(" Type   Status    Device Name");
    println!("------+---------+------------");
    for (kind, path) in cfg.inputs.iter() {
        let status = if !path.exists() {
            "absent"
        } else if config::readable(path) {
            "OK"
        } else {
            "no perm"
        };
        println!("{kind:<5} | {status:<7} | {}", path.display());
    }
    println!();

    println!(" Name    | Command");
    println!("---------+---------");
    for (name, argv) in &cfg.scripts {
        println!("{name:>8} | {}", shell_join(argv));
    }

    println!("\nConfig file: {}", Config::path()?.display());
    Ok(())
}

fn cmd_monitor(cancel: &CancelFlag) -> Result<()> {
    let cfg = Config::load()?;
    let Some(mut remote) = Remote::open(&cfg.inputs, cancel, None)? else {
        return Ok(());
    };

    println!("Monitoring... Ctrl+C to stop");
    let outcome = sequence::monitor_sequences(
        &mut remote,
        cfg.device.timeout_duration(),
        |seq| tracing::debug!("sequence closed with {} token(s)", seq.len()),
    )?;
    remote.close();

    if matches!(outcome, Capture::Disappeared) {
        println!("Device disappeared (BLE sleep)");
    }
    Ok(())
}

fn cmd_record(name: &str, command: &[String], cancel: &CancelFlag) -> Result<()> {
    let mut cfg = Config::load()?;

    if !command.is_empty() {
        cfg.scripts.insert(name.to_string(), command.to_vec());
    } else if !cfg.scripts.contains_key(name) {
        warn!("no script defined for '{name}'; set one with: blebind record {name} <command...>");
    }

    let Some(mut remote) = Remote::open(&cfg.inputs, cancel, None)? else {
        return Ok(());
    };
    println!("Waiting for button press...");

    let capture = sequence::capture_sequence(&mut remote, cfg.device.timeout_duration(), true)?;
    remote.close();

    let seq = match capture {
        Capture::Sequence(seq) => seq,
        Capture::Interrupted => {
            println!("Canceled; nothing recorded.");
            return Ok(());
        }
        Capture::Disappeared => bail!("device disappeared during recording; try again"),
    };

    cfg.bindings.insert(sequence::encode_key(&seq), name.to_string());
    cfg.save()?;

    println!("Recorded button {name}:");
    println!("    Sequence: {seq:?}");
    println!("   Seq count: {}", cfg.binding_count(name));
    if let Some(argv) = cfg.scripts.get(name) {
        println!("      Script: {}", shell_join(argv));
    }
    Ok(())
}

fn cmd_delete(name: &str) -> Result<()> {
    let mut cfg = Config::load()?;
    let before = cfg.bindings.len();
    cfg.bindings.retain(|_, bound| bound != name);
    cfg.save()?;
    println!("Removed {} binding(s) for '{name}'", before - cfg.bindings.len());
    Ok(())
}

fn cmd_run(cancel: &CancelFlag) -> Result<()> {
    let cfg = Config::load()?;
    check_permissions(&cfg);
    dispatch::run_loop(&cfg, cancel)
}

/// Print udev remediation help when configured devices exist but are
/// not readable. Returns readiness.
fn check_permissions(cfg: &Config) -> bool {
    let unreadable = cfg.inputs.unreadable();
    if unreadable.is_empty() {
        return true;
    }

    let paths: Vec<String> = unreadable
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    println!("\nERROR: Permission denied on {}\n", paths.join(" "));
    println!(
        "Fix this by adding the following udev rules as e.g. {}\n",
        scan::UDEV_RULE_FILE
    );
    println!("--------------------------------------------------");
    println!("{}", scan::udev_rules(&cfg.device.vendor, &cfg.device.product));
    println!("--------------------------------------------------\n");
    println!("Then run:{}", scan::UDEV_RELOAD_HELP);
    false
}

/// Shell-style preview of an argv for listings.
fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
