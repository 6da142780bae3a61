//! FuriOS recovery - main entry point
//!
//! Thin CLI front end standing in for the recovery UI: it prompts for the
//! passphrase on stdin, drives the orchestrator, and prints each reported
//! outcome. Everything else lives in the library.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use furios_recovery::cli::{Cli, Commands};
use furios_recovery::orchestrator::{
    RecoveryEvent, RecoveryOrchestrator, RecoveryState, ResetOutcome,
};
use furios_recovery::probe::{self, DEFAULT_HEADER_READ};
use furios_recovery::unlock::Passphrase;
use furios_recovery::{DeviceLayout, PowerMonitor, RecoveryConfig};

/// Default config location in the recovery ramdisk.
const DEFAULT_CONFIG_PATH: &str = "/etc/furios-recovery.json";

fn init_logger(verbose: bool) {
    use env_logger::Builder;

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(level)
        .parse_default_env() // RUST_LOG overrides -v
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    info!("furios-recovery starting up");

    // Tear down child processes (helper, tar, dmsetup) on SIGINT/SIGTERM,
    // and again on any orderly exit path.
    if let Err(e) = furios_recovery::process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = furios_recovery::ProcessGuard::new();
    debug!("signal handlers initialized");

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Probe) => run_probe(),
        Some(Commands::Reset { yes, reboot }) => run_reset(&config, yes, reboot),
        Some(Commands::Validate { config }) => {
            match RecoveryConfig::load_from_file(&config) {
                Ok(_) => {
                    println!("configuration file is valid: {}", config.display());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => run_probe(),
    }
}

fn load_config(path: Option<&Path>) -> Result<RecoveryConfig> {
    match path {
        Some(path) => RecoveryConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                RecoveryConfig::load_from_file(&default)
                    .with_context(|| format!("loading config {}", default.display()))
            } else {
                Ok(RecoveryConfig::default())
            }
        }
    }
}

fn run_probe() -> Result<()> {
    let layout = DeviceLayout::default();
    let state = probe::probe(&layout, DEFAULT_HEADER_READ);
    println!("{}: {}", state.device_path.display(), state.classification);
    Ok(())
}

fn run_reset(config: &RecoveryConfig, yes: bool, reboot: bool) -> Result<()> {
    if !yes && !confirm("Factory reset device? This erases all user data.")? {
        println!("aborted");
        return Ok(());
    }

    let power = PowerMonitor::start(Duration::from_secs(config.power_poll_secs));
    let status = power.status();
    if let Some(percent) = status.battery_percent {
        info!(
            "battery at {}%, charger {}",
            percent,
            if status.charger_online { "online" } else { "offline" }
        );
    }

    let idle = arm_idle_watchdog(config.idle_timeout_secs);

    let mut orchestrator = RecoveryOrchestrator::new(DeviceLayout::default());
    orchestrator.set_reporter(|event| print_event(event));

    let mut state = orchestrator.start()?;
    let stdin = std::io::stdin();
    while state == RecoveryState::AwaitingPassphrase {
        let line = prompt_line(&stdin, "Passphrase: ")?;
        touch_activity(&idle);
        let passphrase = match Passphrase::new(line.into_bytes()) {
            Ok(pw) => pw,
            Err(e) => {
                // Rejected before any helper spawn; does not consume an
                // attempt.
                eprintln!("{}", e);
                continue;
            }
        };
        state = orchestrator.submit_passphrase(&passphrase)?;
    }

    let outcome = match state {
        RecoveryState::Done => ResetOutcome::Success,
        RecoveryState::LockedOut => ResetOutcome::LockedOut,
        RecoveryState::Failed(outcome) => outcome,
        other => anyhow::bail!("orchestrator stopped in non-terminal state {:?}", other),
    };

    if reboot {
        info!("rebooting");
        reboot_device()?;
    }

    if outcome != ResetOutcome::Success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_event(event: &RecoveryEvent) {
    match event {
        RecoveryEvent::DeviceProbed(class) => println!("device: {}", class),
        RecoveryEvent::PassphraseRequired {
            attempts_used,
            attempts_limit,
        } => println!(
            "password required for factory reset ({} of {} attempts used)",
            attempts_used, attempts_limit
        ),
        RecoveryEvent::WrongPassphrase {
            attempts_used,
            attempts_limit,
        } => println!(
            "wrong passphrase ({} of {} attempts used)",
            attempts_used, attempts_limit
        ),
        RecoveryEvent::Unlocked => println!("volume unlocked"),
        RecoveryEvent::InstallStarted => println!("resetting device..."),
        RecoveryEvent::Finished(outcome) => println!("{}", outcome),
    }
}

fn confirm(message: &str) -> Result<bool> {
    print!("{} [y/N] ", message);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn prompt_line(stdin: &std::io::Stdin, prompt: &str) -> Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    let n = stdin.lock().read_line(&mut line)?;
    if n == 0 {
        anyhow::bail!("stdin closed while awaiting passphrase");
    }
    // Strip the line terminator; the helper is told to strip newlines too,
    // so either behavior is safe.
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

type IdleClock = Option<std::sync::Arc<std::sync::Mutex<std::time::Instant>>>;

/// Power the device off after `timeout_secs` without user activity. 0
/// disables the watchdog. A recovery session left sitting on the
/// passphrase prompt should not keep the device powered indefinitely.
fn arm_idle_watchdog(timeout_secs: u64) -> IdleClock {
    if timeout_secs == 0 {
        return None;
    }
    let timeout = Duration::from_secs(timeout_secs);
    let last = std::sync::Arc::new(std::sync::Mutex::new(std::time::Instant::now()));
    let clock = last.clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(1));
        let idle = clock.lock().map(|t| t.elapsed()).unwrap_or_default();
        if idle > timeout {
            warn!("idle for {}s, powering off", idle.as_secs());
            nix::unistd::sync();
            let _ = nix::sys::reboot::reboot(nix::sys::reboot::RebootMode::RB_POWER_OFF);
        }
    });
    Some(last)
}

fn touch_activity(idle: &IdleClock) {
    if let Some(clock) = idle {
        if let Ok(mut t) = clock.lock() {
            *t = std::time::Instant::now();
        }
    }
}

fn reboot_device() -> Result<()> {
    nix::unistd::sync();
    nix::sys::reboot::reboot(nix::sys::reboot::RebootMode::RB_AUTOBOOT)
        .context("reboot(2) failed")?;
    Ok(())
}
