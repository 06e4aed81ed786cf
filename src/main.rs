use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sysmon_client::backend::{export, Collector, CommandClient, MetricsEngine, UnixTransport};
use sysmon_client::config::Config;
use sysmon_client::model::{SortColumn, SystemSnapshot};
use sysmon_client::util;

#[derive(Parser)]
#[command(name = "sysmon-client", version, about = "Console client for the SysMon backend")]
struct Cli {
    /// Backend socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Config file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print a summary every poll cycle
    Watch {
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Print one primed cycle and exit
        #[arg(long)]
        once: bool,
        #[arg(long)]
        json: bool,
        #[arg(long, default_value = "cpu")]
        sort: SortColumn,
        #[arg(long, default_value_t = 15)]
        top: usize,
    },
    /// Ask the backend to signal a process
    Kill {
        pid: i32,
        #[arg(short, long)]
        signal: Option<i32>,
    },
    /// Write one primed snapshot to disk
    Export {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        system_csv: Option<PathBuf>,
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("sysmon-client: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> sysmon_client::Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }

    let command = cli.command.unwrap_or(Cmd::Watch {
        interval_ms: None,
        once: false,
        json: false,
        sort: SortColumn::Cpu,
        top: 15,
    });

    match command {
        Cmd::Watch { interval_ms, once, json, sort, top } => {
            if let Some(ms) = interval_ms {
                config.refresh_interval_ms = ms;
            }
            config.validate()?;
            watch(&config, once, json, sort, top)
        }
        Cmd::Kill { pid, signal } => {
            let signal = signal.unwrap_or(config.kill_signal);
            let transport = Arc::new(UnixTransport::from_config(&config));
            let client = CommandClient::new(transport).protect_critical(config.protect_critical);
            match client.try_terminate(pid, signal) {
                Ok(()) => {
                    println!("Sent signal {} to process {}.", signal, pid);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("Failed to terminate process {}: {}", pid, e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Cmd::Export { csv, system_csv, json } => {
            let snapshot = primed_snapshot(&config);
            if let Some(reason) = &snapshot.failure {
                eprintln!("No data from backend: {}", reason);
                return Ok(ExitCode::FAILURE);
            }
            if let Some(path) = csv {
                export::export_processes_csv(&path, &snapshot.processes)?;
            }
            if let Some(path) = system_csv {
                export::export_system_csv(&path, &snapshot)?;
            }
            if let Some(path) = json {
                export::export_snapshot_json(&path, &snapshot)?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn watch(config: &Config, once: bool, json: bool, sort: SortColumn, top: usize) -> sysmon_client::Result<ExitCode> {
    if once {
        let mut snapshot = primed_snapshot(config);
        snapshot.sort_by(sort, false);
        print_snapshot(&snapshot, json, top)?;
        return Ok(if snapshot.is_ok() { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    let transport = Arc::new(UnixTransport::from_config(config));
    let engine = MetricsEngine::new(config.effective_core_count());
    let (collector, _handle, rx) = Collector::new(transport, engine, config.refresh_interval());
    collector.start()?;

    for mut snapshot in rx.iter() {
        snapshot.sort_by(sort, false);
        print_snapshot(&snapshot, json, top)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Two cycles half a second apart so CPU figures have a baseline.
fn primed_snapshot(config: &Config) -> SystemSnapshot {
    let transport = Arc::new(UnixTransport::from_config(config));
    let engine = MetricsEngine::new(config.effective_core_count());
    let (mut collector, _handle, _rx) = Collector::new(transport, engine, config.refresh_interval());

    let first = collector.poll_once();
    if !first.is_ok() {
        return first;
    }
    thread::sleep(Duration::from_millis(500));
    collector.poll_once()
}

fn print_snapshot(snapshot: &SystemSnapshot, json: bool, top: usize) -> sysmon_client::Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    if let Some(reason) = &snapshot.failure {
        println!("[cycle {}] backend unavailable: {}", snapshot.cycle, reason);
        if snapshot.processes.is_empty() {
            return Ok(());
        }
    }

    let s = &snapshot.system;
    println!(
        "[cycle {}{}] CPU {}  Mem {} / {} ({})  Swap {} / {}  Net down {} up {}  Disk {} / {}  Processes {}",
        snapshot.cycle,
        if snapshot.stale { ", stale" } else { "" },
        util::format_percent(s.cpu.usage_percent),
        s.memory.used_display,
        s.memory.total_display,
        util::format_percent(s.memory.used_percent),
        s.swap.used_display,
        s.swap.total_display,
        s.network.down_display,
        s.network.up_display,
        s.disk.used_display,
        s.disk.total_display,
        snapshot.process_count,
    );
    println!("{:>7} {:>7} {:<12} {:<3} {:>7} {:>7} {:>10}  COMMAND", "PID", "PPID", "USER", "S", "CPU%", "MEM%", "RSS");
    for p in snapshot.processes.iter().take(top) {
        println!(
            "{:>7} {:>7} {:<12} {:<3} {:>7.1} {:>7.1} {:>10}  {}",
            p.pid, p.ppid, p.user, p.state, p.cpu_percent, p.memory_percent, p.memory_display, p.command
        );
    }
    println!();
    Ok(())
}
