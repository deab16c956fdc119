use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use futures::channel::mpsc::unbounded;
use futures::StreamExt;
use log::{error, info, LevelFilter};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::io::ConfigIO;
use crate::console::{format_update, parse_command, ConsoleCommand, HELP};
use crate::device::btle::BtleRadio;
use crate::device::status::StatusPublisher;
use crate::device::unit::{spawn_unit, ScaleHandle, ScaleUnit};
use crate::error::AppRunError;
use crate::sink::{EventSink, JsonLinesSink};

pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod sink;

/// Keeps up to three bluetooth water scales connected and prints their measurements.
#[derive(Parser, Debug)]
#[command(name = "scale-link", version)]
pub struct Cli {
    /// Config file to use instead of the default scale-link.json
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level: off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,

    /// Append measurements as JSON lines to this file instead of stdout
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Do not start scanning until asked to
    #[arg(long)]
    pub no_auto_start: bool,
}

pub fn init_logging(level: LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub fn run(cli: Cli) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_async(cli))
}

fn open_sink(events: Option<PathBuf>) -> Result<Arc<dyn EventSink>, AppRunError> {
    Ok(match events {
        Some(path) => {
            info!("Writing measurements to {}", path.to_string_lossy());
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Arc::new(JsonLinesSink::new(file))
        },
        None => Arc::new(JsonLinesSink::new(std::io::stdout())),
    })
}

fn for_scales(handles: &[ScaleHandle], index: Option<usize>, f: impl Fn(&ScaleHandle)) {
    match index {
        Some(index) => handles.iter().filter(|h| h.index() == index).for_each(f),
        None => handles.iter().for_each(f),
    }
}

async fn run_async(cli: Cli) -> Result<(), AppRunError> {
    let config_io = ConfigIO::open(cli.config)?;
    let mut locker = config_io.locker()?;
    let _guard = locker.lock()?;

    let config = config_io.load_or_init().await?;
    let mut settings = config.unit_settings();
    if cli.no_auto_start {
        settings.auto_start = false;
    }

    let sink = open_sink(cli.events)?;
    let radio = BtleRadio::new().await?;

    let (update_tx, mut updates) = unbounded();
    let units: Vec<ScaleUnit> = config.identities()
        .into_iter()
        .map(|identity| {
            let status = StatusPublisher::new(identity.index);
            status.register_sender(update_tx.clone());
            spawn_unit(radio.clone(), identity, settings, sink.clone(), status)
        })
        .collect();
    drop(update_tx);

    let handles: Vec<ScaleHandle> = units.iter().map(ScaleUnit::handle).collect();
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    'mainloop: loop {
        tokio::select! {
            Some(update) = updates.next() => {
                println!("{}", format_update(&update));
            },
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break 'mainloop,
                    Err(err) => {
                        error!("Failed to read from stdin: {}", err);
                        break 'mainloop;
                    },
                };

                match parse_command(&line, handles.len()) {
                    Ok(ConsoleCommand::Scan(index)) => for_scales(&handles, index, ScaleHandle::start_discovery),
                    Ok(ConsoleCommand::Stop(index)) => for_scales(&handles, index, ScaleHandle::stop_discovery),
                    Ok(ConsoleCommand::Remind(index)) => for_scales(&handles, Some(index), ScaleHandle::send_reminder),
                    Ok(ConsoleCommand::Status) => {
                        for handle in &handles {
                            let report = handle.status();
                            println!("Scale {} ({}): {}", report.index + 1, handle.name(), report.status);
                        }
                    },
                    Ok(ConsoleCommand::Help) => println!("{}", HELP),
                    Ok(ConsoleCommand::Quit) => break 'mainloop,
                    Err(err) => println!("{}", err),
                }
            },
            _ = tokio::signal::ctrl_c() => break 'mainloop,
        }
    }

    info!("Shutting down");
    for unit in units {
        unit.shutdown().await;
    }

    Ok(())
}
