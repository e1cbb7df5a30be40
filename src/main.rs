use adq_daq::*;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, TermLogger, TerminalMode, WriteLogger};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Parser, Debug)]
#[command(version, about = "Multi-record acquisition with SP Devices ADQ digitizers")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Run against a simulated control unit instead of the ADQAPI library
    #[arg(long)]
    simulate: bool,
    /// Override the number of units to use
    #[arg(short, long)]
    units: Option<u32>,
    /// Do not plot the acquired records
    #[arg(long)]
    no_plot: bool,
    /// Log file, defaults to a timestamped file in the output directory
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Enumerate units and print their details
    List,
    /// Configure, arm, wait for and transfer one multi-record acquisition
    Acquire,
    /// Timestamp-synchronized snapshots across all units
    Sync,
}

const SIM_CHANNELS: u32 = 2;
const SIM_BYTES_PER_SAMPLE: u32 = 2;

fn log_file_name(output_dir: &str) -> PathBuf {
    let now = time::OffsetDateTime::now_utc();
    PathBuf::from(output_dir).join(format!(
        "adq_daq_{:04}{:02}{:02}_{:02}{:02}{:02}.log",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    ))
}

fn init_logging(path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            simplelog::Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Debug, simplelog::Config::default(), file),
    ])?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Conf::from_path(cli.config.as_deref())?;
    if let Some(units) = cli.units {
        config.run_settings.units = units;
    }
    if cli.no_plot {
        config.run_settings.plot = false;
    }
    if let Command::Sync = cli.command {
        config.sync_settings.timestamp_sync = true;
        config.acquisition.with_timestamps = true;
    }

    std::fs::create_dir_all(&config.run_settings.output_dir)?;
    let log_path = cli
        .log_file
        .clone()
        .unwrap_or_else(|| log_file_name(&config.run_settings.output_dir));
    init_logging(&log_path)?;

    let res = if cli.simulate {
        info!("Using simulated control unit");
        let mut cu = SimulatedControlUnit::new(
            config.run_settings.units,
            SIM_CHANNELS,
            SIM_BYTES_PER_SAMPLE,
        );
        run(&mut cu, cli.command, &config)
    } else {
        let api = AdqApi::load(config.library_path())?;
        info!("ADQAPI loaded from {}, revision {}", api.path, api.revision());
        let mut cu = AdqControlUnit::create(Arc::new(api))?;
        run(&mut cu, cli.command, &config)
    };

    if let Err(ref e) = res {
        error!("{e:#}");
        error!(
            "An error occurred, see the trace logs in {} for more information",
            config.run_settings.trace_dir
        );
    }
    res
}

fn run<C: ControlUnit>(cu: &mut C, command: Command, config: &Conf) -> Result<()> {
    match command {
        Command::List => {
            cu.enable_error_trace(
                config.run_settings.trace_level,
                &config.run_settings.trace_dir,
            )?;
            let found = cu.find_devices();
            info!("Number of ADQ devices found: {found}");
            info!("Number of failed ADQ devices: {}", cu.failed_device_count());
            if found == 0 {
                info!("No ADQ connected.");
            }
            for info in unit_info::log_all(&*cu, found)? {
                println!("{}\n", info.report());
            }
            Ok(())
        }
        Command::Acquire => {
            let units = open_units(cu, config)?;
            let infos = unit_info::log_all(&*cu, units)?;
            let captures = run_acquisition(cu, units, config)?;
            save(&captures, &infos, config)?;
            if config.run_settings.plot {
                plot::show(
                    &captures,
                    config.run_settings.plot_channel,
                    config.run_settings.plot_length,
                )?;
            }
            info!("Done");
            Ok(())
        }
        Command::Sync => {
            let units = open_units(cu, config)?;
            let infos = unit_info::log_all(&*cu, units)?;
            let mut sink = CaptureSink::new(&infos, config, config.acquisition.snapshots)?;
            let mut last = Vec::new();
            run_snapshots(cu, units, config, |capture| {
                for record in 0..capture.records.records() {
                    info!(
                        "ADQ #{} snapshot {} record {} timestamp {:?}",
                        capture.unit,
                        capture.snapshot,
                        record,
                        capture.records.timestamp(record)
                    );
                }
                sink.write(&capture)?;
                if capture.snapshot + 1 == config.acquisition.snapshots {
                    last.push(capture);
                }
                Ok(())
            })?;
            sink.finish()?;
            if config.run_settings.plot {
                plot::show(
                    &last,
                    config.run_settings.plot_channel,
                    config.run_settings.plot_length,
                )?;
            }
            info!("Done");
            Ok(())
        }
    }
}

fn save(captures: &[UnitCapture], infos: &[UnitInfo], config: &Conf) -> Result<()> {
    let mut sink = CaptureSink::new(infos, config, 1)?;
    for capture in captures {
        sink.write(capture)?;
    }
    sink.finish()?;
    if config.run_settings.output_format != OutputFormat::None {
        info!("All records were saved to file");
    }
    Ok(())
}
