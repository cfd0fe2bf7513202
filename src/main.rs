mod capture;
mod config;
mod error;
mod features;
mod ui;

use clap::{ArgAction, Parser};
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::process::ExitCode;
use capture::core::SessionTable;
use config::Config;
use error::{ConfigError, Error};
use features::FeatureExtractor;
use ui::output;

/// netlyzer reconstructs EtherCAT and Z-Wave sessions and turns them into feature datasets
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file
    #[arg(short = 'c', long, default_value = "./config.json", value_parser)]
    config: PathBuf,

    /// pcap/pcapng capture or Z-Wave sniffer CSV log, overrides `input_file_address`
    #[arg(short = 'f', long, value_parser)]
    file: Option<PathBuf>,

    /// Directory for output files, overrides `output_file_path`
    #[arg(short = 'o', long, value_parser)]
    output_dir: Option<PathBuf>,

    /// Output feature rows as formatted JSON instead of CSV
    #[arg(short = 'j', long, action = ArgAction::SetTrue)]
    json: bool,

    /// Log per-session and per-record diagnostics
    #[arg(short = 'v', long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if let Err(e) = SimpleLogger::new().with_level(level).env().init() {
        eprintln!("Could not initialise logging: {e}");
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Error> {
    let mut config = Config::load(&args.config)?;
    if let Some(file) = args.file {
        config.input_file_address = Some(file);
    }
    if let Some(out_dir) = args.output_dir.as_ref() {
        log::info!("Output directory {}", out_dir.display());
        config.output_file_path = out_dir.clone();
    }
    let input = config.input_file_address.clone().ok_or(ConfigError::MissingInput)?;

    log::info!("Analyzing {}...", input.display());
    let source = capture::utils::load_file(&input, &config)?;
    let mut table = SessionTable::new(&config);
    let stats = table.capture(source);
    let rows = FeatureExtractor::new(&config).execute(table.finished());

    // ---- Output ----
    if args.json {
        let json = output::data_as_json(&rows)?;
        if args.output_dir.is_some() {
            std::fs::create_dir_all(&config.output_file_path).map_err(error::OutputError::from)?;
            output::data_to_file(json, &config.output_file_path.join("sessions.json"))?;
        } else {
            println!("{json}");
        }
    } else {
        output::write_csv(&rows, &config.output_file_path, config.max_rows_number)?;
        output::print_results(&stats, &rows);
    }

    log::info!("Results are ready!");
    Ok(())
}
