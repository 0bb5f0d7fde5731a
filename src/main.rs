//! DaxGen CLI Entry Point
//!
//! Provides the command-line interface for workflow generation.
//!
//! # Usage
//!
//! ```bash
//! # Generate the full data release workflow
//! daxgen drp -i inputData.yaml -o drp.dax
//!
//! # Single-frame processing only
//! daxgen sfm -i inputData.yaml -o sfm.dax
//!
//! # Take the exposure-to-patch mapping from a registry database
//! daxgen coadd -i inputData.yaml --registry sky.sqlite3 -o coadd.dax
//!
//! # Exclude flagged ccds and override the tract
//! daxgen drp -i inputData.yaml --blacklist bad_ccds.txt --tract 9813
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use daxgen::config::{load_blacklist, InputData, PatchRegistry};
use daxgen::dax::write_dax_file;
use daxgen::pipeline::{generate, Pipeline};
use daxgen::{APP_NAME, VERSION};

/// Default input data file used when none is specified.
const DEFAULT_INPUT_DATA: &str = "inputData.yaml";

/// Default output DAX file.
const DEFAULT_OUTPUT_FILE: &str = "workflow.dax";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    pipeline: Option<Pipeline>,
    input_data: PathBuf,
    output_file: PathBuf,
    registry: Option<PathBuf>,
    blacklist: Option<PathBuf>,
    tract: Option<i64>,
    name: Option<String>,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: None,
            input_data: PathBuf::from(DEFAULT_INPUT_DATA),
            output_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
            registry: None,
            blacklist: None,
            tract: None,
            name: None,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Abstract Workflow Generator");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: daxgen [OPTIONS] <PIPELINE>");
    println!();
    println!("Arguments:");
    println!("  <PIPELINE>          Pipeline to generate: sfm, coadd or drp");
    println!();
    println!("Options:");
    println!("  -i, --input-data PATH   Input data file (default: {})", DEFAULT_INPUT_DATA);
    println!("  -o, --output-file PATH  Output DAX file (default: {})", DEFAULT_OUTPUT_FILE);
    println!("  --registry PATH         SQLite exposure-to-patch registry");
    println!("  --blacklist PATH        File of 'visit ccd' pairs to exclude");
    println!("  --tract N               Override the tract id of the input data");
    println!("  --name NAME             Override the workflow name");
    println!("  -v, --verbose           Enable debug logging");
    println!("  -h, --help              Show this help message");
    println!("  -V, --version           Show version information");
    println!();
    println!("Examples:");
    println!("  daxgen drp -i inputData.yaml -o drp.dax");
    println!("  daxgen coadd -i inputData.yaml --registry sky.sqlite3");
    println!("  daxgen sfm -i rc.yaml --blacklist bad_ccds.txt --tract 9813");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--input-data" | "-i" => {
                i += 1;
                if i >= args.len() {
                    return Err("--input-data requires a path argument".to_string());
                }
                config.input_data = PathBuf::from(&args[i]);
            }
            "--output-file" | "-o" => {
                i += 1;
                if i >= args.len() {
                    return Err("--output-file requires a path argument".to_string());
                }
                config.output_file = PathBuf::from(&args[i]);
            }
            "--registry" => {
                i += 1;
                if i >= args.len() {
                    return Err("--registry requires a path argument".to_string());
                }
                config.registry = Some(PathBuf::from(&args[i]));
            }
            "--blacklist" => {
                i += 1;
                if i >= args.len() {
                    return Err("--blacklist requires a path argument".to_string());
                }
                config.blacklist = Some(PathBuf::from(&args[i]));
            }
            "--tract" => {
                i += 1;
                if i >= args.len() {
                    return Err("--tract requires a number argument".to_string());
                }
                config.tract = Some(
                    args[i]
                        .parse()
                        .map_err(|_| format!("Invalid tract value: {}", args[i]))?,
                );
            }
            "--name" => {
                i += 1;
                if i >= args.len() {
                    return Err("--name requires a value".to_string());
                }
                config.name = Some(args[i].clone());
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.pipeline.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.pipeline = Some(arg.parse()?);
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    let Some(pipeline) = config.pipeline else {
        print_usage();
        return Err("missing pipeline argument".into());
    };

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    // Load input data
    info!("Loading input data: {}", config.input_data.display());
    let mut input = InputData::load(&config.input_data).map_err(|e| {
        error!("Failed to load input data: {}", e);
        format!(
            "Could not load input data from '{}': {}",
            config.input_data.display(),
            e
        )
    })?;

    if let Some(tract) = config.tract {
        info!("Overriding tract: {}", tract);
        input.tract = tract;
    }

    if let Some(name) = config.name {
        input.name = name;
    }

    // Exclude blacklisted ccds before anything else sees the tables
    if let Some(path) = &config.blacklist {
        let blacklist = load_blacklist(path)?;
        let removed = input.apply_blacklist(&blacklist);
        info!("Blacklist excluded {} ccds", removed);
        input.validate()?;
    }

    // A registry database replaces the YAML sky map
    if let Some(path) = &config.registry {
        let registry = PatchRegistry::open(path)?;
        let sky_map = registry.sky_map(&input, input.tract)?;
        input.set_sky_map(sky_map);
    }

    // Generate and serialize the workflow
    let dax = generate(&input, pipeline)?;
    write_dax_file(&dax, &config.output_file)?;

    println!(
        "{} {} ({} jobs, {} files)",
        "Wrote".green().bold(),
        config.output_file.display(),
        dax.job_count(),
        dax.file_count()
    );

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
