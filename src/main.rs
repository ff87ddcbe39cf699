//! vialctl command-line entry point

use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use vial_transport::DeviceFilter;

use vialctl::cli::{Cli, DeviceArgs};
use vialctl::config::Config;
use vialctl::{Context, HidSource, Output};

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Command-line device flags override the config file one by one
fn device_selection(args: &DeviceArgs, config: &Config) -> (DeviceFilter, Option<i32>) {
    let base = config.device_filter();
    let filter = DeviceFilter {
        vid: args.vid.or(base.vid),
        pid: args.pid.or(base.pid),
        path: args.path.clone().or(base.path),
        serial: args.serial.clone().or(base.serial),
    };
    (filter, args.timeout_ms.or(config.device.timeout_ms))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    let (filter, timeout_ms) = device_selection(&cli.device, &config);
    debug!("Device filter: {filter:?}");
    let format = cli.format.or(config.output.format).unwrap_or_default();
    let schema = config.settings_schema()?;

    let mut ctx = Context::new(
        Box::new(HidSource::new(filter, timeout_ms)),
        schema,
        Output::new(format, cli.output_file.clone()),
    );
    vialctl::run(&mut ctx, cli.command)?;
    ctx.out.flush()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            #[cfg(debug_assertions)]
            debug!("{e:?}");
            ExitCode::FAILURE
        }
    }
}
