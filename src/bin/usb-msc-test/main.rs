//! Command line tool running read/write/verify tests on a USB mass storage block device.
//!
//! Example:
//!
//! ```text
//! usb-msc-test --output /dev/sdb --test sg-random-both --size 64k --count 1000
//! ```

use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
    process::ExitCode,
};

use usb_msc_test::{
    config::parse_size, parse_test, target::ensure_unmounted, BlockDevice, BoundaryPolicy, Catalog, Config, Context,
    Error, Fill, OpenFlags, Result,
};

/// Read, write and verify data on a USB mass storage block device.
///
/// All data on the device is overwritten.
#[derive(Parser, Debug)]
#[command(name = "usb-msc-test", version, about)]
struct Args {
    /// Block device to test
    #[arg(short, long, value_name = "DEVICE", required_unless_present_any = ["list", "completions", "config"])]
    output: Option<PathBuf>,

    /// Test to run, by number or name (see --list)
    #[arg(short, long, value_parser = parse_test)]
    test: Option<u32>,

    /// Buffer size in bytes, with optional k, M or G suffix
    #[arg(short, long, value_parser = parse_size)]
    size: Option<usize>,

    /// Number of iterations
    #[arg(short, long)]
    count: Option<u32>,

    /// Pattern index for the pattern test (0 to 15)
    #[arg(short, long)]
    pattern: Option<usize>,

    /// Enable debug logging and disable progress lines
    #[arg(short, long)]
    debug: bool,

    /// Open the device with O_DSYNC
    #[arg(short = 'n', long)]
    dsync: bool,

    /// Do not bypass the page cache
    #[arg(long)]
    buffered: bool,

    /// Initial byte of the transmit buffer, decimal or 0x-prefixed hex
    #[arg(long, value_parser = parse_byte)]
    fill: Option<u8>,

    /// Fill the transmit buffer with a pseudo-random sequence from this seed
    #[arg(long, conflicts_with = "fill")]
    seed: Option<u64>,

    /// Fail boundary tests if any data is returned past the last sector
    #[arg(long)]
    strict_boundary: bool,

    /// Test the device even if it is mounted
    #[arg(long)]
    force: bool,

    /// List available tests and exit
    #[arg(long)]
    list: bool,

    /// TOML file with default settings, overridden by command line options
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print shell completions and exit
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,
}

/// Number or name in a configuration file.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Value<T> {
    Number(T),
    Text(String),
}

/// Settings from a configuration file.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FileConfig {
    output: Option<PathBuf>,
    test: Option<Value<u32>>,
    size: Option<Value<usize>>,
    count: Option<u32>,
    pattern: Option<usize>,
    dsync: Option<bool>,
    buffered: Option<bool>,
    fill: Option<Fill>,
    boundary: Option<BoundaryPolicy>,
    force: Option<bool>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::Open { path: path.to_path_buf(), source })?;
        toml::from_str(&content)
            .map_err(|err| Error::InvalidConfig(format!("cannot parse {}: {err}", path.display())))
    }
}

fn parse_byte(value: &str) -> std::result::Result<u8, String> {
    let res = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    };
    res.map_err(|err| format!("invalid byte '{value}': {err}"))
}

/// Merges file settings and command line options into the test configuration.
///
/// Returns the configuration and whether mounted devices may be tested.
fn configure(args: &Args, file: FileConfig) -> Result<(Config, bool)> {
    let device = args
        .output
        .clone()
        .or(file.output)
        .ok_or_else(|| Error::InvalidConfig("no device given".into()))?;
    let mut config = Config::new(device);

    if let Some(test) = args.test {
        config.test = test;
    } else if let Some(test) = file.test {
        config.test = match test {
            Value::Number(number) => number,
            Value::Text(name) => parse_test(&name)?,
        };
    }

    if let Some(size) = args.size {
        config.size = size;
    } else if let Some(size) = file.size {
        config.size = match size {
            Value::Number(size) => size,
            Value::Text(size) => parse_size(&size)?,
        };
    }

    if let Some(count) = args.count.or(file.count) {
        config.count = count;
    }
    if let Some(pattern) = args.pattern.or(file.pattern) {
        config.pattern = pattern;
    }

    if args.buffered || file.buffered.unwrap_or_default() {
        config.flags.remove(OpenFlags::DIRECT);
    }
    if args.dsync || file.dsync.unwrap_or_default() {
        config.flags.insert(OpenFlags::DSYNC);
    }

    config.fill = match (args.fill, args.seed) {
        (Some(value), _) => Fill::Constant(value),
        (None, Some(seed)) => Fill::Random { seed },
        (None, None) => file.fill.unwrap_or_default(),
    };

    config.boundary = if args.strict_boundary { BoundaryPolicy::Strict } else { file.boundary.unwrap_or_default() };
    config.progress = !args.debug;

    config.validate()?;
    Ok((config, args.force || file.force.unwrap_or_default()))
}

fn list() {
    for entry in Catalog::standard().iter() {
        let id = entry.id();
        println!("{:2}  {:<16} {}", id.number(), id.to_string(), id.description());
    }
}

fn run(args: Args) -> Result<()> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let (config, force) = configure(&args, file)?;
    log::debug!("configuration: {config:?}");

    if !force {
        ensure_unmounted(&config.device)?;
    }

    let device = BlockDevice::open(&config.device, config.flags)?;
    let mut ctx = Context::new(device, &config)?;
    ctx.sync()?;

    Catalog::standard().run(&mut ctx, config.test)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.debug { log::LevelFilter::Debug } else { log::LevelFilter::Warn };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    if let Some(shell) = args.completions {
        clap_complete::generate(shell, &mut Args::command(), "usb-msc-test", &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    if args.list {
        list();
        return ExitCode::SUCCESS;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("usb-msc-test: {err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}
