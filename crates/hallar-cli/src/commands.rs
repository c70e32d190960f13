//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use hallar::{ClickKind, FallbackAnchor, Strategy};

/// Hallador: locate GUI elements by reference image, text or VLM query
#[derive(Parser, Debug)]
#[command(name = "hallador")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Locate an element and optionally click it
    Locate(LocateArgs),

    /// Check that an element is on screen, without clicking or falling back
    Verify(VerifyArgs),

    /// Inspect or reset a statistics file
    Stats(StatsArgs),

    /// Evaluate the fallback admission policy against a statistics file
    Health(HealthArgs),

    /// Configuration helpers
    Config(ConfigArgs),
}

/// Options shared by commands that drive a session
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Configuration file (YAML)
    #[arg(short, long, env = "HALLAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Replay against a screenshot instead of the live desktop
    #[arg(long, value_name = "PNG")]
    pub screenshot: Option<PathBuf>,

    /// Statistics file to load, update and save
    #[arg(long, value_name = "JSON")]
    pub stats: Option<PathBuf>,

    /// Directory for annotated screenshot evidence
    #[arg(long, value_name = "DIR")]
    pub evidence: Option<PathBuf>,
}

/// What to look for
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Reference image id under the asset root
    #[arg(long)]
    pub asset: Option<String>,

    /// Text on the element, or a description for the VLM
    #[arg(long)]
    pub label: Option<String>,

    /// Fallback ratio coordinate, e.g. 0.5,0.9
    #[arg(long, value_name = "X,Y", value_parser = parse_ratio_pair, allow_hyphen_values = true)]
    pub fallback: Option<(f64, f64)>,

    /// What the fallback ratio is measured from
    #[arg(long, default_value = "window")]
    pub anchor: AnchorArg,

    /// Backend priority preset (defaults to the configured one)
    #[arg(long)]
    pub strategy: Option<StrategyArg>,

    /// Overall time budget in milliseconds (defaults to the configured one)
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Search this screen rectangle instead of the whole window
    #[arg(long, value_name = "LEFT,TOP,WIDTH,HEIGHT", value_parser = parse_region, allow_hyphen_values = true)]
    pub region: Option<(i32, i32, i64, i64)>,

    /// Template confidence threshold for this request
    #[arg(long)]
    pub confidence: Option<f64>,
}

/// Arguments for the locate command
#[derive(Parser, Debug)]
pub struct LocateArgs {
    /// Element to find
    #[command(flatten)]
    pub target: TargetArgs,

    /// Session options
    #[command(flatten)]
    pub session: SessionArgs,

    /// Pointer action once found
    #[arg(long)]
    pub click: Option<ClickArg>,

    /// Pixel offset applied to the click point, e.g. 10,-4
    #[arg(long, value_name = "DX,DY", value_parser = parse_offset, allow_hyphen_values = true)]
    pub offset: Option<(i32, i32)>,

    /// Log pointer events instead of sending them
    #[arg(long)]
    pub dry_run: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the verify command
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Element to find
    #[command(flatten)]
    pub target: TargetArgs,

    /// Session options
    #[command(flatten)]
    pub session: SessionArgs,

    /// Fail with a descriptive error when the element is absent
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for the stats command
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Stats subcommand
    #[command(subcommand)]
    pub command: StatsSubcommand,
}

/// Stats subcommands
#[derive(Subcommand, Debug)]
pub enum StatsSubcommand {
    /// Print counters
    Show {
        /// Statistics file
        file: PathBuf,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Zero every counter
    Reset {
        /// Statistics file
        file: PathBuf,
    },
}

/// Arguments for the health command
#[derive(Parser, Debug)]
pub struct HealthArgs {
    /// Statistics file
    pub file: PathBuf,

    /// Configuration file supplying the admission policy
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Consecutive fallback resolutions that fail the run
    #[arg(long)]
    pub max_consecutive: Option<u64>,

    /// Fallback/request ratio above which the run fails
    #[arg(long)]
    pub max_ratio: Option<f64>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Print a default configuration
    Init {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration (file plus environment overrides)
    Show {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Fallback anchor argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AnchorArg {
    /// Window top-left
    #[default]
    Window,
    /// Window bottom edge
    Bottom,
    /// Previous click
    LastClick,
}

impl From<AnchorArg> for FallbackAnchor {
    fn from(arg: AnchorArg) -> Self {
        match arg {
            AnchorArg::Window => Self::Window,
            AnchorArg::Bottom => Self::WindowBottom,
            AnchorArg::LastClick => Self::LastClick,
        }
    }
}

/// Strategy argument
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyArg {
    /// VLM, OCR, template, legacy template
    TextFirst,
    /// Template, legacy template, VLM, OCR
    ImageFirst,
    /// One text backend when a label is given, then templates
    Default,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::TextFirst => Self::TextFirst,
            StrategyArg::ImageFirst => Self::ImageFirst,
            StrategyArg::Default => Self::Default,
        }
    }
}

/// Click argument
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClickArg {
    /// Left click
    Single,
    /// Left double click
    Double,
    /// Right click
    Right,
}

impl From<ClickArg> for ClickKind {
    fn from(arg: ClickArg) -> Self {
        match arg {
            ClickArg::Single => Self::Single,
            ClickArg::Double => Self::Double,
            ClickArg::Right => Self::Right,
        }
    }
}

fn split_numbers<T: std::str::FromStr>(value: &str, expected: usize) -> Result<Vec<T>, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != expected {
        return Err(format!(
            "expected {expected} comma-separated numbers, got '{value}'"
        ));
    }
    parts
        .into_iter()
        .map(|p| p.parse::<T>().map_err(|_| format!("'{p}' is not a number")))
        .collect()
}

/// Parse `X,Y` ratios
pub fn parse_ratio_pair(value: &str) -> Result<(f64, f64), String> {
    let numbers = split_numbers::<f64>(value, 2)?;
    Ok((numbers[0], numbers[1]))
}

/// Parse `DX,DY` pixel offsets
pub fn parse_offset(value: &str) -> Result<(i32, i32), String> {
    let numbers = split_numbers::<i32>(value, 2)?;
    Ok((numbers[0], numbers[1]))
}

/// Parse `LEFT,TOP,WIDTH,HEIGHT`
pub fn parse_region(value: &str) -> Result<(i32, i32, i64, i64), String> {
    let numbers = split_numbers::<i64>(value, 4)?;
    let left = i32::try_from(numbers[0]).map_err(|_| "left out of range".to_string())?;
    let top = i32::try_from(numbers[1]).map_err(|_| "top out of range".to_string())?;
    Ok((left, top, numbers[2], numbers[3]))
}
