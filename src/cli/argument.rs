use clap::builder::styling::AnsiColor;
use clap::builder::{PossibleValue, Styles};
use clap::{Args, Parser, Subcommand};

fn get_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Green.on_default())
        .literal(AnsiColor::BrightGreen.on_default())
        .placeholder(AnsiColor::Cyan.on_default())
}

/// Collects public HTTP proxies and keeps a validated list of the live ones.
#[derive(Parser, Debug, Clone)]
#[command(version, styles = get_styles())]
pub struct Cli {
    /// Log level for application output.
    #[arg(
        long = "log",
        global = true,
        default_value = "off",
        value_parser([
            PossibleValue::new("debug"),
            PossibleValue::new("info"),
            PossibleValue::new("warn"),
            PossibleValue::new("error"),
            PossibleValue::new("trace"),
            PossibleValue::new("off"),
        ])
    )]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch the proxy lists once, validate them and print the live proxies.
    Validate {
        #[command(flatten)]
        validation: ValidationArgs,

        /// Output format for the results.
        #[arg(
            short,
            long,
            default_value = "text",
            value_parser([PossibleValue::new("text"), PossibleValue::new("json")])
        )]
        format: String,

        /// File path to save the approved proxies. Defaults to stdout.
        #[arg(short, long)]
        output_file: Option<std::path::PathBuf>,
    },
    /// Keep the validated list fresh and print every update as a JSON line.
    Watch {
        #[command(flatten)]
        validation: ValidationArgs,

        /// Seconds between two refresh cycles.
        #[arg(long, default_value = "300", value_parser = clap::value_parser!(u64).range(1..))]
        refresh_interval_secs: u64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ValidationArgs {
    /// URL every proxy must fetch through itself.
    #[arg(long, env = "VALIDATOR_TARGET_URL", default_value = "https://www.youtube.com/")]
    pub target_url: String,

    /// Per-probe timeout in milliseconds.
    #[arg(
        long,
        env = "VALIDATOR_TIMEOUT_MS",
        default_value = "7000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_ms: u64,

    /// Maximum number of concurrent probes.
    #[arg(
        short,
        long,
        env = "VALIDATOR_CONCURRENCY",
        default_value = "100",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub concurrency: u64,

    /// Validate at most this many proxies per pass. 0 means unlimited.
    #[arg(long, env = "VALIDATOR_MAX_PROXIES", default_value = "5000")]
    pub max_proxies: usize,

    /// Deadline of a whole pass in milliseconds. Derived from the refresh
    /// interval when omitted.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_duration_ms: Option<u64>,

    /// Number of rejected proxies kept as samples in the summary.
    #[arg(long, default_value = "25")]
    pub max_failure_samples: usize,

    /// Time budget for downloading the proxy lists, in milliseconds.
    #[arg(long, default_value = "15000", value_parser = clap::value_parser!(u64).range(1..))]
    pub fetch_timeout_ms: u64,
}
