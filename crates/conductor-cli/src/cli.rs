use clap::{Parser, Subcommand, ValueEnum};
use conductor_config::ColorMode;
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Log level options for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No diagnostic output
    Off,
    /// Error messages only
    Error,
    /// Warnings and errors (default)
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace-level messages (most verbose)
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Color policy for human-readable output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorArg {
    Auto,
    Always,
    Never,
}

impl From<ColorArg> for ColorMode {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => ColorMode::Auto,
            ColorArg::Always => ColorMode::Always,
            ColorArg::Never => ColorMode::Never,
        }
    }
}

#[derive(Parser)]
#[command(name = "cond")]
#[command(about = "cond - conductor command runner with pressure-adaptive logging")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Diagnostic log level on stderr (off, error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Shortcut for --log-level=debug
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (defaults to ~/.config/conductor/config.toml)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Root directory for session logs (overrides config and environment)
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Color policy for human-readable lines
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorArg>,
}

impl Cli {
    /// Effective diagnostic level
    pub fn level_filter(&self) -> LevelFilter {
        match (self.log_level, self.verbose) {
            (Some(level), _) => level.into(),
            (None, true) => LevelFilter::DEBUG,
            (None, false) => LevelFilter::WARN,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command invocation with progress and a session log
    Run {
        /// Command name; becomes the session directory
        command: String,

        /// Number of steps to report
        #[arg(long, default_value_t = 5)]
        steps: u64,

        /// Delay between steps in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,

        /// Session id (generated when omitted)
        #[arg(long)]
        session: Option<String>,
    },

    /// Inspect persisted session logs
    #[command(subcommand)]
    Sessions(SessionCommands),

    /// Take one memory pressure sample and show the tier it maps to
    Probe {
        /// Output format (text, json)
        #[arg(short = 'f', long, default_value = "text")]
        format: String,
    },

    /// Serve JSON-RPC on stdin/stdout; diagnostics go to stderr
    Serve,
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// List sessions, newest first
    List {
        /// Only sessions of this command
        #[arg(long)]
        command: Option<String>,

        /// Output format (table, json)
        #[arg(short = 'f', long, default_value = "table")]
        format: String,
    },

    /// Print the records of one session
    Show {
        /// Command the session belongs to
        command: String,

        /// Session id
        id: String,

        /// Print stored lines verbatim
        #[arg(long)]
        raw: bool,
    },
}
