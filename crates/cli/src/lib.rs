use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "confluence")]
#[command(about = "Options analytics and confluence scalping engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run ingestion, analytics, the scalpers and alerts until Ctrl+C
    Start {
        /// Path to the configuration file
        #[arg(short, long, default_value = "master_config/master_config.yaml")]
        config: PathBuf,
    },

    /// Validate configuration without starting the engine
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "master_config/master_config.yaml")]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "master_config.yaml")]
        output: PathBuf,
    },

    /// Price one option and print its Greeks
    Greeks {
        /// Underlying price
        #[arg(long)]
        spot: f64,

        #[arg(long)]
        strike: f64,

        /// Calendar days to expiry
        #[arg(long)]
        days: f64,

        /// Annualized volatility as a decimal (0.15 = 15%)
        #[arg(long, default_value_t = 0.20)]
        vol: f64,

        /// Risk-free rate as a decimal
        #[arg(long, default_value_t = 0.10)]
        rate: f64,

        #[arg(long = "type", value_enum, default_value = "call")]
        option_type: OptionKind,

        /// Market price; when given, implied volatility is solved from it
        #[arg(long)]
        price: Option<f64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKind::Call => "call",
            OptionKind::Put => "put",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
