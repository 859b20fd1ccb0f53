use clap::{Parser, Subcommand, ValueEnum};

use crate::storage::CollectionMode;

#[derive(Parser)]
#[command(name = "twse-crawler")]
#[command(about = "Fetch TWSE daily trading history and store it in MongoDB")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file; built-in defaults apply when it is absent
    #[arg(short, long, default_value = "config.json")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Command {
    /// Crawl the full daily history of one security and store it
    Crawl {
        /// Security code, e.g. 2330
        stock_no: String,

        /// Target collection; defaults to stock_<code>
        #[arg(short, long)]
        collection: Option<String>,

        #[arg(long, value_enum, default_value = "timeseries")]
        mode: Mode,

        /// Store whatever was fetched when a run aborts part-way
        #[arg(long)]
        store_partial: bool,
    },

    /// Fetch the filtered listing table (common stocks and ETFs) and store it
    Listings {
        #[arg(short, long, default_value = "listings")]
        collection: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Mode {
    General,
    Timeseries,
}

impl From<Mode> for CollectionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::General => CollectionMode::General,
            Mode::Timeseries => CollectionMode::Timeseries,
        }
    }
}
