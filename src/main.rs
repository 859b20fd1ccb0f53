use clap::Parser;

use twse_crawler::app;
use twse_crawler::cli::Cli;
use twse_crawler::Result;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    app::run(cli).await
}
