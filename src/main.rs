//! Taskhive CLI entry point.

use clap::Parser;

use taskhive::cli::{handle_error, Cli, Commands};
use taskhive::infrastructure::config::ConfigLoader;
use taskhive::infrastructure::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    if let Err(err) = logging::init(&config.logging) {
        handle_error(err, cli.json);
    }

    let result = match cli.command {
        Commands::Run(args) => taskhive::cli::commands::run::execute(args, config, cli.json).await,
        Commands::Config(args) => {
            taskhive::cli::commands::config::execute(args, config, cli.json).await
        }
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
