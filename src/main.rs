use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use geotrail::cli::{Cli, Commands};
use geotrail::config::{StaticConfig, get_config, init_config};
use geotrail::runtime::modes::{run_lookup, run_server};
use geotrail::system::init_logging;

fn generate_config(path: Option<&str>) -> ExitCode {
    let Some(path) = path else {
        println!("{}", StaticConfig::generate_sample_config());
        return ExitCode::SUCCESS;
    };

    match StaticConfig::default().save_to_file(path) {
        Ok(()) => {
            println!("Sample configuration written to {}", path);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e.format_simple());
            ExitCode::FAILURE
        }
    }
}

#[actix_web::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Serve);
    if let Commands::GenerateConfig { path } = &command {
        return generate_config(path.as_deref());
    }

    init_config(cli.config.as_deref());
    let config = get_config();

    // 必须持有 guard 直到退出，保证日志落盘
    let _guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", e.format_colored());
            return ExitCode::FAILURE;
        }
    };

    let result = match command {
        Commands::Serve => run_server().await,
        Commands::Lookup { addresses, json } => run_lookup(&addresses, json).await,
        Commands::GenerateConfig { .. } => Ok(()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
