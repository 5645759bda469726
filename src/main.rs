use std::process;
use clap::Parser;

use salamene_storage::cli::Cli;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        eprintln!("Error [{}]: {}", e.error_code(), e);
        process::exit(if e.is_user_error() { 2 } else { 1 });
    }
}
