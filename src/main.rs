// src/main.rs

use std::path::PathBuf;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("km271-gateway.json"));

    if let Err(e) = km271_gateway::run(&config_path).await {
        eprintln!("km271-gateway: {}", e);
        std::process::exit(1);
    }
}
