use std::path::PathBuf;

use staeon_node::run_node;

#[tokio::main]
async fn main() {
    let path = std::env::var("STAEON_CONFIG").unwrap_or_else(|_| "config/staeon.toml".to_string());
    if let Err(e) = run_node(PathBuf::from(path)).await {
        eprintln!("node failed: {e:?}");
    }
}
