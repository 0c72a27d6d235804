mod redis;

use std::sync::Arc;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = redis::config::parse_args(&args)?;
    let config = Arc::new(config);

    redis::server::run(config).await
}
