//! Example building a client from a TOML pipeline config.
//!
//! Run with: `cargo run --example from_config`

use serde::Deserialize;
use tether::{ClientBuilder, Error, PipelineConfig};

const CONFIG: &str = r#"
base_url = "https://jsonplaceholder.typicode.com"
timeout_secs = 10
user_agent = "tether-config-demo/0.1"
request_id = true

[headers]
Accept = "application/json"

[retry]
max_attempts = 3
initial_delay_ms = 100
max_delay_ms = 2000

[circuit_breaker]
threshold = 5
cooldown_secs = 30
"#;

#[derive(Debug, Deserialize)]
struct Post {
    id: u64,
    title: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("tether=info,from_config=info")
        .init();

    let config = PipelineConfig::from_toml_str(CONFIG)?;
    let client = ClientBuilder::from_config(&config)?.build()?;

    match client.get::<Post>("/posts/1").await {
        Ok(response) => {
            println!("Post {}: {}", response.data.id, response.data.title);
            println!("Latency: {:?}, attempts: {}", response.latency, response.attempts);
        }
        Err(Error::HttpError { status, .. }) => println!("HTTP error: {}", status),
        Err(e) => println!("Failed: {}", e),
    }

    Ok(())
}
