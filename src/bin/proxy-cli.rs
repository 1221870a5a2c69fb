use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the balancer proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Admin API key, if the proxy requires one.
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy status
    Status,
    /// List backend liveness
    Backends,
    /// List client rate limits
    Clients,
    /// Add or replace a client's rate limit
    AddClient {
        client_id: String,
        #[arg(long)]
        capacity: u32,
        #[arg(long)]
        rate_per_sec: u32,
    },
    /// Remove a client's rate limit and bucket
    RemoveClient { client_id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);
    }

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Backends => client.get(format!("{}/admin/backends", base)),
        Commands::Clients => client.get(format!("{}/admin/clients", base)),
        Commands::AddClient {
            client_id,
            capacity,
            rate_per_sec,
        } => client.post(format!("{}/admin/clients", base)).json(&json!({
            "client_id": client_id,
            "capacity": capacity,
            "rate_per_sec": rate_per_sec,
        })),
        Commands::RemoveClient { client_id } => {
            client.delete(format!("{}/admin/clients/{}", base, client_id))
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
