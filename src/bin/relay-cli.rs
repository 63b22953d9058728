use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Client CLI for the x402 payment relay", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the payment challenge for a content id
    Challenge { content_id: String },
    /// Fetch content with a payment hash or an attestation token
    Fetch {
        content_id: String,
        #[arg(long, conflicts_with = "attestation")]
        tx_hash: Option<String>,
        #[arg(long)]
        attestation: Option<String>,
    },
    /// Exchange a payment transaction for an attestation
    Attest { tx_hash: String, content_id: String },
    /// Look up the attestation issued for a transaction
    Lookup { tx_hash: String },
    /// Check whether a buyer has paid for a content id
    Verify { content_id: String, buyer: String },
    /// Relay and node health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Challenge { content_id } => {
            client.get(format!("{}/api/content/{}/x402", base, content_id)).send().await?
        }
        Commands::Fetch {
            content_id,
            tx_hash,
            attestation,
        } => {
            let mut req = client.get(format!("{}/api/content/{}/x402", base, content_id));
            if let Some(token) = attestation {
                req = req.header("X-Attestation", token);
            }
            if let Some(hash) = tx_hash {
                req = req.header("X-Payment", hash);
            }
            req.send().await?
        }
        Commands::Attest { tx_hash, content_id } => {
            client
                .post(format!("{}/api/relayer/attestation", base))
                .json(&json!({ "txHash": tx_hash, "contentId": content_id }))
                .send()
                .await?
        }
        Commands::Lookup { tx_hash } => {
            client.get(format!("{}/api/relayer/attestation/{}", base, tx_hash)).send().await?
        }
        Commands::Verify { content_id, buyer } => {
            client
                .get(format!("{}/api/content/{}/verify", base, content_id))
                .query(&[("buyerAddress", buyer)])
                .send()
                .await?
        }
        Commands::Health => client.get(format!("{}/health", base)).send().await?,
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Some(token) = res.headers().get("x-attestation").and_then(|v| v.to_str().ok()) {
        eprintln!("X-Attestation: {}", token);
    }
    let text = res.text().await?;

    // 402 is an expected answer, not a failure.
    if !status.is_success() && status.as_u16() != 402 {
        eprintln!("Error: relay returned status {}", status);
    } else {
        eprintln!("Status: {}", status);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
