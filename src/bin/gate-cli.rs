use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use ingest_gate::client::IngestClient;
use ingest_gate::security::Signer;

#[derive(Parser)]
#[command(name = "gate-cli")]
#[command(about = "Management and test CLI for the ingestion gate", long_about = None)]
struct Cli {
    /// Admin API base URL.
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Admin API key.
    #[arg(short, long, env = "GATE_ADMIN_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gate status
    Status,
    /// Show admission counters
    Stats,
    /// Show a project by public key
    Project { public_key: String },
    /// Set or clear a project's allowed domain
    SetDomain {
        public_key: String,
        /// Omit to remove the restriction.
        domain: Option<String>,
    },
    /// Sign a JSON payload and print the wire body
    Sign {
        #[arg(long, env = "GATE_SECRET_KEY")]
        secret: String,
        payload: String,
    },
    /// Send a JSON payload to the ingest endpoint
    Send {
        #[arg(long, default_value = "http://localhost:8080")]
        gate_url: String,
        #[arg(long, env = "GATE_CREDENTIAL")]
        credential: String,
        /// Sign the payload (backend mode).
        #[arg(long, env = "GATE_SECRET_KEY")]
        secret: Option<String>,
        /// Origin header for unsigned requests.
        #[arg(long)]
        origin: Option<String>,
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    match cli.command {
        Commands::Status => {
            let res = client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Stats => {
            let res = client
                .get(format!("{}/admin/stats", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Project { public_key } => {
            let res = client
                .get(format!("{}/admin/projects/{}", cli.url, public_key))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::SetDomain { public_key, domain } => {
            let res = client
                .put(format!("{}/admin/projects/{}/domain", cli.url, public_key))
                .headers(headers)
                .json(&serde_json::json!({ "allowed_domain": domain }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Sign { secret, payload } => {
            let payload: Value = serde_json::from_str(&payload)?;
            let signed = Signer::new(secret)?.sign(&payload)?;
            println!("{}", serde_json::to_string_pretty(&signed.into_payload())?);
        }
        Commands::Send {
            gate_url,
            credential,
            secret,
            origin,
            payload,
        } => {
            let payload: Value = serde_json::from_str(&payload)?;
            let mut ingest = IngestClient::new(&gate_url, credential);
            if let Some(secret) = secret {
                ingest = ingest.with_signer(Signer::new(secret)?);
            }
            if let Some(origin) = origin {
                ingest = ingest.with_origin(origin);
            }
            match ingest.send(&payload).await {
                Ok(resp) => println!("{}", serde_json::to_string_pretty(&resp)?),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
