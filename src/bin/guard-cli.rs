use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for the inference-guard admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GUARD_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service status
    Status,
    /// Stats of every proxy
    Proxies,
    /// Settings and stats of one proxy
    Stats { name: String },
    /// Drop every cached response of a proxy
    ClearCache { name: String },
    /// Force a proxy's circuit breaker closed
    ResetBreaker { name: String },
    /// Send one prompt through a proxy
    Probe {
        name: String,
        #[arg(required = true)]
        prompt: Vec<String>,
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Proxies => client.get(format!("{base}/admin/proxies")),
        Commands::Stats { name } => client.get(format!("{base}/admin/proxies/{name}")),
        Commands::ClearCache { name } => {
            client.post(format!("{base}/admin/proxies/{name}/cache/clear"))
        }
        Commands::ResetBreaker { name } => {
            client.post(format!("{base}/admin/proxies/{name}/breaker/reset"))
        }
        Commands::Probe { name, prompt, model } => {
            let mut options = serde_json::Map::new();
            if let Some(model) = model {
                options.insert("model".to_string(), Value::String(model));
            }
            client
                .post(format!("{base}/admin/proxies/{name}/probe"))
                .json(&json!({ "prompt": prompt.join(" "), "options": options }))
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Some(retry_after) = res.headers().get(reqwest::header::RETRY_AFTER) {
            eprintln!("Retry-After: {}", retry_after.to_str().unwrap_or("?"));
        }
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
