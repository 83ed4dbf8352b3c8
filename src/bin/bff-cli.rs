use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "bff-cli")]
#[command(about = "Management CLI for the storefront BFF", long_about = None)]
struct Cli {
    #[arg(short, long, env = "BFF_ADMIN_URL", default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "BFF_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check BFF status
    Status,
    /// Show circuit breaker state per upstream service
    Breakers,
    /// Force a circuit breaker back to closed
    ResetBreaker { name: String },
    /// Show cache statistics
    Stats,
    /// Show the performance dashboard
    Performance,
    /// Delete cached entries by glob pattern, or everything
    Purge {
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        pattern: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Delete cached entries carrying any of the given tags
    Invalidate {
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Start a cache warm run
    Warm,
    /// Show cache warmer status
    WarmStatus,
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

    let (method, path, body) = match cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string(), None),
        Commands::Breakers => (Method::GET, "/admin/circuit-breakers".to_string(), None),
        Commands::ResetBreaker { name } => (
            Method::POST,
            format!("/admin/circuit-breakers/{name}/reset"),
            None,
        ),
        Commands::Stats => (Method::GET, "/admin/cache/stats".to_string(), None),
        Commands::Performance => (Method::GET, "/admin/performance".to_string(), None),
        Commands::Purge { pattern, all } => {
            let body = match pattern {
                Some(pattern) => json!({ "pattern": pattern }),
                None => json!({ "all": all }),
            };
            (Method::POST, "/admin/cache/purge".to_string(), Some(body))
        }
        Commands::Invalidate { tags } => (
            Method::POST,
            "/admin/cache/invalidate".to_string(),
            Some(json!({ "tags": tags })),
        ),
        Commands::Warm => (Method::POST, "/admin/cache/warm".to_string(), Some(json!({}))),
        Commands::WarmStatus => (Method::GET, "/admin/cache/warm".to_string(), None),
    };

    let mut request = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await
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
