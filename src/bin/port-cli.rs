use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};

use nats_port::client::{ClientConfig, ClientEvent, ReconnectingSocket};
use nats_port::protocol::{SUBJECT_HEADER, TRACE_ID_HEADER};

#[derive(Parser)]
#[command(name = "port-cli")]
#[command(about = "Command-line client for the NATS port", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a request-reply call through the HTTP port
    Request {
        /// Backbone subject
        subject: String,
        /// JSON value sent as `data`
        #[arg(short, long)]
        data: Option<String>,
        /// Extra header, `name:value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        #[arg(long)]
        trace_id: Option<String>,
    },
    /// Subscribe through the WebSocket port and print every message
    Subscribe {
        /// Backbone subjects
        #[arg(required = true)]
        subjects: Vec<String>,
        /// WebSocket URL; derived from --url when omitted
        #[arg(long)]
        ws_url: Option<String>,
    },
    /// Show gateway health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Request {
            subject,
            data,
            headers,
            trace_id,
        } => {
            let mut header_map = HeaderMap::new();
            header_map.insert(SUBJECT_HEADER, HeaderValue::from_str(&subject)?);
            if let Some(trace_id) = trace_id {
                header_map.insert(TRACE_ID_HEADER, HeaderValue::from_str(&trace_id)?);
            }
            for header in headers {
                let (name, value) = header
                    .split_once(':')
                    .ok_or_else(|| format!("header '{}' is not name:value", header))?;
                header_map.append(
                    HeaderName::from_bytes(name.trim().as_bytes())?,
                    HeaderValue::from_str(value.trim())?,
                );
            }

            let body = match data {
                Some(raw) => json!({ "data": serde_json::from_str::<Value>(&raw)? }),
                None => json!({}),
            };

            let res = reqwest::Client::new()
                .post(&cli.url)
                .headers(header_map)
                .json(&body)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Subscribe { subjects, ws_url } => {
            let ws_url = ws_url.unwrap_or_else(|| cli.url.replacen("http", "ws", 1));
            let config = ClientConfig {
                retry_interval: Duration::from_secs(5),
                ..ClientConfig::default()
            };
            let (socket, mut events) = ReconnectingSocket::connect(&ws_url, config)?;

            while let Some(event) = events.recv().await {
                match event {
                    ClientEvent::Opened | ClientEvent::Reconnected => {
                        eprintln!("Connected to {}", ws_url);
                        for subject in &subjects {
                            socket.subscribe(subject).await?;
                        }
                    }
                    ClientEvent::Message(message) => {
                        println!("{}", serde_json::to_string(&message)?);
                    }
                    ClientEvent::Error(e) => eprintln!("Error: {}", e),
                    ClientEvent::Closed { code, reason } => {
                        eprintln!("Closed (code {:?}): {}", code, reason);
                        break;
                    }
                }
            }
        }
        Commands::Health => {
            let base = cli.url.trim_end_matches('/');
            let res = reqwest::get(format!("{}/health", base)).await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Some(cookie) = res.headers().get(reqwest::header::SET_COOKIE) {
        eprintln!("set-cookie: {}", cookie.to_str().unwrap_or("<binary>"));
    }
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
    }

    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
