use clap::Parser;
use console::style;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use dombridge::client::BridgeClient;
use dombridge::config::Config;
use dombridge::error::{DomBridgeError, Result};
use dombridge::interfaces::capability::actions;
use dombridge::protocol::Envelope;

#[derive(Parser, Debug)]
#[command(name = "dombridge")]
#[command(about = "DOM bridge CLI")]
struct Cli {
    #[arg(long, env = "DOMBRIDGE_URL")]
    url: Option<String>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    tab: Option<i64>,

    #[arg(long)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    Tabs,
    Snapshot,
    Html {
        selector: Option<String>,
    },
    Text,
    Markdown,
    Screenshot {
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    Exec {
        script: String,
    },
    Eval {
        expression: String,
    },
    Console {
        #[arg(long, default_value_t = false)]
        clear: bool,
    },
    Network {
        #[arg(long, default_value_t = false)]
        clear: bool,
    },
    Cookies,
    Storage,
    Click {
        selector: String,
    },
    Fill {
        selector: String,
        value: String,
    },
    Navigate {
        url: String,
    },
    Listen,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,dombridge=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let url = cli.url.clone().unwrap_or_else(|| config.broker_url());

    let client = BridgeClient::connect_with_timeout(&url, config.command_timeout())
        .await
        .map_err(|e| {
            DomBridgeError::Runtime(format!("cannot reach broker at {url}: {e}"))
        })?;

    let outcome = run_command(&cli, &client).await;
    client.close();

    if let Err(e) = outcome {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run_command(cli: &Cli, client: &BridgeClient) -> Result<()> {
    let (action, payload) = match &cli.command {
        Commands::Tabs => (actions::LIST_TABS, None),
        Commands::Snapshot => (actions::SNAPSHOT, None),
        Commands::Html { selector } => (
            actions::GET_HTML,
            selector
                .as_ref()
                .map(|selector| json!({ "selector": selector })),
        ),
        Commands::Text => (actions::GET_TEXT, None),
        Commands::Markdown => (actions::GET_MARKDOWN, None),
        Commands::Screenshot { full } => (actions::SCREENSHOT, Some(json!({ "fullPage": full }))),
        Commands::Exec { script } => (actions::EXECUTE_SCRIPT, Some(json!({ "script": script }))),
        Commands::Eval { expression } => (
            actions::EVALUATE_EXPRESSION,
            Some(json!({ "expression": expression })),
        ),
        Commands::Console { clear } => {
            if *clear {
                (actions::CLEAR_CONSOLE, None)
            } else {
                (actions::GET_CONSOLE_LOGS, None)
            }
        }
        Commands::Network { clear } => {
            if *clear {
                (actions::CLEAR_NETWORK_REQUESTS, None)
            } else {
                (actions::LIST_NETWORK_REQUESTS, None)
            }
        }
        Commands::Cookies => (actions::GET_COOKIES, None),
        Commands::Storage => (actions::GET_STORAGE, None),
        Commands::Click { selector } => (actions::CLICK, Some(json!({ "selector": selector }))),
        Commands::Fill { selector, value } => (
            actions::FILL,
            Some(json!({ "selector": selector, "value": value })),
        ),
        Commands::Navigate { url } => (actions::NAVIGATE, Some(json!({ "url": url }))),
        Commands::Listen => return listen(client).await,
        Commands::Status => return status(client).await,
    };

    let result = client
        .send_command_to(action, payload, cli.tab, cli.profile.as_deref())
        .await?;
    print_result(&result);
    Ok(())
}

async fn status(client: &BridgeClient) -> Result<()> {
    println!(
        "{} broker reachable",
        style("✔").green().bold()
    );
    match client.send_command(actions::LIST_TABS, None, None).await {
        Ok(tabs) => {
            let count = tabs.as_array().map(Vec::len).unwrap_or(0);
            println!(
                "{} agent connected ({} tab{})",
                style("✔").green().bold(),
                count,
                if count == 1 { "" } else { "s" }
            );
            Ok(())
        }
        Err(DomBridgeError::NoAgentAvailable) => {
            println!("{} no agent connected", style("✘").red().bold());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn listen(client: &BridgeClient) -> Result<()> {
    println!(
        "{}",
        style("Listening for events (Ctrl+C to exit):").dim()
    );
    let mut events = client.events();
    // the broker only fans out to connections it has seen speak as
    // controllers, so announce ourselves before waiting
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        client.send_command(actions::GET_ACTIVE_TAB, None, None),
    )
    .await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            received = events.recv() => match received {
                Ok(Envelope::Event { event, data, tab_id, .. }) => {
                    let tab = tab_id
                        .map(|tab_id| format!(" tab={tab_id}"))
                        .unwrap_or_default();
                    println!(
                        "{} {}{} {}",
                        style("●").cyan(),
                        style(&event).bold(),
                        style(tab).dim(),
                        data
                    );
                }
                Ok(Envelope::Error { error, .. }) => {
                    println!("{} {}", style("✘").red(), error);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => return Err(DomBridgeError::ConnectionClosed),
            }
        }
    }
}

fn print_result(result: &Value) {
    match result {
        Value::String(text) => println!("{text}"),
        Value::Null => println!("{}", style("ok").green()),
        other => println!(
            "{}",
            serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
        ),
    }
}
