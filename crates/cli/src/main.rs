//! Canopy CLI - play declarative resource trees.

mod kinds;
mod spawn;

use anyhow::{Context as _, Result};
use canopy_engine::{Player, PlayerConfig};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Play declarative resource trees", long_about = None)]
struct Cli {
    /// Player configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Root context value, repeatable; VALUE is parsed as JSON when possible
    #[arg(long = "context", value_name = "KEY=VALUE", global = true)]
    context: Vec<String>,
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare and add a document, then print its state
    Run {
        /// Document in literal notation (JSON)
        file: PathBuf,
        /// Remove everything again afterwards
        #[arg(long)]
        stop: bool,
    },
    /// Print the expanded play graph of a document
    Graph {
        /// Document in literal notation (JSON)
        file: PathBuf,
    },
    /// List registered kinds
    Types,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), &cli.context)?;
    let mut player = Player::new(config);
    player.use_layer(kinds::builtin_layer());

    match cli.command {
        Commands::Run { file, stop } => {
            player.set_root_document(&load_document(&file)?)?;

            let played = player.play().await;
            print_state(&player)?;
            played.with_context(|| format!("Failed to play {}", file.display()))?;

            if stop {
                let stopped = player.stop().await;
                print_state(&player)?;
                stopped.with_context(|| format!("Failed to stop {}", file.display()))?;
            }
            info!("Done: {}", file.display());
        }
        Commands::Graph { file } => {
            player.set_root_document(&load_document(&file)?)?;
            let graph = player.play_graph().unwrap_or(Value::Null);
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
        Commands::Types => {
            for name in player.registry().names() {
                println!("{name}");
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_state(player: &Player) -> Result<()> {
    let state = match player.debug_state() {
        Some(state) => serde_json::to_value(state)?,
        None => Value::Object(Default::default()),
    };
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn load_document(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn load_config(path: Option<&Path>, pairs: &[String]) -> Result<PlayerConfig> {
    let mut config = match path {
        Some(path) => {
            let text =
                std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid config in {}", path.display()))?
        }
        None => PlayerConfig::default(),
    };
    for pair in pairs {
        let (key, value) = parse_context_pair(pair)?;
        config = config.with_context(key, value);
    }
    Ok(config)
}

fn parse_context_pair(pair: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = pair.split_once('=') else {
        anyhow::bail!("Expected KEY=VALUE, got '{pair}'");
    };
    if key.is_empty() {
        anyhow::bail!("Empty key in '{pair}'");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn player() -> Player {
        let mut player = Player::new(PlayerConfig::default().with_dump_on_error(false));
        player.use_layer(kinds::builtin_layer());
        player
    }

    #[test]
    fn test_parse_context_pair() {
        assert_eq!(parse_context_pair("port=8080").unwrap(), ("port".into(), json!(8080)));
        assert_eq!(parse_context_pair("name=web").unwrap(), ("name".into(), json!("web")));
        assert_eq!(parse_context_pair("expr=a=b").unwrap(), ("expr".into(), json!("a=b")));
        assert!(parse_context_pair("novalue").is_err());
        assert!(parse_context_pair("=1").is_err());
    }

    #[test]
    fn test_load_config_layers_pairs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"root_context": {{"a": 1, "b": 2}}, "dump_on_error": false}}"#).unwrap();

        let config = load_config(Some(file.path()), &["b=3".to_string()]).unwrap();

        assert!(!config.dump_on_error);
        assert_eq!(Value::Object(config.root_context), json!({"a": 1, "b": 3}));
    }

    #[test]
    fn test_load_document_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(load_document(&missing).is_err());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "not json").unwrap();
        assert!(load_document(&bad).is_err());
    }

    #[tokio::test]
    async fn test_document_runs_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(
            &path,
            json!(["group", [
                ["env", {"CANOPY_NAME": "canopy"}, [
                    ["exec", {"command": "sh", "args": ["-c", "echo $CANOPY_NAME"]}]
                ]]
            ]])
            .to_string(),
        )
        .unwrap();

        let mut player = player();
        player.set_root_document(&load_document(&path).unwrap()).unwrap();
        player.play().await.unwrap();

        assert_eq!(player.context("0.0.0").unwrap().get("stdout"), Some(json!("canopy")));
        let state = serde_json::to_value(player.debug_state().unwrap()).unwrap();
        assert_eq!(state["children"][0]["children"][0]["state"], json!("running"));

        player.stop().await.unwrap();
        assert_eq!(player.debug_state().unwrap().state.as_deref(), Some("removed"));
    }

    #[tokio::test]
    async fn test_value_producer_feeds_exec_command() {
        let mut player = player();
        player
            .set_root_document(&json!(["exec", {
                "command": ["value", {"value": "echo"}],
                "args": ["from a producer"]
            }]))
            .unwrap();
        assert_eq!(player.tree().unwrap().node_count(), 4);
        player.play().await.unwrap();

        assert_eq!(player.context("0.1.0").unwrap().get("stdout"), Some(json!("from a producer")));
    }

    #[tokio::test]
    async fn test_env_reads_producer_values() {
        let mut player = player();
        player
            .set_root_document(&json!(["env", {"CANOPY_X": ["value", {"value": "a"}]}, [
                ["env", {"CANOPY_Y": 2}, [
                    ["exec", {"command": "sh", "args": ["-c", "echo x=$CANOPY_X y=$CANOPY_Y"]}]
                ]]
            ]]))
            .unwrap();

        player.play().await.unwrap();

        assert_eq!(player.context("0.1.0").unwrap().get_local("env"), Some(json!({"CANOPY_X": "a"})));
        assert_eq!(player.context("0.1.0.0.0").unwrap().get("stdout"), Some(json!("x=a y=2")));
    }

    #[tokio::test]
    async fn test_exec_is_not_a_producer() {
        let mut player = player();
        player
            .set_root_document(&json!(["exec", {"command": ["exec", {"command": "true"}]}]))
            .unwrap();

        let err = player.play().await.unwrap_err();

        assert_eq!(err.node(), Some("0.1"));
        assert!(err.to_string().contains("exec does not implement resolved_value"), "{err}");
    }

    #[tokio::test]
    async fn test_failed_exec_reports_node() {
        let mut player = player();
        player
            .set_root_document(&json!(["group", [["exec", {"command": "sh", "args": ["-c", "exit 2"]}]]]))
            .unwrap();

        let err = player.play().await.unwrap_err();

        assert_eq!(err.node(), Some("0.0"));
        let state = player.debug_state().unwrap();
        assert!(state.children[0].state.as_deref().unwrap().starts_with("ERROR: spawn failed"));
    }
}
