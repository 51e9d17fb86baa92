//! repd: command line tool for managing an iprepd server
//!
//! Connection settings are read from `$HOME/.repd` (see `repd config set`),
//! or from the file given with `--config`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::Level;

use iprepd::reputation::{Reputation, TYPE_IP, ViolationRequest};
use iprepd::tool::{PayloadFormat, ToolConfig, read_objects, read_payload, render_table};
use iprepd::ReputationClient;

#[derive(Parser, Debug)]
#[command(name = "repd", version, about = "cli to manage iprepd server")]
struct Cli {
    /// Override default config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log client requests to stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reputation entry related commands
    #[command(subcommand, visible_alias = "r")]
    Reputation(ReputationCommand),

    /// Violation related commands
    #[command(subcommand, visible_alias = "v")]
    Violation(ViolationCommand),

    /// HTTP healthcheck endpoint check
    #[command(hide = true)]
    Heartbeat,

    /// Load balancer healthcheck endpoint check
    #[command(hide = true)]
    Lbheartbeat,

    /// Get the version of the configured iprepd server
    Version {
        /// Print raw json
        #[arg(short, long)]
        json: bool,
    },

    /// Configure the command line tool
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ReputationCommand {
    /// List all reputation entries
    List {
        #[arg(short, long)]
        json: bool,
    },

    /// Get the entry for a given object
    Get {
        #[arg(short, long)]
        object: String,
        #[arg(short = 't', long = "type", default_value = TYPE_IP)]
        object_type: String,
        #[arg(short, long)]
        json: bool,
    },

    /// Update the entry for a given object
    Set {
        #[arg(short, long)]
        object: String,
        #[arg(short, long)]
        score: i32,
        #[arg(short = 't', long = "type", default_value = TYPE_IP)]
        object_type: String,
        /// Seconds after which the reputation may begin to recover
        #[arg(short, long, default_value_t = 0)]
        decay_after: i64,
    },

    /// Delete the entry for a given object
    Clear {
        #[arg(short, long)]
        object: String,
        #[arg(short = 't', long = "type", default_value = TYPE_IP)]
        object_type: String,
    },

    /// Delete the entries for every object listed in a file
    BatchClear {
        /// One object per line
        #[arg(short, long)]
        payload: PathBuf,
        #[arg(short = 't', long = "type", default_value = TYPE_IP)]
        object_type: String,
        /// Stop at the first failed delete
        #[arg(short, long)]
        exit_on_fail: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ViolationCommand {
    /// List all configured violations
    List {
        #[arg(short, long)]
        json: bool,
    },

    /// Apply a violation to a single object
    Apply {
        #[arg(short, long)]
        violation: String,
        #[arg(short, long)]
        object: String,
        #[arg(short = 't', long = "type", default_value = TYPE_IP)]
        object_type: String,
        /// Seconds before the object's reputation begins to heal
        #[arg(short, long, default_value_t = 0)]
        suppress_recovery: i64,
    },

    /// Apply the violations in a payload file
    BatchApply {
        #[arg(short, long)]
        payload: PathBuf,
        #[arg(short = 'f', long, value_enum, default_value_t = PayloadFormat::Json)]
        payload_fmt: PayloadFormat,
        /// Object type; required for list payloads
        #[arg(short = 't', long = "type")]
        object_type: Option<String>,
        /// Violation name; required for list payloads
        #[arg(short, long)]
        violation: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Create the configuration file
    Set {
        #[arg(short, long)]
        url: String,
        #[arg(short, long)]
        token: String,
        /// Override default config file path
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Show the configuration file
    Show {
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(ToolConfig::default_path);
    match cli.cmd {
        Commands::Config(cmd) => config_command(cmd, &config_path),
        Commands::Reputation(cmd) => reputation_command(cmd, &client(&config_path)?).await,
        Commands::Violation(cmd) => violation_command(cmd, &client(&config_path)?).await,
        Commands::Heartbeat => {
            let ok = client(&config_path)?
                .heartbeat()
                .await
                .context("could not check heartbeat")?;
            if ok {
                println!("[OK] the server is reachable via HTTP");
            } else {
                println!("[PROBLEM] the server is NOT reachable via HTTP");
            }
            Ok(())
        }
        Commands::Lbheartbeat => {
            let ok = client(&config_path)?
                .lb_heartbeat()
                .await
                .context("could not check lbheartbeat")?;
            if ok {
                println!("[OK] the load balancer can reach the server");
            } else {
                println!("[PROBLEM] the load balancer can NOT reach the server");
            }
            Ok(())
        }
        Commands::Version { json } => {
            let version = client(&config_path)?
                .version()
                .await
                .context("could not get server version")?;
            if json {
                println!("{}", serde_json::to_string(&version)?);
            } else {
                print!(
                    "{}",
                    render_table([
                        vec!["COMMIT", version.commit.as_str()],
                        vec!["VERSION", version.version.as_str()],
                        vec!["SOURCE", version.source.as_str()],
                        vec!["BUILD", version.build.as_str()],
                    ])
                );
            }
            Ok(())
        }
    }
}

fn client(config_path: &Path) -> Result<ReputationClient> {
    let config = ToolConfig::load(config_path)?;
    ReputationClient::new(&config.host_url, &config.auth_token)
        .context("could not initialize client")
}

fn config_command(cmd: ConfigCommand, config_path: &Path) -> Result<()> {
    match cmd {
        ConfigCommand::Set { url, token, path } => {
            let path = path.as_deref().unwrap_or(config_path);
            ToolConfig::new(&url, &token)?
                .save(path)
                .context("could not set configuration")?;
            println!("configuration written to {}", path.display());
        }
        ConfigCommand::Show { path } => {
            let path = path.as_deref().unwrap_or(config_path);
            let config = ToolConfig::load(path)?;
            print!(
                "{}",
                render_table([
                    vec!["HOST_URL", config.host_url.as_str()],
                    vec!["AUTH_TK", config.auth_token.as_str()],
                ])
            );
        }
    }
    Ok(())
}

async fn reputation_command(cmd: ReputationCommand, client: &ReputationClient) -> Result<()> {
    match cmd {
        ReputationCommand::List { json } => {
            let entries = client
                .dump()
                .await
                .context("could not retrieve reputation entries")?;
            if json {
                println!("{}", serde_json::to_string(&entries)?);
            } else if entries.is_empty() {
                println!("-- no entries to show --");
            } else {
                let rows = std::iter::once(vec![
                    "TYPE".to_string(),
                    "OBJECT".to_string(),
                    "SCORE".to_string(),
                ])
                .chain(entries.into_iter().map(|entry| {
                    vec![entry.object_type, entry.object, entry.reputation.to_string()]
                }));
                print!("{}", render_table(rows));
            }
        }
        ReputationCommand::Get {
            object,
            object_type,
            json,
        } => {
            let entry = client
                .get_reputation(&object_type, &object)
                .await
                .with_context(|| format!("could not get reputation for {} {}", object_type, object))?
                .ok_or_else(|| anyhow::anyhow!("no reputation entry for {} {}", object_type, object))?;
            if json {
                println!("{}", serde_json::to_string(&entry)?);
            } else {
                let decay_after = entry
                    .decay_after
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                print!(
                    "{}",
                    render_table([
                        vec!["OBJECT".to_string(), entry.object.clone()],
                        vec!["REPUTATION".to_string(), entry.reputation.to_string()],
                        vec!["TYPE".to_string(), entry.object_type.clone()],
                        vec!["REVIEWED".to_string(), entry.reviewed.to_string()],
                        vec!["LAST UPDATED".to_string(), entry.last_updated.to_rfc3339()],
                        vec!["DECAY AFTER".to_string(), decay_after],
                    ])
                );
            }
        }
        ReputationCommand::Set {
            object,
            score,
            object_type,
            decay_after,
        } => {
            let mut entry = Reputation::new(&object_type, &object, score);
            if decay_after > 0 {
                let hold = chrono::Duration::try_seconds(decay_after)
                    .and_then(|hold| entry.last_updated.checked_add_signed(hold))
                    .ok_or_else(|| anyhow::anyhow!("decay-after out of range: {}", decay_after))?;
                entry.decay_after = Some(hold);
            }
            client
                .set_reputation(&entry)
                .await
                .with_context(|| format!("could not update reputation for {} {}", object_type, object))?;
            println!("reputation for {} {} updated successfully!", object_type, object);
        }
        ReputationCommand::Clear {
            object,
            object_type,
        } => {
            client
                .delete_reputation(&object_type, &object)
                .await
                .with_context(|| format!("could not delete reputation for {} {}", object_type, object))?;
            println!("reputation for {} {} deleted successfully!", object_type, object);
        }
        ReputationCommand::BatchClear {
            payload,
            object_type,
            exit_on_fail,
        } => {
            let mut deleted = 0;
            for object in read_objects(&payload)? {
                match client.delete_reputation(&object_type, &object).await {
                    Ok(()) => deleted += 1,
                    Err(e) if exit_on_fail => {
                        return Err(e.context(format!(
                            "could not delete reputation for {} {}",
                            object_type, object
                        )));
                    }
                    Err(e) => eprintln!("skipping {} {}: {:#}", object_type, object, e),
                }
            }
            println!("{} reputation entries deleted!", deleted);
        }
    }
    Ok(())
}

async fn violation_command(cmd: ViolationCommand, client: &ReputationClient) -> Result<()> {
    match cmd {
        ViolationCommand::List { json } => {
            let violations = client
                .get_violations()
                .await
                .context("could not retrieve available violations")?;
            if json {
                println!("{}", serde_json::to_string(&violations)?);
            } else if violations.is_empty() {
                println!("-- no violations to show --");
            } else {
                let rows = std::iter::once(vec![
                    "NAME".to_string(),
                    "PENALTY".to_string(),
                    "DECREASE LIMIT".to_string(),
                ])
                .chain(violations.into_iter().map(|v| {
                    vec![v.name, v.penalty.to_string(), v.decrease_limit.to_string()]
                }));
                print!("{}", render_table(rows));
            }
        }
        ViolationCommand::Apply {
            violation,
            object,
            object_type,
            suppress_recovery,
        } => {
            let request = ViolationRequest {
                violation: violation.clone(),
                object: object.clone(),
                object_type: object_type.clone(),
                suppress_recovery,
                ..Default::default()
            };
            client
                .apply_violation(&request)
                .await
                .context("could not apply violation")?;
            println!(
                "violation {} successfully applied to {} {}!",
                violation, object_type, object
            );
        }
        ViolationCommand::BatchApply {
            payload,
            payload_fmt,
            object_type,
            violation,
        } => {
            let requests = read_payload(
                &payload,
                payload_fmt,
                object_type.as_deref(),
                violation.as_deref(),
            )
            .context("could not validate payload file")?;
            let object_type = object_type.as_deref().unwrap_or(TYPE_IP);
            client
                .apply_violations(object_type, &requests)
                .await
                .context("could not batch apply violations")?;
            println!(
                "{} violations successfully applied to {} batch in {}!",
                requests.len(),
                object_type,
                payload.display()
            );
        }
    }
    Ok(())
}
