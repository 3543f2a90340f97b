//! integration-hub CLI
//!
//! Thin command-line front end over the integration registry built from
//! ~/.config/integration-hub/config.yaml.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use integration_hub::auth::ServiceCredentials;
use integration_hub::config::{validate_config, ConfigError, HubConfig};
use integration_hub::integrations::{SyncOptions, WebhookEvent, WebhookEventType};
use integration_hub::metrics;
use std::path::PathBuf;
use std::process;

/// integration-hub - connect, authenticate and sync third-party services
#[derive(Parser, Debug)]
#[command(name = "integration-hub")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/integration-hub/config.yaml)
    #[arg(short, long, env = "INTEGRATION_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write an example configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check the configuration for errors
    Validate,

    /// List configured services
    Services,

    /// Show authentication status and capabilities of a service
    Status {
        service: String,
    },

    /// Run a sync job and wait for it
    Sync {
        service: String,

        /// Resource type to sync (e.g., file, task)
        resource_type: String,

        /// Drop cached records before syncing
        #[arg(long)]
        full: bool,

        /// Only fetch records updated after this RFC3339 timestamp
        #[arg(long, conflicts_with = "full")]
        since: Option<DateTime<Utc>>,

        /// Records per page
        #[arg(long)]
        batch_size: Option<usize>,

        /// Stop after this many records
        #[arg(long)]
        max_records: Option<usize>,

        /// Provider filter as key=value (repeatable)
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },

    /// Store credentials for a service
    Login {
        service: String,

        /// API key (or set INTEGRATION_HUB_API_KEY)
        #[arg(long, env = "INTEGRATION_HUB_API_KEY", conflicts_with = "username")]
        api_key: Option<String>,

        /// Username for basic auth
        #[arg(long, requires = "password")]
        username: Option<String>,

        /// Password for basic auth
        #[arg(long, env = "INTEGRATION_HUB_PASSWORD")]
        password: Option<String>,
    },

    /// Delete stored credentials for a service
    Logout {
        service: String,
    },

    /// Exchange an OAuth authorization code for tokens
    OauthCallback {
        service: String,

        #[arg(long)]
        code: String,

        #[arg(long)]
        redirect_uri: String,
    },

    /// Apply a webhook notification to the resource cache
    Webhook {
        service: String,

        #[arg(value_enum)]
        event: WebhookKind,

        resource_type: String,

        resource_id: String,
    },

    /// Print Prometheus metrics gathered during this run
    Metrics,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WebhookKind {
    Create,
    Update,
    Delete,
}

impl From<WebhookKind> for WebhookEventType {
    fn from(kind: WebhookKind) -> Self {
        match kind {
            WebhookKind::Create => WebhookEventType::Create,
            WebhookKind::Update => WebhookEventType::Update,
            WebhookKind::Delete => WebhookEventType::Delete,
        }
    }
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

const EXAMPLE_CONFIG: &str = r#"# integration-hub configuration
credentials:
  backend: sqlite
  master_key_env: INTEGRATION_HUB_MASTER_KEY
retry:
  max_attempts: 5
  page_attempts: 2
  base_delay_ms: 1000
  max_delay_ms: 60000
services:
  - name: example
    base_url: https://api.example.com/v1
    resources: [item]
    features: [sync, caching]
"#;

#[tokio::main]
async fn main() {
    if let Err(e) = integration_hub::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(HubConfig::default_path);

    if let Commands::Init { force } = cli.command {
        if config_path.exists() && !force {
            bail!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            );
        }
        let config: HubConfig = serde_yaml::from_str(EXAMPLE_CONFIG)?;
        config.save(&config_path)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let config = match HubConfig::load(&config_path) {
        Ok(config) => config,
        Err(ConfigError::NotFound(path)) => bail!(
            "No configuration found at {}. Run 'integration-hub init' first.",
            path.display()
        ),
        Err(e) => return Err(e.into()),
    };

    tracing::info!(services = config.services.len(), "Configuration loaded");

    if let Commands::Validate = cli.command {
        return match validate_config(&config) {
            Ok(()) => {
                println!("Configuration is valid ({} services)", config.services.len());
                Ok(())
            }
            Err(errors) => {
                for error in &errors {
                    println!("  - {}", error);
                }
                bail!("{} validation error(s)", errors.len())
            }
        };
    }

    let registry = config
        .build_registry()
        .context("Failed to set up integrations")?;

    match cli.command {
        Commands::Init { .. } | Commands::Validate => {}

        Commands::Services => {
            let stored = registry.credential_store().stored_services().await?;
            for name in registry.list_services() {
                let marker = if stored.contains(&name) { "*" } else { " " };
                println!("{} {}", marker, name);
            }
        }

        Commands::Status { service } => {
            // Load credentials if present so the status reflects them
            if let Err(e) = registry.initialize_adapter(&service).await {
                tracing::debug!(service = %service, error = %e, "Adapter not initialized");
            }
            let status = registry.check_integration_status(&service).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        Commands::Sync {
            service,
            resource_type,
            full,
            since,
            batch_size,
            max_records,
            filters,
        } => {
            let mut options = match since {
                Some(since) => SyncOptions::since(since),
                None if full => SyncOptions::full(),
                None => SyncOptions::default(),
            };
            if let Some(batch_size) = batch_size {
                options = options.with_batch_size(batch_size);
            }
            if let Some(max_records) = max_records {
                options = options.with_max_records(max_records);
            }
            for (key, value) in filters {
                options = options.with_filter(key, value);
            }

            registry.ensure_adapter(&service).await?;
            let result = registry.schedule_sync(&service, &resource_type, options).await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let Some(sync) = &result.result {
                println!(
                    "{} {}: {} records synced, {} failed in {}ms",
                    result.job_id,
                    result.status,
                    sync.records_processed,
                    sync.records_failed,
                    sync.duration_ms
                );
            } else if let Some(error) = &result.error {
                println!("{} {}: {}", result.job_id, result.status, error);
                println!("  Hint: {}", error.kind().recommendation());
            }

            if !result.is_completed() {
                process::exit(2);
            }
        }

        Commands::Login {
            service,
            api_key,
            username,
            password,
        } => {
            let credentials = match (api_key, username, password) {
                (Some(key), _, _) => ServiceCredentials::api_key(key),
                (None, Some(user), Some(pass)) => ServiceCredentials::basic(user, pass),
                _ => bail!("Provide --api-key or --username with --password"),
            };
            registry.update_credentials(&service, credentials).await?;
            let auth = registry.initialize_adapter(&service).await?;
            println!("Logged in to {}", auth.service_name);
        }

        Commands::Logout { service } => {
            registry.remove_credentials(&service).await?;
            println!("Removed credentials for {}", service);
        }

        Commands::OauthCallback {
            service,
            code,
            redirect_uri,
        } => {
            let service_config = config
                .get_service(&service)
                .with_context(|| format!("Unknown service: {}", service))?;
            let client_id = service_config
                .client_id()
                .with_context(|| format!("{} has no OAuth client id configured", service))?;
            let client_secret = service_config
                .client_secret()
                .with_context(|| format!("{} has no OAuth client secret configured", service))?;

            let credentials = registry
                .handle_oauth_callback(&service, &code, &client_id, &client_secret, &redirect_uri)
                .await?;
            match credentials.expires_at() {
                Some(expires_at) => println!("Connected {} (expires {})", service, expires_at),
                None => println!("Connected {}", service),
            }
        }

        Commands::Webhook {
            service,
            event,
            resource_type,
            resource_id,
        } => {
            let event = WebhookEvent {
                event_type: event.into(),
                resource_type,
                resource_id,
                data: serde_json::Value::Null,
                timestamp: Utc::now(),
            };
            registry.process_webhook(&service, &event).await?;
            println!(
                "Invalidated {} {}/{}",
                service, event.resource_type, event.resource_id
            );
        }

        Commands::Metrics => {
            print!("{}", metrics::encode_metrics()?);
        }
    }

    Ok(())
}

fn print_status(status: &integration_hub::registry::IntegrationStatus) {
    println!("{}", status.service_name);
    if status.auth.authenticated {
        match status.auth.expires_at {
            Some(expires_at) => println!("  Authenticated (expires {})", expires_at),
            None => println!("  Authenticated"),
        }
    } else {
        println!(
            "  Not authenticated: {}",
            status.auth.error.as_deref().unwrap_or("no credentials")
        );
    }

    let caps = &status.capabilities;
    println!("  Resources: {}", caps.resources.join(", "));
    let features: Vec<String> = caps.features.iter().map(|f| format!("{:?}", f)).collect();
    println!("  Features:  {}", features.join(", "));
    if let Some(rate_limit) = &caps.rate_limit {
        println!("  Rate limit: {}/min", rate_limit.requests_per_minute);
    }
}
