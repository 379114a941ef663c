//! consultr - Resilient multi-provider LLM consultation router
//!
//! Runs the HTTP API, validates configuration, or answers a single query
//! from the command line.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use consultr::config::{Config, ConfigError, KeySource};
use consultr::consult::ConsultRouter;
use consultr::provider::ProviderId;
use consultr::router::ProviderPreference;
use consultr::ConsultationRequest;

#[derive(Parser)]
#[command(name = "consultr")]
#[command(about = "Resilient multi-provider LLM consultation router")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured providers and their limits
    Providers {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Run a single consultation and print the result as JSON
    Ask {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// The question
        query: String,

        /// Extra context passed along with the question
        #[arg(long, default_value = "")]
        context: String,

        /// auto, all, gemini or llama
        #[arg(short, long, default_value = "auto")]
        provider: ProviderPreference,

        /// Ask every available provider and compare the answers
        #[arg(long)]
        compare: bool,

        /// Skip the response cache
        #[arg(long)]
        no_cache: bool,
    },
}

impl Commands {
    fn config_path(&self) -> &str {
        match self {
            Commands::Serve { config, .. }
            | Commands::Check { config }
            | Commands::Providers { config }
            | Commands::Ask { config, .. } => config,
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let default_filter = match level {
        Some(level) => format!("consultr={},tower_http={}", level, level),
        None => "consultr=info,tower_http=info".to_string(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_key_sources(sources: &[(ProviderId, KeySource)]) {
    for (id, source) in sources {
        println!("  {}: key source = {}", id, source);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded: Result<(Config, Vec<(ProviderId, KeySource)>), ConfigError> =
        Config::from_file_with_env(cli.command.config_path());
    init_tracing(loaded.as_ref().ok().map(|(c, _)| c.logging.level.as_str()));

    let (mut config, key_sources) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(
                config = %cli.command.config_path(),
                error = %e,
                "Failed to load configuration"
            );
            return Err(e.into());
        }
    };

    match cli.command {
        Commands::Serve { listen, .. } => {
            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }
            for (id, source) in &key_sources {
                tracing::debug!(provider = %id, source = %source, "Resolved API key");
            }
            consultr::api::run_server(config).await
        }

        Commands::Check { config: path } => {
            println!("Configuration OK: {}", path);
            if config.providers.is_empty() {
                println!("  warning: no providers configured");
            }
            print_key_sources(&key_sources);
            Ok(())
        }

        Commands::Providers { .. } => {
            if let Some(g) = &config.providers.gemini {
                println!(
                    "gemini  command={} model={} fallbacks=[{}] rpm={}",
                    g.command,
                    g.model,
                    g.fallback_models.join(", "),
                    g.requests_per_minute
                );
            }
            if let Some(l) = &config.providers.llama {
                println!(
                    "llama   url={} model={} fallbacks=[{}] rpm={}",
                    l.url,
                    l.model,
                    l.fallback_models.join(", "),
                    l.requests_per_minute
                );
            }
            if config.providers.is_empty() {
                println!("No providers configured");
            }
            Ok(())
        }

        Commands::Ask {
            query,
            context,
            provider,
            compare,
            no_cache,
            ..
        } => {
            let router = ConsultRouter::from_config(&config).await?;
            let request = ConsultationRequest::new(query)
                .with_context(context)
                .with_provider(provider)
                .with_compare(compare)
                .with_cache(!no_cache);
            let result = router.consult(request).await?;
            router.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
