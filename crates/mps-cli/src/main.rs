use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::automap::{self, AutomapArgs};

#[derive(Parser)]
#[command(name = "mps")]
#[command(about = "Marketplace sync operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Validate layered config and list enabled marketplaces
    ConfigCheck {
        #[arg(required = true)]
        paths: Vec<String>,

        /// Also require every referenced credential env var to be set
        #[arg(long, default_value_t = false)]
        resolve_secrets: bool,
    },

    /// Auto-map local entities against a marketplace catalog from CSV files
    Automap {
        /// Marketplace id (trendyol, hepsiburada, n11, amazon, pazarama, ciceksepeti)
        #[arg(long)]
        marketplace: String,

        /// category | brand | attribute
        #[arg(long, default_value = "category")]
        kind: String,

        /// CSV with header `local_id,name`
        #[arg(long = "local")]
        local_csv: String,

        /// CSV with header `id,name`
        #[arg(long = "remote")]
        remote_csv: String,

        /// Overrides the threshold from --config (or the built-in default)
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Layered config paths; supplies mapping.min_confidence
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Persist to MPS_DATABASE_URL instead of a dry run
        #[arg(long, default_value_t = false)]
        apply: bool,
    },

    /// Print the X-Signature a marketplace would send for a webhook body
    WebhookSign {
        /// Name of the env var holding the webhook secret
        #[arg(long)]
        secret_env: String,

        /// Path to the raw request body
        #[arg(long)]
        body_file: String,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = mps_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = mps_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_mapping_table={} has_watermark_table={} has_event_table={} has_unresolved_table={}",
                        s.ok,
                        s.has_mapping_table,
                        s.has_watermark_table,
                        s.has_event_table,
                        s.has_unresolved_table
                    );
                }
                DbCmd::Migrate => {
                    mps_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = mps_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::ConfigCheck {
            paths,
            resolve_secrets,
        } => {
            let (loaded, settings) = commands::load_settings(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            let enabled = settings.enabled_marketplaces();
            println!(
                "enabled={}",
                enabled
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            );
            for m in &enabled {
                if let Some(ms) = settings.marketplace(*m) {
                    println!(
                        "marketplace={} account_id={} rate_limit={}/{}ms sync_interval_secs={} price_margin={} stock_buffer={}",
                        m,
                        ms.account_id,
                        ms.rate_limit.limit,
                        ms.rate_limit.window_ms,
                        ms.sync_interval_secs,
                        ms.price_margin,
                        ms.stock_buffer
                    );
                }
            }
            if resolve_secrets {
                let secrets = mps_config::secrets::resolve_marketplace_secrets(&settings)?;
                for m in secrets.marketplaces.keys() {
                    println!(
                        "secrets_ok marketplace={} webhook_signing={}",
                        m,
                        secrets.webhook_secret(*m).is_some()
                    );
                }
            }
        }

        Commands::Automap {
            marketplace,
            kind,
            local_csv,
            remote_csv,
            min_confidence,
            config_paths,
            apply,
        } => {
            let configured = if config_paths.is_empty() {
                mps_config::MappingSettings::default().min_confidence
            } else {
                commands::load_settings(&config_paths)?.1.mapping.min_confidence
            };
            let report = automap::run(AutomapArgs {
                marketplace,
                kind,
                local_csv,
                remote_csv,
                min_confidence: min_confidence.unwrap_or(configured),
                apply,
            })
            .await?;
            println!(
                "mapped={} skipped_low_confidence={} already_manual={} no_candidates={} failed={}",
                report.mapped,
                report.skipped_low_confidence,
                report.already_manual,
                report.no_candidates,
                report.failed
            );
            if report.failed > 0 {
                anyhow::bail!("{} candidate(s) failed to map", report.failed);
            }
        }

        Commands::WebhookSign {
            secret_env,
            body_file,
        } => {
            let secret = std::env::var(&secret_env)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .with_context(|| format!("env var '{}' is not set or empty", secret_env))?;
            let body = commands::read_body(&body_file)?;
            println!(
                "{}={}",
                mps_ingest::SIGNATURE_HEADER,
                mps_ingest::signature::sign(&secret, &body)
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
