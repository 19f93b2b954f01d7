//! Reconcile Password - Standalone Binary
//!
//! Sets a new password for one user and repairs the credential if it has
//! drifted from the user directory.
//!
//! ## Usage
//!
//! ```bash
//! # Reset against remote services
//! RECONCILE_NEW_PASSWORD='...' reconcile-password \
//!   --user-id user_01H \
//!   --provider-url http://auth:9000 \
//!   --directory-url http://users:9001
//!
//! # Drill against in-memory stores, JSON output
//! reconcile-password --backend memory --seed-user user_1=a@test.com \
//!   --user-id user_1 --password hunter2 --output json
//! ```

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use credential_reconciler::config::BackendArgs;
use credential_reconciler::Secret;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Reconcile a user's credential while setting a new password
#[derive(Parser, Debug)]
#[command(name = "reconcile-password", version, about)]
struct Args {
    /// Id of the user in the user directory
    #[arg(long)]
    user_id: String,

    /// New password
    #[arg(long, env = "RECONCILE_NEW_PASSWORD", hide_env_values = true)]
    password: String,

    #[command(flatten)]
    backend: BackendArgs,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let secret = Secret::new(args.password);
    if secret.is_blank() {
        bail!("Password must not be empty");
    }

    info!(user_id = %args.user_id, "Starting password reconciliation");

    let backends = args.backend.connect()?;
    let engine = args.backend.engine(&backends);

    let report = engine
        .reconcile_password_with_report(&args.user_id, &secret)
        .await?;

    match args.output {
        OutputFormat::Text => println!("{}", report.display()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}
