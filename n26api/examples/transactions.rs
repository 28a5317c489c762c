use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use n26_clock::{Clock, DurationSecs, System};
use n26api::{auth::store::FileTokenStore, Client};
use uuid::Uuid;

#[derive(Debug, Parser)]
struct Opts {
    /// The N26 account username
    #[clap(short, long, env = "N26_USERNAME")]
    username: Option<String>,

    /// The N26 account password
    #[clap(short, long, env = "N26_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// The device ID to log in with; a new one is generated if not given
    #[clap(short, long, env = "N26_DEVICE")]
    device: Option<Uuid>,

    /// The local file used to cache tokens
    #[clap(short = 'f', long, env, default_value = ".n26-tokens.json")]
    token_file: PathBuf,

    /// How many days back to list transactions for
    #[clap(long, default_value_t = 30)]
    days: u64,

    /// Seconds allowed for approving the login on the paired phone
    #[clap(long, default_value_t = 60)]
    mfa_timeout: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let mut builder = Client::builder()
        .with_token_store(Arc::new(FileTokenStore::new(opts.token_file)))
        .with_mfa_timeout(Duration::from_secs(opts.mfa_timeout));

    if let Some(username) = opts.username {
        builder = builder.with_username(username);
    }

    if let Some(password) = opts.password {
        builder = builder.with_password(password);
    }

    if let Some(device) = opts.device {
        builder = builder.with_device_id(device);
    }

    let client = builder.build()?;

    if opts.device.is_none() {
        tracing::warn!(
            device_id = %client.device_id(),
            "using a new device id, set N26_DEVICE to reuse it"
        );
    }

    tracing::info!("approve the login on your phone if prompted");

    let to = System.now();
    let from = to - DurationSecs(opts.days * 86_400);
    let transactions = client.find_all_transactions_in_range(from, to).await?;

    for transaction in &transactions {
        tracing::info!(
            id = %transaction.id,
            visible_ts = transaction.visible_ts,
            amount = transaction.amount,
            currency = %transaction.currency_code,
            partner = transaction.partner_name.as_deref().or(transaction.merchant_name.as_deref()).unwrap_or("-"),
            "transaction"
        );
    }

    tracing::info!(count = transactions.len(), "done");
    Ok(())
}
