//! Cart CLI - Inspect and edit the device-local guest cart.
//!
//! # Usage
//!
//! ```bash
//! # Show the guest cart
//! cart-cli show
//!
//! # Add one unit of a product
//! cart-cli add -p sku-1 -n "Canvas Tote" --price 24.00
//!
//! # Use a different storage directory or key
//! cart-cli --storage-dir /tmp/carts --key kiosk_cart show
//! ```
//!
//! # Commands
//!
//! - `show` - Print the cart with its item count and subtotal
//! - `add` - Add one unit of a product
//! - `set-quantity` - Set the quantity of a product already in the cart
//! - `remove` - Remove a product
//! - `clear` - Remove every product

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use cartsync_storefront::CartSyncConfig;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::cart::{self, CommandError, NewItem};

#[derive(Parser)]
#[command(name = "cart-cli")]
#[command(author, version, about = "Guest cart tools")]
struct Cli {
    /// Storage directory (overrides `CART_STORAGE_DIR`)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Guest cart key (overrides `CART_GUEST_KEY`)
    #[arg(long, global = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cart
    Show,
    /// Add one unit of a product
    Add {
        /// Product id
        #[arg(short, long)]
        product_id: String,

        /// Product name
        #[arg(short, long)]
        name: String,

        /// Unit price, e.g. 24.00
        #[arg(long)]
        price: Decimal,

        /// Product image URL
        #[arg(long, default_value = "")]
        image_url: String,
    },
    /// Set the quantity of a product (0 keeps the line)
    SetQuantity {
        /// Product id
        product_id: String,

        /// New quantity
        quantity: u32,
    },
    /// Remove a product
    Remove {
        /// Product id
        product_id: String,
    },
    /// Remove every product
    Clear,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartSyncConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration from environment (needed for Sentry init)
    let config = match CartSyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().init();
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cartsync_storefront=info,cartsync_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Command failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: CartSyncConfig) -> Result<(), CommandError> {
    let storage_dir = cli.storage_dir.unwrap_or(config.storage_dir);
    let key = cli.key.unwrap_or(config.guest_cart_key);

    let guest_cart = cart::open(&storage_dir, &key).await?;
    let mut out = io::stdout().lock();

    match cli.command {
        Commands::Show => cart::show(&guest_cart, &mut out)?,
        Commands::Add {
            product_id,
            name,
            price,
            image_url,
        } => {
            let item = NewItem {
                product_id,
                name,
                price,
                image_url,
            };
            cart::add(&guest_cart, item, &mut out).await?;
        }
        Commands::SetQuantity {
            product_id,
            quantity,
        } => cart::set_quantity(&guest_cart, &product_id, quantity, &mut out).await?,
        Commands::Remove { product_id } => cart::remove(&guest_cart, &product_id, &mut out).await?,
        Commands::Clear => cart::clear(&guest_cart, &mut out).await?,
    }
    Ok(())
}
