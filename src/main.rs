use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;

use mealsync::api::{Entry, EntryProduct, HttpGateway, MealType, Product, RecordId};
use mealsync::config::{Config, ServerConfig};
use mealsync::store::{KeyValueStorage, LocalStore, MemoryStorage, SqliteStorage, StoreKeys};
use mealsync::summary::DailySummary;
use mealsync::SyncOrchestrator;

#[derive(Parser, Debug)]
#[command(name = "mealsync")]
#[command(about = "Offline-first sync client for a food diary service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/mealsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Server base URL, overriding the config file
  #[arg(short, long)]
  server: Option<String>,

  /// Keep cache and queue in memory only
  #[arg(long)]
  ephemeral: bool,

  /// Debug logging, mirrored to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pull server state, falling back to the cache when offline
  Sync,
  /// Push queued changes to the server
  Push,
  /// Refresh a stale cache and flush queued changes
  Reconcile,
  /// Show cache freshness and queue sizes
  Status,
  /// Print the queued changes
  Pending,
  /// Drop all queued changes without sending them
  Discard,
  /// Add a diary entry
  AddEntry {
    /// Product id (server id or temp id)
    product: RecordId,
    /// Weight in grams
    weight: f64,
    #[arg(short, long, default_value = "snack")]
    meal: MealType,
    /// Day of the entry, YYYY-MM-DD (default: today)
    #[arg(short, long)]
    date: Option<NaiveDate>,
  },
  /// Delete a diary entry
  DeleteEntry { id: RecordId },
  /// Add a product; values are grams per 100 g
  AddProduct {
    name: String,
    protein: f64,
    fat: f64,
    carbs: f64,
    #[arg(long)]
    recipe: bool,
  },
  /// Delete a product on the next push
  DeleteProduct { id: RecordId },
  /// Search the product catalog
  Search { query: String },
  /// Nutrition of a product at a weight
  Nutrition { product_id: i64, weight: f64 },
  /// Nutrition totals for a day
  Summary {
    #[arg(short, long)]
    date: Option<NaiveDate>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = mealsync::logging::init(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override server if specified on command line
  let config = if let Some(url) = args.server {
    Config {
      server: ServerConfig {
        url,
        ..config.server
      },
      ..config
    }
  } else {
    config
  };

  let gateway = HttpGateway::new(&config)?;
  let keys = StoreKeys::for_server(gateway.base_url().as_str());
  tracing::debug!(server = %gateway.base_url(), ephemeral = args.ephemeral, "Starting");

  if args.ephemeral {
    let store = LocalStore::new(MemoryStorage::new(), keys);
    run(SyncOrchestrator::new(store, gateway), args.command).await
  } else {
    let storage = SqliteStorage::open(config.storage.path.as_deref())?;
    let store = LocalStore::new(storage, keys);
    run(SyncOrchestrator::new(store, gateway), args.command).await
  }
}

async fn run<S: KeyValueStorage>(
  sync: SyncOrchestrator<S, HttpGateway>,
  command: Command,
) -> Result<()> {
  match command {
    Command::Sync => print_json(&sync.sync_all().await),
    Command::Push => print_json(&json!({ "success": sync.push_changes().await })),
    Command::Reconcile => print_json(&sync.reconcile().await),
    Command::Status => print_json(&sync.status()),
    Command::Pending => print_json(&sync.queue().pending()),
    Command::Discard => {
      sync.queue().clear();
      print_json(&sync.status())
    }
    Command::AddEntry {
      product,
      weight,
      meal,
      date,
    } => {
      let date = date.unwrap_or_else(|| Local::now().date_naive());
      // Fill in nutrition when the product is in the cached catalog
      let known = sync
        .store()
        .get_snapshot()
        .and_then(|snapshot| snapshot.data.find_product(&product).cloned());
      let entry = match known {
        Some(p) => Entry::for_product(&p, meal, weight, date),
        None => Entry::new(EntryProduct::catalog(product), meal, weight, date),
      };
      print_json(&sync.add_entry(entry).await)
    }
    Command::DeleteEntry { id } => {
      print_json(&json!({ "success": sync.delete_entry(&id).await }))
    }
    Command::AddProduct {
      name,
      protein,
      fat,
      carbs,
      recipe,
    } => {
      let product = Product {
        is_recipe: recipe,
        ..Product::new(name, protein, fat, carbs)
      };
      print_json(&sync.add_product(product).await)
    }
    Command::DeleteProduct { id } => print_json(&json!({ "success": sync.delete_product(&id) })),
    Command::Search { query } => print_json(&sync.gateway().search_products(&query).await?),
    Command::Nutrition { product_id, weight } => {
      print_json(&sync.gateway().product_nutrition(product_id, weight).await?)
    }
    Command::Summary { date } => {
      let date = date.unwrap_or_else(|| Local::now().date_naive());
      let state = sync
        .sync_all()
        .await
        .ok_or_else(|| eyre!("Server unreachable and nothing cached yet"))?;
      print_json(&DailySummary::for_date(&state, date))
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
