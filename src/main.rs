use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

use storesync::api::{ApiRequest, Method};
use storesync::config::Config;
use storesync::connectivity;
use storesync::facade::{MutationOutcome, Params, Resource};
use storesync::queue::Callbacks;
use storesync::{logging, ClientContext};

#[derive(Parser, Debug)]
#[command(name = "storesync")]
#[command(about = "Offline-tolerant storefront API client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Skip the reachability probe and start offline
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read a resource, falling back to the cache when unreachable
  Get {
    #[arg(value_parser = parse_resource)]
    resource: Resource,
    /// Entity id (order id for delivery_location, report for analytics)
    #[arg(long)]
    id: Option<String>,
    /// Query parameter as key=value; repeatable
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
  },
  /// Send a raw request; writes are queued when the server is unreachable
  Send {
    method: Method,
    path: String,
    /// JSON request body
    #[arg(long)]
    body: Option<String>,
  },
  /// Inspect or operate the offline queue
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
  /// Manage cached reads
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
  /// Store a bearer token for subsequent requests
  Login { token: String },
  /// Forget the stored bearer token
  Logout,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
  Status,
  Drain,
  Clear,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  Clear {
    /// Only evict keys under this prefix, e.g. `analytics_`
    #[arg(long)]
    prefix: Option<String>,
  },
}

fn parse_resource(s: &str) -> Result<Resource, String> {
  Resource::from_name(s).ok_or_else(|| {
    let names: Vec<&str> = Resource::ALL.iter().map(|r| r.name()).collect();
    format!("unknown resource {}, expected one of: {}", s, names.join(", "))
  })
}

fn parse_param(s: &str) -> Result<(String, String), String> {
  s.split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected key=value, got {}", s))
}

fn print_json(value: &impl Serialize) -> Result<()> {
  let rendered =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to render output: {}", e))?;
  println!("{}", rendered);
  Ok(())
}

fn require_id(resource: Resource, id: Option<String>) -> Result<String> {
  id.ok_or_else(|| eyre!("--id is required for {}", resource))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let data_dir = logging::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
  let _guard = logging::init(&data_dir)?;

  let online = if args.offline {
    false
  } else {
    connectivity::probe(&config.api.base_url()?, config.api.timeout()).await
  };

  let ctx = ClientContext::from_config(&config, online)?;
  // The process exits after one command; queued writes replay on `queue drain`
  ctx.queue.set_background_drain(false);

  match args.command {
    Command::Get {
      resource,
      id,
      params,
    } => {
      let params: Params = params.into_iter().collect();
      let api = &ctx.api;
      let fetched = match resource {
        Resource::Products => api.products(&params).await,
        Resource::Product => api.product(&require_id(resource, id)?).await,
        Resource::Categories => api.categories().await,
        Resource::Orders => api.orders(&params).await,
        Resource::Order => api.order(&require_id(resource, id)?).await,
        Resource::Cart => {
          let cart = api.cart().await?;
          return print_json(&cart);
        }
        Resource::DeliveryLocation => api.delivery_location(&require_id(resource, id)?).await,
        Resource::Analytics => api.analytics(&require_id(resource, id)?, &params).await,
        Resource::Profile => api.profile().await,
      }?;
      print_json(&fetched)?;
    }
    Command::Send { method, path, body } => {
      let body: Option<Value> = body
        .map(|b| serde_json::from_str(&b).map_err(|e| eyre!("Invalid --body JSON: {}", e)))
        .transpose()?;
      let mut request = ApiRequest::new(method, path);
      if let Some(body) = body {
        request = request.with_body(body);
      }

      if method.is_mutation() {
        let outcome = ctx.api.mutate(request, &[], Callbacks::new()).await?;
        match outcome {
          MutationOutcome::Completed(body) => print_json(&body)?,
          MutationOutcome::Queued { id } => {
            print_json(&json!({ "queued": id }))?
          }
        }
      } else {
        let response = ctx.pipeline.send(&request).await?;
        print_json(&response.body)?;
      }
    }
    Command::Queue { action } => match action {
      QueueAction::Status => print_json(&ctx.queue.status())?,
      QueueAction::Drain => print_json(&ctx.queue.drain().await)?,
      QueueAction::Clear => ctx.queue.clear(),
    },
    Command::Cache { action } => match action {
      CacheAction::Clear { prefix } => {
        let evicted = match prefix {
          Some(prefix) => ctx.cache.evict_by_prefix(&prefix),
          None => ctx.cache.clear(),
        };
        print_json(&json!({ "evicted": evicted }))?;
      }
    },
    Command::Login { token } => {
      ctx.credentials.set(&token)?;
    }
    Command::Logout => {
      ctx.credentials.clear();
    }
  }

  Ok(())
}
