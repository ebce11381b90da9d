use cached_resource::config::Config;
use cached_resource::{
  logging, CacheRegistry, CachedFinder, FindOptions, HttpFinder, Params, Record,
};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cached-resource")]
#[command(about = "Fetch REST resources through a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cached-resource/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch one record by id
  Get {
    model: String,
    id: String,
    /// Bypass the cache
    #[arg(long)]
    reload: bool,
    /// Request parameter, repeatable
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,
  },
  /// Fetch a collection
  List {
    model: String,
    #[arg(long)]
    reload: bool,
    #[arg(short, long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,
  },
  /// Clear cached entries of a model's key prefix
  Clear {
    model: String,
    /// Only clear keys starting with this pattern
    pattern: Option<String>,
  },
}

/// `name=value`; the value is read as JSON when it parses, as a string otherwise.
fn parse_param(raw: &str) -> Result<(String, Value), String> {
  let (name, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected name=value, got `{}`", raw))?;
  let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
  Ok((name.to_string(), value))
}

fn options(reload: bool, params: Vec<(String, Value)>) -> FindOptions {
  FindOptions::new()
    .reload(reload)
    .params(params.into_iter().collect::<Params>())
}

fn finder(config: &Config, registry: &CacheRegistry, model: &str) -> Result<CachedFinder<HttpFinder>> {
  let mut http = HttpFinder::new(&config.site, config.resource(model))?;
  if let Some(user) = &config.user {
    http = http.with_basic_auth(user, Config::get_password());
  }

  let strategy = config.cache.build_strategy()?;
  registry.setup(config.cache.configuration(model, strategy)?)?;
  Ok(registry.finder(http)?)
}

fn print_records(records: &[Record]) -> Result<()> {
  let attributes: Vec<_> = records.iter().map(Record::attributes).collect();
  println!("{}", serde_json::to_string_pretty(&attributes)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  logging::init(&config.log.level, config.log.file.as_deref())?;

  let registry = CacheRegistry::new();

  match args.command {
    Command::Get {
      model,
      id,
      reload,
      params,
    } => {
      let finder = finder(&config, &registry, &model)?;
      let record = finder.find_one(id, options(reload, params)).await?;
      println!("{}", serde_json::to_string_pretty(record.attributes())?);
    }
    Command::List {
      model,
      reload,
      params,
    } => {
      let finder = finder(&config, &registry, &model)?;
      let records = finder.all(options(reload, params)).into_vec().await?;
      print_records(&records)?;
    }
    Command::Clear { model, pattern } => {
      let finder = finder(&config, &registry, &model)?;
      if !finder.clear_cache(pattern.as_deref())? {
        return Err(eyre!("The {} cache could not be cleared", model));
      }
      eprintln!("Cleared {} cache", model);
    }
  }

  Ok(())
}
