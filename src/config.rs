use std::str::FromStr;
use std::time::Duration;

use crate::constants::chain;
use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayKind {
  /// `POST {proxy}/vm-values/query`
  Proxy,
  /// Shell out to the chain CLI's `contract query`.
  Command,
}

impl FromStr for GatewayKind {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "proxy" => Ok(GatewayKind::Proxy),
      "command" => Ok(GatewayKind::Command),
      other => Err(ConfigError::UnknownGateway(other.to_owned())),
    }
  }
}

#[derive(Clone, Debug)]
pub struct Config {
  pub proxy_url: String,
  pub chain_id: String,
  pub job_board_address: String,
  pub work_escrow_address: String,
  pub db_path: String,
  pub poll_interval: Duration,
  pub page_size: u32,
  pub source_timeout: Duration,
  pub query_timeout: Duration,
  pub gateway: GatewayKind,
  pub query_command: String,
  pub bind: String,
  pub run_worker: bool,
}

impl Config {
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Builds the config from any key lookup, falling back to defaults for absent keys.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

    Ok(Config {
      proxy_url: string("PROXY_URL", "https://api.claws.network").trim_end_matches('/').to_owned(),
      chain_id: string("CHAIN_ID", "C"),
      job_board_address: string("JOB_BOARD_ADDRESS", ""),
      work_escrow_address: string("WORK_ESCROW_ADDRESS", ""),
      db_path: string("INDEXER_DB_PATH", "./indexer.db"),
      poll_interval: Duration::from_secs(parse(&lookup, "INDEXER_POLL_INTERVAL", 15)?),
      page_size: parse(&lookup, "INDEXER_PAGE_SIZE", chain::DEFAULT_PAGE_SIZE)?,
      source_timeout: Duration::from_secs(parse(&lookup, "TX_SOURCE_TIMEOUT", 20)?),
      query_timeout: Duration::from_secs(parse(&lookup, "QUERY_TIMEOUT", 30)?),
      gateway: string("QUERY_GATEWAY", "proxy").parse()?,
      query_command: string("QUERY_COMMAND", "clawpy"),
      bind: string("BIND", "127.0.0.1:8787"),
      run_worker: parse_flag(&lookup, "RUN_WORKER", true)?,
    })
  }

  pub fn has_job_board(&self) -> bool {
    !self.job_board_address.is_empty()
  }

  pub fn has_work_escrow(&self) -> bool {
    !self.work_escrow_address.is_empty()
  }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
  F: Fn(&str) -> Option<String>,
  T: FromStr,
{
  match lookup(key) {
    Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::Invalid(key, value)),
    None => Ok(default),
  }
}

fn parse_flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
  F: Fn(&str) -> Option<String>,
{
  match lookup(key) {
    Some(value) => match value.trim() {
      "true" | "t" | "1" => Ok(true),
      "false" | "f" | "0" => Ok(false),
      _ => Err(ConfigError::Invalid(key, value)),
    },
    None => Ok(default),
  }
}
