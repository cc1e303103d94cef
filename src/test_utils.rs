//! In-memory store and recording fakes for the chain collaborators.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::Config;
use crate::db::{self, DbPool};
use crate::error::IndexerError;
use crate::responses::ChainTransaction;
use crate::rpc::{QueryGateway, TransactionSource};

pub const BOARD: &str = "claw1board";
pub const ESCROW: &str = "claw1escrow";
pub const EMPLOYER: &str = "claw1qqqqqqqqqqqqqpgqemployeremployeremployeremployeremployer0";
pub const WORKER: &str = "claw1qqqqqqqqqqqqqpgqworkerworkerworkerworkerworkerworkerwork1";
pub const AGENT: &str = "claw1agent0000000000000000000000000000000000000000000000000000";

/// A single shared connection, so every checkout sees the same in-memory database.
pub fn memory_pool() -> DbPool {
  db::establish_pool(":memory:", 1).expect("in-memory database")
}

pub fn test_config() -> Config {
  let mut config = Config::from_lookup(|_| None).expect("default config");
  config.job_board_address = BOARD.to_owned();
  config.work_escrow_address = ESCROW.to_owned();
  config
}

pub type Call = (String, String, Vec<String>);

/// Answers views from canned responses keyed by `(function, args)`; unknown keys answer `null`.
#[derive(Default)]
pub struct FakeGateway {
  responses: Mutex<HashMap<(String, Vec<String>), Value>>,
  failure: Mutex<Option<String>>,
  calls: Mutex<Vec<Call>>,
}

impl FakeGateway {
  pub fn respond(&self, function: &str, args: &[&str], value: Value) {
    let key = (function.to_owned(), args.iter().map(|a| a.to_string()).collect());
    self.responses.lock().unwrap().insert(key, value);
  }

  pub fn fail_with(&self, message: &str) {
    *self.failure.lock().unwrap() = Some(message.to_owned());
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, function: &str) -> Vec<Vec<String>> {
    self.calls().into_iter().filter(|c| c.1 == function).map(|c| c.2).collect()
  }
}

impl QueryGateway for FakeGateway {
  fn query(&self, contract: &str, function: &str, args: &[String]) -> Result<Value, IndexerError> {
    self.calls.lock().unwrap().push((contract.to_owned(), function.to_owned(), args.to_vec()));
    if let Some(message) = self.failure.lock().unwrap().clone() {
      return Err(IndexerError::Gateway(message));
    }
    let key = (function.to_owned(), args.to_vec());
    Ok(self.responses.lock().unwrap().get(&key).cloned().unwrap_or(Value::Null))
  }
}

/// Answers every view with the same payload and records whether the pool still had
/// a free connection at the moment of each query.
pub struct PoolWatchingGateway {
  pool: DbPool,
  payload: Value,
  free: Mutex<Vec<bool>>,
}

impl PoolWatchingGateway {
  pub fn new(pool: DbPool, payload: Value) -> Self {
    PoolWatchingGateway { pool, payload, free: Mutex::new(vec![]) }
  }

  pub fn free_during_queries(&self) -> Vec<bool> {
    self.free.lock().unwrap().clone()
  }
}

impl QueryGateway for PoolWatchingGateway {
  fn query(&self, _contract: &str, _function: &str, _args: &[String]) -> Result<Value, IndexerError> {
    let free = self.pool.try_get().is_some();
    self.free.lock().unwrap().push(free);
    Ok(self.payload.clone())
  }
}

/// Serves a fixed page per contract.
#[derive(Default)]
pub struct FakeSource {
  pages: Mutex<HashMap<String, Vec<Value>>>,
  failure: Mutex<Option<String>>,
}

impl FakeSource {
  pub fn set_page(&self, contract: &str, page: Vec<Value>) {
    self.pages.lock().unwrap().insert(contract.to_owned(), page);
  }

  pub fn fail_with(&self, message: &str) {
    *self.failure.lock().unwrap() = Some(message.to_owned());
  }
}

impl TransactionSource for FakeSource {
  fn recent_transactions(&self, contract: &str) -> Result<Vec<ChainTransaction>, IndexerError> {
    if let Some(message) = self.failure.lock().unwrap().clone() {
      return Err(IndexerError::Gateway(message));
    }
    let page = self.pages.lock().unwrap().get(contract).cloned().unwrap_or_default();
    Ok(page.into_iter().map(ChainTransaction::from_value).collect::<Result<Vec<_>, _>>()?)
  }
}

/// A feed entry calling `function` with hex `args`, encoded the way the chain does.
pub fn call_tx(hash: &str, timestamp: i64, sender: &str, function: &str, args: &[&str]) -> Value {
  let mut data = function.to_owned();
  for arg in args {
    data.push('@');
    data.push_str(arg);
  }
  serde_json::json!({
    "txHash": hash,
    "timestamp": timestamp,
    "sender": sender,
    "receiver": BOARD,
    "status": "success",
    "data": base64::encode(data),
  })
}
