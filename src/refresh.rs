use serde_json::Value;

use crate::config::Config;
use crate::constants::View;
use crate::db::{self, DbPool};
use crate::decode::{self, AgreementDecoder, FieldDecoder, JobDecoder, ReputationDecoder};
use crate::error::IndexerError;
use crate::models;
use crate::rpc::QueryGateway;
use crate::utils;

/// Queries the gateway for an entity's canonical state and projects it into the store.
///
/// Every refresh returns `Ok(true)` when a row was written and `Ok(false)` when the
/// gateway reported no such entity (or the refresh does not apply). `tx_hash` is empty
/// for refreshes triggered by a read-through miss rather than by a transaction.
///
/// A connection is checked out only for the final upsert, never across a gateway query.
pub struct Refresher<'a> {
  pool: &'a DbPool,
  gateway: &'a dyn QueryGateway,
  config: &'a Config,
}

impl<'a> Refresher<'a> {
  pub fn new(pool: &'a DbPool, gateway: &'a dyn QueryGateway, config: &'a Config) -> Self {
    Refresher { pool, gateway, config }
  }

  pub fn job(&self, job_id: i64, tx_hash: &str) -> Result<bool, IndexerError> {
    trace!("refresh job {} ({})", job_id, tx_hash);
    let payload = self.query(&self.config.job_board_address, View::GetJob, &[job_id.to_string()])?;
    if decode::is_empty_response(&payload) {
      debug!("job {} does not exist on chain", job_id);
      return Ok(false);
    }

    let fields = JobDecoder.decode(&payload);
    let raw_json = serde_json::to_string(&payload)?;
    db::upsert_job(&*self.pool.get()?, models::NewJob {
      job_id,
      status: fields.status.as_deref(),
      employer: fields.employer.as_deref(),
      updated_ts_ms: utils::now_ms(),
      source_tx_hash: source_hash(tx_hash),
      raw_json: &raw_json,
    })?;
    Ok(true)
  }

  pub fn agreement(&self, agreement_id: i64, tx_hash: &str) -> Result<bool, IndexerError> {
    trace!("refresh agreement {} ({})", agreement_id, tx_hash);
    let payload = self.query(&self.config.work_escrow_address, View::GetAgreement, &[agreement_id.to_string()])?;
    if decode::is_empty_response(&payload) {
      debug!("agreement {} does not exist on chain", agreement_id);
      return Ok(false);
    }

    let fields = AgreementDecoder.decode(&payload);
    let raw_json = serde_json::to_string(&payload)?;
    db::upsert_agreement(&*self.pool.get()?, models::NewAgreement {
      agreement_id,
      status: fields.status.as_deref(),
      employer: fields.employer.as_deref(),
      worker: fields.worker.as_deref(),
      updated_ts_ms: utils::now_ms(),
      source_tx_hash: source_hash(tx_hash),
      raw_json: &raw_json,
    })?;
    Ok(true)
  }

  /// No-op for anything that is not an agent address.
  pub fn reputation(&self, agent: &str, tx_hash: &str) -> Result<bool, IndexerError> {
    if !decode::is_agent_address(agent) {
      return Ok(false);
    }
    trace!("refresh reputation {} ({})", agent, tx_hash);
    let payload = self.query(&self.config.work_escrow_address, View::GetAgentReputation, &[format!("addr:{}", agent)])?;
    if decode::is_empty_response(&payload) {
      return Ok(false);
    }

    let fields = ReputationDecoder.decode(&payload);
    let raw_json = serde_json::to_string(&payload)?;
    db::upsert_reputation(&*self.pool.get()?, models::NewReputation {
      agent,
      score: fields.score,
      updated_ts_ms: utils::now_ms(),
      source_tx_hash: source_hash(tx_hash),
      raw_json: &raw_json,
    })?;
    Ok(true)
  }

  /// Refreshes the stats singleton. Needs both contracts configured.
  pub fn stats(&self) -> Result<bool, IndexerError> {
    if !self.config.has_job_board() || !self.config.has_work_escrow() {
      return Ok(false);
    }
    let board = self.query(&self.config.job_board_address, View::GetBoardStats, &[])?;
    let protocol = self.query(&self.config.work_escrow_address, View::GetProtocolStats, &[])?;
    db::upsert_stats(
      &*self.pool.get()?,
      utils::now_ms(),
      &serde_json::to_string(&board)?,
      &serde_json::to_string(&protocol)?,
    )?;
    Ok(true)
  }

  fn query(&self, contract: &str, view: View, args: &[String]) -> Result<Value, IndexerError> {
    if contract.is_empty() {
      return Err(IndexerError::Gateway(format!("no contract address configured for {}", view)));
    }
    self.gateway.query(contract, &view.to_string(), args)
  }
}

fn source_hash(tx_hash: &str) -> Option<&str> {
  if tx_hash.is_empty() { None } else { Some(tx_hash) }
}
