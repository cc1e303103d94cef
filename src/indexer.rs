//! Poll-and-reconcile pipeline.
//!
//! Each contract is processed from its checkpoint: new transactions are stored raw,
//! mutating calls are decoded and dispatched to the entity refreshers, and the
//! checkpoint is advanced only once the whole batch has been applied. Every write
//! is an upsert, so a batch re-delivered after a crash is safe to re-apply, except
//! for creation calls whose id is derived from the current maximum.

use diesel::SqliteConnection;
use std::cmp::max;
use std::sync::Arc;

use crate::config::Config;
use crate::constants::Contract;
use crate::db::{self, DbPool};
use crate::decode::{self, DecodedCall};
use crate::error::IndexerError;
use crate::models;
use crate::refresh::Refresher;
use crate::responses::ChainTransaction;
use crate::rpc::{QueryGateway, TransactionSource};

/// Everything the poller and the read API need, passed explicitly.
#[derive(Clone)]
pub struct IndexerContext {
  pub pool: DbPool,
  pub config: Arc<Config>,
  pub source: Arc<dyn TransactionSource>,
  pub gateway: Arc<dyn QueryGateway>,
}

impl IndexerContext {
  pub fn new(
    pool: DbPool,
    config: Config,
    source: Arc<dyn TransactionSource>,
    gateway: Arc<dyn QueryGateway>,
  ) -> Self {
    IndexerContext { pool, config: Arc::new(config), source, gateway }
  }

  pub fn refresher(&self) -> Refresher<'_> {
    Refresher::new(&self.pool, self.gateway.as_ref(), &self.config)
  }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchReport {
  pub fetched: usize,
  pub processed: usize,
  pub refreshed: usize,
  pub checkpoint: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
  Skipped,
  Indexed(BatchReport),
  Refreshed(bool),
  Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
  pub job_board: StageOutcome,
  pub work_escrow: StageOutcome,
  pub stats: StageOutcome,
}

/// Runs one full poll cycle. A failing stage is logged and does not stop the others.
pub fn run_cycle(ctx: &IndexerContext) -> CycleReport {
  let job_board = run_contract_stage(ctx, Contract::JobBoard, &ctx.config.job_board_address);
  let work_escrow = run_contract_stage(ctx, Contract::WorkEscrow, &ctx.config.work_escrow_address);
  let stats = match ctx.refresher().stats() {
    Ok(refreshed) => StageOutcome::Refreshed(refreshed),
    Err(err) => {
      error!("stats refresh failed: {}", err);
      StageOutcome::Failed(err.to_string())
    }
  };
  CycleReport { job_board, work_escrow, stats }
}

fn run_contract_stage(ctx: &IndexerContext, contract: Contract, address: &str) -> StageOutcome {
  if address.is_empty() {
    return StageOutcome::Skipped;
  }

  match process_contract(&ctx.pool, ctx.source.as_ref(), &ctx.refresher(), contract, address) {
    Ok(report) => {
      if report.processed > 0 {
        info!(
          "{}: processed {} of {} transactions, {} refreshed, checkpoint {}",
          contract, report.processed, report.fetched, report.refreshed, report.checkpoint
        );
      }
      StageOutcome::Indexed(report)
    }
    Err(err) => {
      error!("{} poll failed, will retry from the same checkpoint: {}", contract, err);
      StageOutcome::Failed(err.to_string())
    }
  }
}

/// Fetches the newest page for `address` and applies everything past the checkpoint.
///
/// Connections are checked out per store step and released before any gateway query.
pub fn process_contract(
  pool: &DbPool,
  source: &dyn TransactionSource,
  refresher: &Refresher,
  contract: Contract,
  address: &str,
) -> Result<BatchReport, IndexerError> {
  let txs = source.recent_transactions(address)?;
  let last_ts = db::get_last_timestamp(&*pool.get()?, address)?;
  let mut report = BatchReport { fetched: txs.len(), checkpoint: last_ts, ..Default::default() };

  let mut pending: Vec<ChainTransaction> = txs.into_iter().filter(|tx| tx.timestamp > last_ts).collect();
  // stable, so same-timestamp transactions keep feed order
  pending.sort_by_key(|tx| tx.timestamp);
  debug!("{}: {} fetched, {} past checkpoint {}", contract, report.fetched, pending.len(), last_ts);

  let mut max_ts = last_ts;
  for tx in &pending {
    max_ts = max(max_ts, tx.timestamp);
    report.refreshed += apply_transaction(pool, refresher, contract, address, tx)?;
    report.processed += 1;
  }

  if max_ts > last_ts {
    db::set_last_timestamp(&*pool.get()?, address, max_ts)?;
    report.checkpoint = max_ts;
  }
  Ok(report)
}

/// Stores the raw transaction and refreshes whatever it touched. Returns the number of rows refreshed.
fn apply_transaction(
  pool: &DbPool,
  refresher: &Refresher,
  contract: Contract,
  address: &str,
  tx: &ChainTransaction,
) -> Result<usize, IndexerError> {
  let call = match tx.data.as_deref() {
    Some(data) => decode::decode_call_data(data).unwrap_or_else(|| {
      debug!("{}: payload is not valid base64", tx.tx_hash);
      DecodedCall::default()
    }),
    None => DecodedCall::default(),
  };
  let function = match tx.function.as_deref() {
    Some(explicit) if !explicit.is_empty() => explicit,
    _ => call.function.as_str(),
  };

  let raw_json = serde_json::to_string(&tx.raw)?;
  let conn = pool.get()?;
  db::insert_transaction(&conn, models::NewRawTransaction {
    tx_hash: &tx.tx_hash,
    contract: address,
    function_name: if function.is_empty() { None } else { Some(function) },
    sender: tx.sender.as_deref(),
    receiver: tx.receiver.as_deref(),
    ts_ms: tx.timestamp,
    status: tx.status.as_deref(),
    raw_json: &raw_json,
  })?;

  if !contract.is_mutable(function) || call.args.is_empty() {
    return Ok(0);
  }
  let target = target_id(&conn, contract, function, &call)?;
  drop(conn);

  let mut refreshed = 0;
  match contract {
    Contract::JobBoard => {
      if let Some(job_id) = target {
        refreshed += refresher.job(job_id, &tx.tx_hash)? as usize;
      }
    }
    Contract::WorkEscrow => {
      if let Some(agreement_id) = target {
        refreshed += refresher.agreement(agreement_id, &tx.tx_hash)? as usize;
      }
      if let Some(sender) = tx.sender.as_deref() {
        refreshed += refresher.reputation(sender, &tx.tx_hash)? as usize;
      }
    }
  }
  Ok(refreshed)
}

/// The entity a mutating call targets. Creation calls carry no id, so the next one
/// is assumed to be `max stored id + 1`; this only holds while creations are applied
/// in chain order by a single indexer.
fn target_id(
  conn: &SqliteConnection,
  contract: Contract,
  function: &str,
  call: &DecodedCall,
) -> Result<Option<i64>, IndexerError> {
  if function == contract.creation_function() {
    let current = match contract {
      Contract::JobBoard => db::max_job_id(conn)?,
      Contract::WorkEscrow => db::max_agreement_id(conn)?,
    };
    return Ok(Some(current + 1));
  }

  let id = call.args.first().and_then(|arg| decode::hex_arg_to_id(arg));
  if id.is_none() {
    debug!("{}: first argument of {} is not a hex id", contract, function);
  }
  Ok(id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema;
  use crate::test_utils::*;
  use diesel::prelude::*;
  use serde_json::json;

  type Snapshot = (
    Vec<models::Checkpoint>,
    Vec<models::RawTransaction>,
    Vec<(i64, Option<String>, Option<String>, String)>,
    Vec<(i64, Option<String>, String)>,
    Vec<(String, Option<i64>)>,
  );

  fn snapshot(conn: &SqliteConnection) -> Snapshot {
    (
      schema::checkpoints::table.order(schema::checkpoints::contract).load(conn).unwrap(),
      schema::transactions::table.order(schema::transactions::tx_hash).load(conn).unwrap(),
      schema::jobs::table
        .select((schema::jobs::job_id, schema::jobs::status, schema::jobs::source_tx_hash, schema::jobs::raw_json))
        .order(schema::jobs::job_id)
        .load(conn)
        .unwrap(),
      schema::agreements::table
        .select((schema::agreements::agreement_id, schema::agreements::status, schema::agreements::raw_json))
        .order(schema::agreements::agreement_id)
        .load(conn)
        .unwrap(),
      schema::reputations::table
        .select((schema::reputations::agent, schema::reputations::score))
        .order(schema::reputations::agent)
        .load(conn)
        .unwrap(),
    )
  }

  fn process(ctx: &IndexerContext, contract: Contract) -> Result<BatchReport, IndexerError> {
    let address = match contract {
      Contract::JobBoard => BOARD,
      Contract::WorkEscrow => ESCROW,
    };
    process_contract(&ctx.pool, ctx.source.as_ref(), &ctx.refresher(), contract, address)
  }

  fn context(source: Arc<FakeSource>, gateway: Arc<FakeGateway>) -> IndexerContext {
    IndexerContext::new(memory_pool(), test_config(), source, gateway)
  }

  #[test]
  fn first_created_job_gets_id_one() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    source.set_page(BOARD, vec![call_tx("0x01", 100, EMPLOYER, "createJob", &["697066733a2f2f6a6f62"])]);
    gateway.respond("getJob", &["1"], json!({ "id": 1, "employer": EMPLOYER, "status": "Open" }));
    let ctx = context(source, gateway.clone());

    let report = process(&ctx, Contract::JobBoard).unwrap();

    assert_eq!(report, BatchReport { fetched: 1, processed: 1, refreshed: 1, checkpoint: 100 });
    let conn = ctx.pool.get().unwrap();
    let job = db::find_job(&conn, 1).unwrap().unwrap();
    assert_eq!(job.status.as_deref(), Some("Open"));
    assert_eq!(job.source_tx_hash.as_deref(), Some("0x01"));
    assert_eq!(gateway.calls_to("getJob"), vec![vec![String::from("1")]]);
  }

  #[test]
  fn creations_in_one_batch_are_numbered_in_timestamp_order() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    source.set_page(BOARD, vec![
      call_tx("0xlate", 300, EMPLOYER, "createJob", &["01"]),
      call_tx("0xearly", 200, EMPLOYER, "createJob", &["01"]),
    ]);
    gateway.respond("getJob", &["1"], json!({ "id": 1 }));
    gateway.respond("getJob", &["2"], json!({ "id": 2 }));
    let ctx = context(source, gateway);

    process(&ctx, Contract::JobBoard).unwrap();

    let conn = ctx.pool.get().unwrap();
    assert_eq!(db::find_job(&conn, 1).unwrap().unwrap().source_tx_hash.as_deref(), Some("0xearly"));
    assert_eq!(db::find_job(&conn, 2).unwrap().unwrap().source_tx_hash.as_deref(), Some("0xlate"));
  }

  #[test]
  fn activations_in_one_batch_are_numbered_in_timestamp_order() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    source.set_page(ESCROW, vec![
      call_tx("0xa2", 20, EMPLOYER, "activateAgreement", &["05", "01"]),
      call_tx("0xa1", 10, EMPLOYER, "activateAgreement", &["04", "01"]),
    ]);
    gateway.respond("getAgreement", &["1"], json!([EMPLOYER, WORKER, "PendingFunding"]));
    gateway.respond("getAgreement", &["2"], json!([EMPLOYER, WORKER, "PendingFunding"]));
    let rep_arg = format!("addr:{}", EMPLOYER);
    gateway.respond("getAgentReputation", &[rep_arg.as_str()], json!({ "score": 300 }));
    let ctx = context(source, gateway.clone());

    let report = process(&ctx, Contract::WorkEscrow).unwrap();

    assert_eq!(report.refreshed, 4);
    assert_eq!(gateway.calls_to("getAgreement"), vec![vec![String::from("1")], vec![String::from("2")]]);
    assert_eq!(gateway.calls_to("getAgentReputation"), vec![vec![rep_arg.clone()], vec![rep_arg]]);
    let conn = ctx.pool.get().unwrap();
    assert_eq!(db::max_agreement_id(&conn).unwrap(), 2);
    assert_eq!(db::find_agreement(&conn, 1).unwrap().unwrap().source_tx_hash.as_deref(), Some("0xa1"));
    assert_eq!(db::find_agreement(&conn, 2).unwrap().unwrap().source_tx_hash.as_deref(), Some("0xa2"));
    assert_eq!(db::find_reputation(&conn, EMPLOYER).unwrap().unwrap().score, Some(300));
  }

  #[test]
  fn store_connection_is_released_before_gateway_queries() {
    let pool = memory_pool();
    let source = Arc::new(FakeSource::default());
    source.set_page(ESCROW, vec![call_tx("0x70", 70, WORKER, "fundWorkerBond", &["03"])]);
    let gateway = Arc::new(PoolWatchingGateway::new(pool.clone(), json!({ "status": "Active" })));
    let ctx = IndexerContext::new(pool, test_config(), source, gateway.clone());

    let report = process(&ctx, Contract::WorkEscrow).unwrap();

    assert_eq!(report.refreshed, 2);
    assert_eq!(gateway.free_during_queries(), vec![true, true]);
  }

  #[test]
  fn milestone_call_refreshes_agreement_and_sender_reputation() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    source.set_page(ESCROW, vec![call_tx("0x10", 50, WORKER, "submitMilestone", &["2A", "01", "70726f6f66"])]);
    gateway.respond("getAgreement", &["42"], json!([EMPLOYER, WORKER, "Active"]));
    let rep_arg = format!("addr:{}", WORKER);
    gateway.respond("getAgentReputation", &[rep_arg.as_str()], json!({ "score": 510 }));
    let ctx = context(source, gateway.clone());

    let report = process(&ctx, Contract::WorkEscrow).unwrap();

    assert_eq!(report.refreshed, 2);
    assert_eq!(gateway.calls_to("getAgreement"), vec![vec![String::from("42")]]);
    assert_eq!(gateway.calls_to("getAgentReputation"), vec![vec![rep_arg]]);
    let conn = ctx.pool.get().unwrap();
    assert_eq!(db::find_agreement(&conn, 42).unwrap().unwrap().status.as_deref(), Some("Active"));
    assert_eq!(db::find_reputation(&conn, WORKER).unwrap().unwrap().score, Some(510));
  }

  #[test]
  fn explicit_function_field_wins_over_payload() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    let mut tx = call_tx("0x20", 10, EMPLOYER, "ignored", &["07"]);
    tx["function"] = json!("cancelJob");
    source.set_page(BOARD, vec![tx]);
    let ctx = context(source, gateway.clone());

    process(&ctx, Contract::JobBoard).unwrap();

    assert_eq!(gateway.calls_to("getJob"), vec![vec![String::from("7")]]);
    let conn = ctx.pool.get().unwrap();
    let raw = db::find_transaction(&conn, "0x20").unwrap().unwrap();
    assert_eq!(raw.function_name.as_deref(), Some("cancelJob"));
  }

  #[test]
  fn undecodable_payload_still_persists_raw_record() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    source.set_page(BOARD, vec![
      json!({ "txHash": "0xbad", "timestamp": 70, "sender": EMPLOYER, "data": "%%% not base64 %%%" }),
      call_tx("0xnohex", 80, EMPLOYER, "apply", &["zz"]),
      call_tx("0xnoargs", 90, EMPLOYER, "expireJob", &[]),
    ]);
    let ctx = context(source, gateway.clone());

    let report = process(&ctx, Contract::JobBoard).unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.checkpoint, 90);
    assert!(gateway.calls().is_empty());
    let conn = ctx.pool.get().unwrap();
    let bad = db::find_transaction(&conn, "0xbad").unwrap().unwrap();
    assert!(bad.function_name.is_none());
    assert_eq!(bad.ts_ms, 70);
    assert!(db::transaction_exists(&conn, "0xnohex").unwrap());
    assert!(db::transaction_exists(&conn, "0xnoargs").unwrap());
  }

  #[test]
  fn non_mutating_and_foreign_functions_only_store_raw() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    source.set_page(BOARD, vec![
      call_tx("0x30", 10, EMPLOYER, "setPaused", &["01"]),
      call_tx("0x31", 11, EMPLOYER, "submitMilestone", &["01"]),
    ]);
    let ctx = context(source, gateway.clone());

    assert_eq!(process(&ctx, Contract::JobBoard).unwrap().refreshed, 0);
    assert!(gateway.calls().is_empty());
  }

  #[test]
  fn reprocessing_the_same_batch_is_idempotent() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    source.set_page(ESCROW, vec![
      call_tx("0x40", 10, WORKER, "submitMilestone", &["03"]),
      call_tx("0x41", 20, EMPLOYER, "approveMilestone", &["03", "00"]),
    ]);
    gateway.respond("getAgreement", &["3"], json!([EMPLOYER, WORKER, "Active"]));
    let ctx = context(source, gateway);

    process(&ctx, Contract::WorkEscrow).unwrap();
    let conn = ctx.pool.get().unwrap();
    let first = snapshot(&conn);
    drop(conn);

    let again = process(&ctx, Contract::WorkEscrow).unwrap();
    assert_eq!(again.processed, 0);
    let conn = ctx.pool.get().unwrap();
    assert_eq!(snapshot(&conn), first);

    // a crash before the checkpoint write re-delivers the whole batch
    diesel::delete(schema::checkpoints::table).execute(&conn).unwrap();
    drop(conn);
    let redelivered = process(&ctx, Contract::WorkEscrow).unwrap();
    assert_eq!(redelivered.processed, 2);
    let conn = ctx.pool.get().unwrap();
    assert_eq!(snapshot(&conn), first);
  }

  #[test]
  fn checkpoint_never_moves_backwards() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    let ctx = context(source.clone(), gateway);
    let checkpoint = |ctx: &IndexerContext| db::get_last_timestamp(&ctx.pool.get().unwrap(), BOARD).unwrap();

    source.set_page(BOARD, vec![call_tx("0x50", 500, EMPLOYER, "apply", &["01"])]);
    process(&ctx, Contract::JobBoard).unwrap();
    assert_eq!(checkpoint(&ctx), 500);

    source.set_page(BOARD, vec![
      call_tx("0x50", 500, EMPLOYER, "apply", &["01"]),
      call_tx("0x49", 400, EMPLOYER, "apply", &["01"]),
    ]);
    let report = process(&ctx, Contract::JobBoard).unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(checkpoint(&ctx), 500);

    source.set_page(BOARD, vec![]);
    process(&ctx, Contract::JobBoard).unwrap();
    assert_eq!(checkpoint(&ctx), 500);

    source.set_page(BOARD, vec![call_tx("0x51", 501, EMPLOYER, "apply", &["01"])]);
    process(&ctx, Contract::JobBoard).unwrap();
    assert_eq!(checkpoint(&ctx), 501);
  }

  #[test]
  fn gateway_failure_keeps_checkpoint_but_raw_rows_remain() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    source.set_page(BOARD, vec![call_tx("0x60", 60, EMPLOYER, "acceptOffer", &["02", "01"])]);
    gateway.fail_with("gateway down");
    let ctx = context(source, gateway);

    assert!(process(&ctx, Contract::JobBoard).is_err());

    let conn = ctx.pool.get().unwrap();
    assert_eq!(db::get_last_timestamp(&conn, BOARD).unwrap(), 0);
    assert!(db::transaction_exists(&conn, "0x60").unwrap());
  }

  #[test]
  fn cycle_isolates_failing_stages() {
    let source = Arc::new(FakeSource::default());
    let gateway = Arc::new(FakeGateway::default());
    source.fail_with("feed down");
    gateway.respond("getBoardStats", &[], json!({ "total_jobs": 0 }));
    gateway.respond("getProtocolStats", &[], json!({ "total_agreements": 0 }));
    let ctx = context(source, gateway);

    let report = run_cycle(&ctx);

    assert!(matches!(report.job_board, StageOutcome::Failed(_)));
    assert!(matches!(report.work_escrow, StageOutcome::Failed(_)));
    assert_eq!(report.stats, StageOutcome::Refreshed(true));
  }

  #[test]
  fn cycle_skips_unconfigured_contracts() {
    let mut config = test_config();
    config.job_board_address = String::new();
    let ctx = IndexerContext::new(memory_pool(), config, Arc::new(FakeSource::default()), Arc::new(FakeGateway::default()));

    let report = run_cycle(&ctx);

    assert_eq!(report.job_board, StageOutcome::Skipped);
    assert_eq!(report.work_escrow, StageOutcome::Indexed(BatchReport::default()));
    assert_eq!(report.stats, StageOutcome::Refreshed(false));
  }
}
