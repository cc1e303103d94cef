use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sqlite::Sqlite;

use crate::decode::{AgreementDecoder, FieldDecoder, JobDecoder, ReputationDecoder};
use crate::error::IndexerError;
use crate::models;
use crate::pagination::Page;

embed_migrations!();

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

/// Applied to every pooled connection. WAL lets the API read while the poller
/// writes; writers queue on the SQLite lock for up to `busy_timeout` ms.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
  pub busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
    conn
      .batch_execute(&format!(
        "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = {};",
        self.busy_timeout_ms
      ))
      .map_err(r2d2::Error::QueryError)
  }
}

/// Opens the database and creates the schema if absent.
pub fn establish_pool(db_path: &str, max_size: u32) -> Result<DbPool, IndexerError> {
  let manager = ConnectionManager::<SqliteConnection>::new(db_path);
  let pool = r2d2::Pool::builder()
    .max_size(max_size)
    .connection_customizer(Box::new(ConnectionOptions { busy_timeout_ms: 5000 }))
    .build(manager)?;

  let conn = pool.get()?;
  embedded_migrations::run(&*conn)?;
  Ok(pool)
}

pub fn get_last_timestamp(conn: &SqliteConnection, contract_address: &str) -> Result<i64, IndexerError> {
  use crate::schema::checkpoints::dsl::*;

  let ts = checkpoints
    .filter(contract.eq(contract_address))
    .select(last_timestamp_ms)
    .first::<i64>(conn)
    .optional()?;
  Ok(ts.unwrap_or(0))
}

/// Callers must never pass a value lower than the stored one.
pub fn set_last_timestamp(conn: &SqliteConnection, contract_address: &str, ts: i64) -> Result<(), IndexerError> {
  use crate::schema::checkpoints::dsl::*;

  let checkpoint = models::NewCheckpoint { contract: contract_address, last_timestamp_ms: ts };
  diesel::replace_into(checkpoints).values(&checkpoint).execute(conn)?;
  Ok(())
}

/// Inserts a raw transaction unless its hash is already stored. Returns whether a row was written.
pub fn insert_transaction(conn: &SqliteConnection, tx: models::NewRawTransaction) -> Result<bool, IndexerError> {
  use crate::schema::transactions::dsl::*;

  let inserted = diesel::insert_or_ignore_into(transactions).values(&tx).execute(conn)?;
  Ok(inserted > 0)
}

pub fn transaction_exists(conn: &SqliteConnection, hash: &str) -> Result<bool, IndexerError> {
  use crate::schema::transactions::dsl::*;

  Ok(diesel::select(diesel::dsl::exists(transactions.filter(tx_hash.eq(hash)))).get_result(conn)?)
}

pub fn find_transaction(conn: &SqliteConnection, hash: &str) -> Result<Option<models::RawTransaction>, IndexerError> {
  use crate::schema::transactions::dsl::*;

  Ok(transactions.find(hash).first::<models::RawTransaction>(conn).optional()?)
}

pub fn upsert_job(conn: &SqliteConnection, job: models::NewJob) -> Result<(), IndexerError> {
  use crate::schema::jobs::dsl::*;

  diesel::replace_into(jobs).values(&job).execute(conn)?;
  Ok(())
}

pub fn upsert_agreement(conn: &SqliteConnection, agreement: models::NewAgreement) -> Result<(), IndexerError> {
  use crate::schema::agreements::dsl::*;

  diesel::replace_into(agreements).values(&agreement).execute(conn)?;
  Ok(())
}

pub fn upsert_reputation(conn: &SqliteConnection, reputation: models::NewReputation) -> Result<(), IndexerError> {
  use crate::schema::reputations::dsl::*;

  diesel::replace_into(reputations).values(&reputation).execute(conn)?;
  Ok(())
}

pub fn upsert_stats(conn: &SqliteConnection, updated: i64, board: &str, protocol: &str) -> Result<(), IndexerError> {
  use crate::schema::stats::dsl::*;

  let row = models::Stats {
    id: 1,
    updated_ts_ms: updated,
    board_raw_json: board.to_owned(),
    protocol_raw_json: protocol.to_owned(),
  };
  diesel::replace_into(stats).values(&row).execute(conn)?;
  Ok(())
}

pub fn get_stats(conn: &SqliteConnection) -> Result<Option<models::Stats>, IndexerError> {
  use crate::schema::stats::dsl::*;

  Ok(stats.find(1).first::<models::Stats>(conn).optional()?)
}

/// Highest job id currently stored, 0 when the table is empty.
pub fn max_job_id(conn: &SqliteConnection) -> Result<i64, IndexerError> {
  use crate::schema::jobs::dsl::*;

  let max = jobs.select(diesel::dsl::max(job_id)).first::<Option<i64>>(conn)?;
  Ok(max.unwrap_or(0))
}

/// Highest agreement id currently stored, 0 when the table is empty.
pub fn max_agreement_id(conn: &SqliteConnection) -> Result<i64, IndexerError> {
  use crate::schema::agreements::dsl::*;

  let max = agreements.select(diesel::dsl::max(agreement_id)).first::<Option<i64>>(conn)?;
  Ok(max.unwrap_or(0))
}

pub fn find_job(conn: &SqliteConnection, id: i64) -> Result<Option<models::Job>, IndexerError> {
  use crate::schema::jobs::dsl::*;

  Ok(jobs.find(id).first::<models::Job>(conn).optional()?)
}

pub fn find_agreement(conn: &SqliteConnection, id: i64) -> Result<Option<models::Agreement>, IndexerError> {
  use crate::schema::agreements::dsl::*;

  Ok(agreements.find(id).first::<models::Agreement>(conn).optional()?)
}

pub fn find_reputation(conn: &SqliteConnection, address: &str) -> Result<Option<models::Reputation>, IndexerError> {
  use crate::schema::reputations::dsl::*;

  Ok(reputations.find(address).first::<models::Reputation>(conn).optional()?)
}

/// Jobs ordered by id descending, optionally filtered by status.
pub fn list_jobs(
  conn: &SqliteConnection,
  status_filter: Option<&str>,
  page: Page,
) -> Result<Vec<models::Job>, IndexerError> {
  use crate::schema::jobs::dsl::*;

  let mut query = jobs.into_boxed::<Sqlite>();

  if let Some(wanted) = status_filter {
    query = query.filter(status.eq(wanted));
  }

  Ok(query
    .order(job_id.desc())
    .limit(page.limit)
    .offset(page.offset)
    .load::<models::Job>(conn)?)
}

#[derive(Debug, Default, PartialEq)]
pub struct ReprojectSummary {
  pub jobs: usize,
  pub agreements: usize,
  pub reputations: usize,
}

/// Recomputes every derived column from the stored payloads without touching the chain.
pub fn reproject_all(conn: &SqliteConnection) -> Result<ReprojectSummary, IndexerError> {
  use crate::schema::{agreements, jobs, reputations};

  conn.transaction::<_, IndexerError, _>(|| {
    let mut summary = ReprojectSummary::default();

    for job in jobs::table.load::<models::Job>(conn)? {
      let fields = JobDecoder.decode(&serde_json::from_str(&job.raw_json)?);
      diesel::update(jobs::table.find(job.job_id))
        .set((jobs::status.eq(fields.status), jobs::employer.eq(fields.employer)))
        .execute(conn)?;
      summary.jobs += 1;
    }

    for agreement in agreements::table.load::<models::Agreement>(conn)? {
      let fields = AgreementDecoder.decode(&serde_json::from_str(&agreement.raw_json)?);
      diesel::update(agreements::table.find(agreement.agreement_id))
        .set((
          agreements::status.eq(fields.status),
          agreements::employer.eq(fields.employer),
          agreements::worker.eq(fields.worker),
        ))
        .execute(conn)?;
      summary.agreements += 1;
    }

    for reputation in reputations::table.load::<models::Reputation>(conn)? {
      let fields = ReputationDecoder.decode(&serde_json::from_str(&reputation.raw_json)?);
      diesel::update(reputations::table.find(&reputation.agent))
        .set(reputations::score.eq(fields.score))
        .execute(conn)?;
      summary.reputations += 1;
    }

    Ok(summary)
  })
}
