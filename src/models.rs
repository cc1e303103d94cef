use serde::Serialize;
use serde_json::Value;

use crate::schema::{agreements, checkpoints, jobs, reputations, stats, transactions};

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct Checkpoint {
  pub contract: String,
  pub last_timestamp_ms: i64,
}

#[derive(Insertable, Debug)]
#[table_name = "checkpoints"]
pub struct NewCheckpoint<'a> {
  pub contract: &'a str,
  pub last_timestamp_ms: i64,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct RawTransaction {
  pub tx_hash: String,
  pub contract: String,
  pub function_name: Option<String>,
  pub sender: Option<String>,
  pub receiver: Option<String>,
  pub ts_ms: i64,
  pub status: Option<String>,
  pub raw_json: String,
}

#[derive(Insertable, Debug)]
#[table_name = "transactions"]
pub struct NewRawTransaction<'a> {
  pub tx_hash: &'a str,
  pub contract: &'a str,
  pub function_name: Option<&'a str>,
  pub sender: Option<&'a str>,
  pub receiver: Option<&'a str>,
  pub ts_ms: i64,
  pub status: Option<&'a str>,
  pub raw_json: &'a str,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct Job {
  pub job_id: i64,
  pub status: Option<String>,
  pub employer: Option<String>,
  pub updated_ts_ms: i64,
  pub source_tx_hash: Option<String>,
  pub raw_json: String,
}

#[derive(Insertable, Debug)]
#[table_name = "jobs"]
pub struct NewJob<'a> {
  pub job_id: i64,
  pub status: Option<&'a str>,
  pub employer: Option<&'a str>,
  pub updated_ts_ms: i64,
  pub source_tx_hash: Option<&'a str>,
  pub raw_json: &'a str,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct Agreement {
  pub agreement_id: i64,
  pub status: Option<String>,
  pub employer: Option<String>,
  pub worker: Option<String>,
  pub updated_ts_ms: i64,
  pub source_tx_hash: Option<String>,
  pub raw_json: String,
}

#[derive(Insertable, Debug)]
#[table_name = "agreements"]
pub struct NewAgreement<'a> {
  pub agreement_id: i64,
  pub status: Option<&'a str>,
  pub employer: Option<&'a str>,
  pub worker: Option<&'a str>,
  pub updated_ts_ms: i64,
  pub source_tx_hash: Option<&'a str>,
  pub raw_json: &'a str,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct Reputation {
  pub agent: String,
  pub score: Option<i64>,
  pub updated_ts_ms: i64,
  pub source_tx_hash: Option<String>,
  pub raw_json: String,
}

#[derive(Insertable, Debug)]
#[table_name = "reputations"]
pub struct NewReputation<'a> {
  pub agent: &'a str,
  pub score: Option<i64>,
  pub updated_ts_ms: i64,
  pub source_tx_hash: Option<&'a str>,
  pub raw_json: &'a str,
}

#[derive(Queryable, Insertable, Debug, Clone, PartialEq)]
#[table_name = "stats"]
pub struct Stats {
  pub id: i32,
  pub updated_ts_ms: i64,
  pub board_raw_json: String,
  pub protocol_raw_json: String,
}

// JSON shapes served by the read API. `raw` carries the stored canonical payload.

#[derive(Serialize, Debug)]
pub struct JobView {
  pub job_id: i64,
  pub status: Option<String>,
  pub employer: Option<String>,
  pub updated_ts_ms: i64,
  pub source_tx_hash: Option<String>,
  pub raw: Value,
}

#[derive(Serialize, Debug)]
pub struct AgreementView {
  pub agreement_id: i64,
  pub status: Option<String>,
  pub employer: Option<String>,
  pub worker: Option<String>,
  pub updated_ts_ms: i64,
  pub source_tx_hash: Option<String>,
  pub raw: Value,
}

#[derive(Serialize, Debug)]
pub struct ReputationView {
  pub agent: String,
  pub score: Option<i64>,
  pub updated_ts_ms: i64,
  pub source_tx_hash: Option<String>,
  pub raw: Value,
}

#[derive(Serialize, Debug)]
pub struct StatsView {
  pub updated_ts_ms: i64,
  pub board: Value,
  pub protocol: Value,
}

impl Job {
  pub fn into_view(self) -> Result<JobView, serde_json::Error> {
    Ok(JobView {
      raw: serde_json::from_str(&self.raw_json)?,
      job_id: self.job_id,
      status: self.status,
      employer: self.employer,
      updated_ts_ms: self.updated_ts_ms,
      source_tx_hash: self.source_tx_hash,
    })
  }
}

impl Agreement {
  pub fn into_view(self) -> Result<AgreementView, serde_json::Error> {
    Ok(AgreementView {
      raw: serde_json::from_str(&self.raw_json)?,
      agreement_id: self.agreement_id,
      status: self.status,
      employer: self.employer,
      worker: self.worker,
      updated_ts_ms: self.updated_ts_ms,
      source_tx_hash: self.source_tx_hash,
    })
  }
}

impl Reputation {
  pub fn into_view(self) -> Result<ReputationView, serde_json::Error> {
    Ok(ReputationView {
      raw: serde_json::from_str(&self.raw_json)?,
      agent: self.agent,
      score: self.score,
      updated_ts_ms: self.updated_ts_ms,
      source_tx_hash: self.source_tx_hash,
    })
  }
}

impl StatsView {
  pub fn placeholder() -> Self {
    StatsView {
      updated_ts_ms: 0,
      board: Value::Object(Default::default()),
      protocol: Value::Object(Default::default()),
    }
  }

  pub fn from_stats(stats: &Stats) -> Result<Self, serde_json::Error> {
    Ok(StatsView {
      updated_ts_ms: stats.updated_ts_ms,
      board: as_object(serde_json::from_str(&stats.board_raw_json)?),
      protocol: as_object(serde_json::from_str(&stats.protocol_raw_json)?),
    })
  }
}

/// Objects pass through, anything else is wrapped as `{"raw": value}`.
fn as_object(value: Value) -> Value {
  match value {
    Value::Object(_) => value,
    other => serde_json::json!({ "raw": other }),
  }
}
