use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of `GET {proxy}/transactions?receiver=...`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTransaction {
  #[serde(default)]
  pub tx_hash: String,
  #[serde(default, deserialize_with = "lenient_timestamp")]
  pub timestamp: i64,
  pub sender: Option<String>,
  pub receiver: Option<String>,
  pub status: Option<String>,
  pub function: Option<String>,
  pub data: Option<String>,
  /// The transaction exactly as the source returned it.
  #[serde(skip)]
  pub raw: Value,
}

impl ChainTransaction {
  pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
    let mut tx: ChainTransaction = serde_json::from_value(value.clone())?;
    tx.raw = value;
    Ok(tx)
  }
}

/// Timestamps arrive as numbers or numeric strings depending on the source version.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Null => Ok(0),
    Value::Number(n) => n
      .as_i64()
      .or_else(|| n.as_f64().map(|f| f as i64))
      .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", n))),
    Value::String(s) => s.trim().parse::<i64>().map_err(de::Error::custom),
    other => Err(de::Error::custom(format!("invalid timestamp: {}", other))),
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmQueryRequest<'a> {
  pub sc_address: &'a str,
  pub func_name: &'a str,
  pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct VmQueryResponse {
  pub data: Option<VmQueryData>,
  #[serde(default)]
  pub error: String,
  #[serde(default)]
  pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct VmQueryData {
  pub data: VmOutput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmOutput {
  #[serde(default)]
  pub return_data: Option<Vec<Option<String>>>,
  #[serde(default)]
  pub return_code: String,
  #[serde(default)]
  pub return_message: String,
}
