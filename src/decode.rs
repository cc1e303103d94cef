//! Decoding of opaque on-chain data.
//!
//! Transaction payloads are `function@hexArg1@hexArg2...` encoded as base64.
//! Gateway responses have no stable typed shape, so entity fields are recovered
//! by scanning their serialized JSON text. The scan rules (status token priority,
//! address slice length, first/second address assignment, first numeric token)
//! are the compatibility surface and must stay fixed.

use serde_json::Value;
use std::convert::TryFrom;

use crate::constants::{chain, AGREEMENT_STATUS_TOKENS, JOB_STATUS_TOKENS};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedCall {
  pub function: String,
  pub args: Vec<String>,
}

/// Decodes a base64 call payload. An empty payload decodes to an empty call;
/// `None` means the payload was not valid base64.
pub fn decode_call_data(data: &str) -> Option<DecodedCall> {
  if data.is_empty() {
    return Some(DecodedCall::default());
  }

  let bytes = base64::decode(data).ok()?;
  // invalid utf-8 sequences are dropped, not substituted
  let text = String::from_utf8_lossy(&bytes).replace('\u{FFFD}', "");

  let mut parts = text.split('@');
  let function = parts.next().unwrap_or_default().to_owned();
  let args = parts.map(|p| p.to_owned()).collect();
  Some(DecodedCall { function, args })
}

/// Parses a big-endian hex argument into an entity id.
pub fn hex_arg_to_id(arg: &str) -> Option<i64> {
  let trimmed = arg.trim();
  let digits = trimmed
    .strip_prefix("0x")
    .or_else(|| trimmed.strip_prefix("0X"))
    .unwrap_or(trimmed);
  if digits.is_empty() {
    return None;
  }
  let value = u64::from_str_radix(digits, 16).ok()?;
  i64::try_from(value).ok()
}

pub fn is_agent_address(address: &str) -> bool {
  address.starts_with(chain::ADDRESS_PREFIX)
}

/// `null`, `[]`, `{}` and `""` are how the gateway reports a missing entity.
pub fn is_empty_response(payload: &Value) -> bool {
  match payload {
    Value::Null => true,
    Value::Array(items) => items.is_empty(),
    Value::Object(fields) => fields.is_empty(),
    Value::String(s) => s.is_empty(),
    _ => false,
  }
}

/// Projects a canonical gateway payload into the derived columns of one entity kind.
pub trait FieldDecoder {
  type Fields;

  fn decode(&self, payload: &Value) -> Self::Fields;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFields {
  pub status: Option<String>,
  pub employer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgreementFields {
  pub status: Option<String>,
  pub employer: Option<String>,
  pub worker: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReputationFields {
  pub score: Option<i64>,
}

pub struct JobDecoder;

pub struct AgreementDecoder;

pub struct ReputationDecoder;

impl FieldDecoder for JobDecoder {
  type Fields = JobFields;

  fn decode(&self, payload: &Value) -> JobFields {
    let text = serialized(payload);
    JobFields {
      status: first_status(&text, &JOB_STATUS_TOKENS),
      employer: address_occurrences(&text).into_iter().next(),
    }
  }
}

impl FieldDecoder for AgreementDecoder {
  type Fields = AgreementFields;

  fn decode(&self, payload: &Value) -> AgreementFields {
    let text = serialized(payload);
    let mut addresses = address_occurrences(&text).into_iter();
    AgreementFields {
      status: first_status(&text, &AGREEMENT_STATUS_TOKENS),
      employer: addresses.next(),
      worker: addresses.next(),
    }
  }
}

impl FieldDecoder for ReputationDecoder {
  type Fields = ReputationFields;

  fn decode(&self, payload: &Value) -> ReputationFields {
    let text = serialized(payload);
    let score = text
      .split(|c: char| c.is_whitespace() || "{}[],:".contains(c))
      .find(|token| !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()))
      .and_then(|token| token.parse::<i64>().ok());
    ReputationFields { score }
  }
}

fn serialized(payload: &Value) -> String {
  // Value serialization cannot fail: keys are always strings
  serde_json::to_string(payload).unwrap_or_default()
}

/// First token of `tokens`, in list order, that appears anywhere in `text`.
fn first_status(text: &str, tokens: &[&str]) -> Option<String> {
  tokens.iter().find(|token| text.contains(*token)).map(|token| token.to_string())
}

/// Every address occurrence in order of appearance, each cut to the fixed slice length.
fn address_occurrences(text: &str) -> Vec<String> {
  let prefix = chain::ADDRESS_PREFIX;
  let mut found = vec![];
  let mut from = 0;
  while let Some(pos) = text[from..].find(prefix) {
    let start = from + pos;
    found.push(text[start..].chars().take(chain::ADDRESS_SLICE_LEN).collect());
    from = start + prefix.len();
  }
  found
}
