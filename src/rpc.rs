use bech32::FromBase32;
use reqwest::blocking::Client;
use serde_json::{Map, Value};
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

use crate::config::Config;
use crate::error::IndexerError;
use crate::responses::{ChainTransaction, VmQueryRequest, VmQueryResponse};

/// Feed of transactions addressed to a contract, most recent page only.
pub trait TransactionSource: Send + Sync {
  fn recent_transactions(&self, contract: &str) -> Result<Vec<ChainTransaction>, IndexerError>;
}

/// Invokes read-only contract views and returns their decoded result.
pub trait QueryGateway: Send + Sync {
  fn query(&self, contract: &str, function: &str, args: &[String]) -> Result<Value, IndexerError>;
}

/// HTTP client for the chain proxy, serving both the transaction feed and
/// `vm-values/query` view calls.
#[derive(Clone)]
pub struct ProxyClient {
  proxy_url: String,
  page_size: u32,
  query_timeout: Duration,
  source_client: Client,
  query_client: Client,
}

impl ProxyClient {
  /// Must be built outside of an async runtime.
  pub fn new(config: &Config) -> Result<ProxyClient, IndexerError> {
    Ok(Self {
      proxy_url: config.proxy_url.clone(),
      page_size: config.page_size,
      query_timeout: config.query_timeout,
      source_client: Client::builder().timeout(config.source_timeout).build()?,
      query_client: Client::builder().timeout(config.query_timeout).build()?,
    })
  }
}

impl TransactionSource for ProxyClient {
  fn recent_transactions(&self, contract: &str) -> Result<Vec<ChainTransaction>, IndexerError> {
    let url = format!("{}/transactions", self.proxy_url);
    let size = self.page_size.to_string();
    trace!("fetch transactions {} receiver={}", url, contract);

    let payload: Value = self.source_client
      .get(&url)
      .header("Accept", "application/json")
      .query(&[("receiver", contract), ("size", size.as_str()), ("withLogs", "true")])
      .send()?
      .error_for_status()?
      .json()?;

    let items = match payload {
      Value::Array(items) => items,
      other => {
        debug!("transaction source returned a non-list payload: {}", other);
        return Ok(vec![]);
      }
    };

    Ok(items.into_iter().filter_map(|item| {
      match ChainTransaction::from_value(item) {
        Ok(tx) => Some(tx),
        Err(err) => {
          warn!("skipping malformed transaction for {}: {}", contract, err);
          None
        }
      }
    }).collect())
  }
}

impl QueryGateway for ProxyClient {
  fn query(&self, contract: &str, function: &str, args: &[String]) -> Result<Value, IndexerError> {
    let args = args.iter().map(|a| encode_query_argument(a)).collect::<Result<Vec<_>, _>>()?;
    let request = VmQueryRequest { sc_address: contract, func_name: function, args };
    trace!("query {} {} {:?}", contract, function, request.args);

    let timeout = self.query_timeout;
    let response: VmQueryResponse = self.query_client
      .post(&format!("{}/vm-values/query", self.proxy_url))
      .json(&request)
      .send()
      .and_then(|resp| resp.json())
      .map_err(|e| if e.is_timeout() { IndexerError::Timeout(timeout) } else { e.into() })?;

    let output = match response.data {
      Some(data) if response.code == "successful" => data.data,
      _ => return Err(IndexerError::Gateway(format!("{} on {} failed: {} {}", function, contract, response.code, response.error))),
    };
    if output.return_code != "ok" {
      return Err(IndexerError::Gateway(format!("{} on {} returned {}: {}", function, contract, output.return_code, output.return_message)));
    }

    let rendered = output.return_data
      .unwrap_or_default()
      .into_iter()
      .map(|item| render_return_data(&item.unwrap_or_default()))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(rendered))
  }
}

/// Encodes a CLI-style argument (`123`, `addr:claw1...`, `str:...`, `0x...`) as hex.
pub fn encode_query_argument(arg: &str) -> Result<String, IndexerError> {
  if let Some(address) = arg.strip_prefix("addr:") {
    let (_hrp, data) = bech32::decode(address)
      .map_err(|e| IndexerError::Gateway(format!("invalid address argument {}: {}", address, e)))?;
    let bytes = Vec::<u8>::from_base32(&data)
      .map_err(|e| IndexerError::Gateway(format!("invalid address argument {}: {}", address, e)))?;
    return Ok(hex::encode(bytes));
  }
  if let Some(raw) = arg.strip_prefix("0x") {
    return Ok(raw.to_lowercase());
  }
  if let Some(text) = arg.strip_prefix("str:") {
    return Ok(hex::encode(text));
  }
  if !arg.is_empty() && arg.bytes().all(|b| b.is_ascii_digit()) {
    let number = arg.parse::<u128>()
      .map_err(|e| IndexerError::Gateway(format!("invalid numeric argument {}: {}", arg, e)))?;
    // top-encoded: minimal big-endian bytes, zero is empty
    let bytes = number.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    return Ok(hex::encode(&bytes[first..]));
  }
  Ok(hex::encode(arg))
}

/// Renders one base64 return value the way the chain CLI prints it.
fn render_return_data(encoded: &str) -> Result<Value, IndexerError> {
  let bytes = base64::decode(encoded)
    .map_err(|e| IndexerError::Gateway(format!("invalid return data {}: {}", encoded, e)))?;
  let mut item = Map::new();
  item.insert(String::from("base64"), Value::from(encoded));
  item.insert(String::from("hex"), Value::from(hex::encode(&bytes)));
  // wider values have no lossless JSON number form
  if bytes.len() <= 8 {
    let number = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    item.insert(String::from("number"), Value::from(number));
  }
  Ok(Value::Object(item))
}

/// Runs the chain CLI's `contract query` and parses its stdout as JSON.
#[derive(Clone, Debug)]
pub struct CommandQueryGateway {
  program: String,
  proxy_url: String,
  timeout: Duration,
}

impl CommandQueryGateway {
  pub fn new(config: &Config) -> Self {
    Self {
      program: config.query_command.clone(),
      proxy_url: config.proxy_url.clone(),
      timeout: config.query_timeout,
    }
  }

  fn command_args(&self, contract: &str, function: &str, args: &[String]) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
      "contract".into(),
      "query".into(),
      contract.into(),
      "--proxy".into(),
      self.proxy_url.clone(),
      "--function".into(),
      function.into(),
    ];
    if !args.is_empty() {
      cmd.push("--arguments".into());
      cmd.extend(args.iter().cloned());
    }
    cmd
  }
}

impl QueryGateway for CommandQueryGateway {
  fn query(&self, contract: &str, function: &str, args: &[String]) -> Result<Value, IndexerError> {
    let cmd_args = self.command_args(contract, function, args);
    trace!("run {} {}", self.program, cmd_args.join(" "));

    let mut child = Command::new(&self.program)
      .args(&cmd_args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || read_pipe(stdout));
    let stderr_reader = thread::spawn(move || read_pipe(stderr));

    let status = match child.wait_timeout(self.timeout)? {
      Some(status) => status,
      None => {
        child.kill()?;
        child.wait()?;
        return Err(IndexerError::Timeout(self.timeout));
      }
    };

    let stdout = collect_output(stdout_reader)?;
    let stderr = collect_output(stderr_reader)?;
    if !status.success() {
      return Err(IndexerError::Gateway(format!(
        "query failed: {} {}\n{}", self.program, cmd_args.join(" "), stderr.trim()
      )));
    }
    Ok(serde_json::from_str(&stdout)?)
  }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> io::Result<String> {
  let mut buf = String::new();
  if let Some(mut pipe) = pipe {
    pipe.read_to_string(&mut buf)?;
  }
  Ok(buf)
}

fn collect_output(reader: thread::JoinHandle<io::Result<String>>) -> Result<String, IndexerError> {
  let output = reader
    .join()
    .map_err(|_| IndexerError::Gateway(String::from("query output reader panicked")))??;
  Ok(output)
}
