#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use url::Url;
use vaultgate_kernel_contracts::address::ChainAddress;

use crate::abi::{encode_address, encode_call, FunctionSelector};

/// One contract read: target, selector and already-encoded argument words.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadRequest {
    pub contract: ChainAddress,
    pub selector: FunctionSelector,
    pub args: Vec<[u8; 32]>,
}

impl ReadRequest {
    pub fn new(contract: ChainAddress, selector: FunctionSelector) -> Self {
        Self {
            contract,
            selector,
            args: Vec::new(),
        }
    }

    pub fn with_address_arg(mut self, address: &ChainAddress) -> Self {
        self.args.push(encode_address(address));
        self
    }

    pub fn calldata(&self) -> Vec<u8> {
        encode_call(self.selector, &self.args)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue(pub Vec<u8>);

impl RawValue {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("timeout")]
    Timeout,
    #[error("connection")]
    Connection,
    #[error("tls")]
    Tls,
    #[error("dns")]
    Dns,
    #[error("transport")]
    Transport,
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("rpc error code {0}")]
    Rpc(i64),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("reader misconfigured: {0}")]
    Config(&'static str),
}

impl ReadError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReadError::Timeout => "timeout",
            ReadError::Connection => "connection",
            ReadError::Tls => "tls",
            ReadError::Dns => "dns",
            ReadError::Transport => "transport",
            ReadError::HttpStatus(_) => "http_non_200",
            ReadError::Rpc(_) => "rpc_error",
            ReadError::MalformedResponse(_) => "malformed_response",
            ReadError::Config(_) => "config_invalid",
        }
    }
}

/// The single ledger capability the core depends on. Implementations are
/// stateless from the caller's point of view and shared across threads.
pub trait RemoteStateReader: Send + Sync {
    fn read(&self, request: &ReadRequest, timeout: Duration) -> Result<RawValue, ReadError>;
}

/// `eth_call` against one JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcStateReader {
    endpoint: Url,
    user_agent: String,
}

impl JsonRpcStateReader {
    pub fn new(endpoint: &str) -> Result<Self, ReadError> {
        let endpoint = Url::parse(endpoint).map_err(|_| ReadError::Config("endpoint url"))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ReadError::Config("endpoint scheme"));
        }
        Ok(Self {
            endpoint,
            user_agent: format!("vaultgate/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Host only; endpoint paths and query strings often carry API keys.
    pub fn endpoint_host(&self) -> &str {
        self.endpoint.host_str().unwrap_or("unknown")
    }

    fn agent(&self, timeout: Duration) -> ureq::Agent {
        let timeout = timeout.max(Duration::from_millis(100));
        ureq::AgentBuilder::new()
            .timeout(timeout)
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&self.user_agent)
            .build()
    }
}

impl RemoteStateReader for JsonRpcStateReader {
    fn read(&self, request: &ReadRequest, timeout: Duration) -> Result<RawValue, ReadError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                {
                    "to": request.contract.as_str(),
                    "data": format!("0x{}", hex::encode(request.calldata())),
                },
                "latest"
            ],
        });
        let response = self
            .agent(timeout)
            .post(self.endpoint.as_str())
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_json(payload)
            .map_err(read_error_from_ureq)?;
        let body: Value = serde_json::from_reader(response.into_reader())
            .map_err(|_| ReadError::MalformedResponse("json_parse".to_string()))?;
        parse_eth_call_body(&body)
    }
}

fn parse_eth_call_body(body: &Value) -> Result<RawValue, ReadError> {
    if let Some(err) = body.get("error") {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
        return Err(ReadError::Rpc(code));
    }
    let raw = body
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| ReadError::MalformedResponse("result missing".to_string()))?;
    decode_hex_blob(raw).map(RawValue)
}

fn decode_hex_blob(raw: &str) -> Result<Vec<u8>, ReadError> {
    let trimmed = raw.trim().to_ascii_lowercase();
    let body = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| ReadError::MalformedResponse("result must be 0x-prefixed".to_string()))?;
    hex::decode(body).map_err(|_| ReadError::MalformedResponse("result is not hex".to_string()))
}

fn read_error_from_ureq(err: ureq::Error) -> ReadError {
    match err {
        ureq::Error::Status(status, _) => ReadError::HttpStatus(status),
        ureq::Error::Transport(transport) => {
            classify_transport_error(&format!("{:?} {}", transport.kind(), transport))
        }
    }
}

fn classify_transport_error(raw: &str) -> ReadError {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        ReadError::Timeout
    } else if lower.contains("tls") || lower.contains("ssl") {
        ReadError::Tls
    } else if lower.contains("dns") {
        ReadError::Dns
    } else if lower.contains("connection") || lower.contains("connect") {
        ReadError::Connection
    } else {
        ReadError::Transport
    }
}

/// Scripted in-memory ledger. Answers are keyed by `(contract, calldata)`;
/// queued failures are consumed before the stored answer is returned.
#[derive(Debug, Clone, Default)]
pub struct FixtureStateReader {
    inner: Arc<Mutex<FixtureState>>,
}

#[derive(Debug, Default)]
struct FixtureState {
    answers: BTreeMap<(ChainAddress, Vec<u8>), Vec<u8>>,
    queued_failures: Vec<ReadError>,
    fail_always: Option<ReadError>,
    latency: Duration,
    calls: u64,
}

impl FixtureStateReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, request: &ReadRequest, value: impl Into<Vec<u8>>) {
        if let Ok(mut s) = self.inner.lock() {
            s.answers
                .insert((request.contract.clone(), request.calldata()), value.into());
        }
    }

    pub fn forget(&self, request: &ReadRequest) {
        if let Ok(mut s) = self.inner.lock() {
            s.answers
                .remove(&(request.contract.clone(), request.calldata()));
        }
    }

    /// Fail the next `n` calls with `error`, whatever they ask for.
    pub fn fail_next(&self, n: usize, error: ReadError) {
        if let Ok(mut s) = self.inner.lock() {
            s.queued_failures.extend(std::iter::repeat(error).take(n));
        }
    }

    pub fn fail_always(&self, error: Option<ReadError>) {
        if let Ok(mut s) = self.inner.lock() {
            s.fail_always = error;
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut s) = self.inner.lock() {
            s.latency = latency;
        }
    }

    pub fn calls(&self) -> u64 {
        self.inner.lock().map(|s| s.calls).unwrap_or(0)
    }
}

impl RemoteStateReader for FixtureStateReader {
    fn read(&self, request: &ReadRequest, timeout: Duration) -> Result<RawValue, ReadError> {
        let (latency, outcome) = {
            let mut s = self
                .inner
                .lock()
                .map_err(|_| ReadError::Config("fixture poisoned"))?;
            s.calls += 1;
            let outcome = if let Some(err) = s.fail_always.clone() {
                Err(err)
            } else if !s.queued_failures.is_empty() {
                Err(s.queued_failures.remove(0))
            } else {
                s.answers
                    .get(&(request.contract.clone(), request.calldata()))
                    .cloned()
                    .map(RawValue)
                    .ok_or(ReadError::Rpc(-32000))
            };
            (s.latency, outcome)
        };
        if latency > Duration::ZERO {
            if latency > timeout {
                thread::sleep(timeout);
                return Err(ReadError::Timeout);
            }
            thread::sleep(latency);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> ChainAddress {
        ChainAddress::new(format!("0x{:040x}", n)).unwrap()
    }

    #[test]
    fn at_reader_01_eth_call_body_parsing() {
        let ok = json!({"jsonrpc":"2.0","id":1,"result":"0x0000ff"});
        assert_eq!(parse_eth_call_body(&ok).unwrap().0, vec![0, 0, 0xff]);
        let rpc = json!({"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted"}});
        assert_eq!(parse_eth_call_body(&rpc), Err(ReadError::Rpc(3)));
        let odd = json!({"jsonrpc":"2.0","id":1,"result":"0xabc"});
        assert!(matches!(
            parse_eth_call_body(&odd),
            Err(ReadError::MalformedResponse(_))
        ));
        let missing = json!({"jsonrpc":"2.0","id":1});
        assert!(matches!(
            parse_eth_call_body(&missing),
            Err(ReadError::MalformedResponse(_))
        ));
    }

    #[test]
    fn at_reader_02_transport_errors_are_classified() {
        assert_eq!(classify_transport_error("Io timed out reading"), ReadError::Timeout);
        assert_eq!(classify_transport_error("Dns failed lookup"), ReadError::Dns);
        assert_eq!(
            classify_transport_error("ConnectionFailed refused"),
            ReadError::Connection
        );
        assert_eq!(classify_transport_error("BadStatus"), ReadError::Transport);
    }

    #[test]
    fn at_reader_03_endpoint_host_hides_path_secrets() {
        let r = JsonRpcStateReader::new("https://rpc.example.org/v3/SECRETKEY").unwrap();
        assert_eq!(r.endpoint_host(), "rpc.example.org");
        assert!(JsonRpcStateReader::new("ftp://rpc.example.org").is_err());
        assert!(JsonRpcStateReader::new("not a url").is_err());
    }

    #[test]
    fn at_reader_04_fixture_consumes_queued_failures_first() {
        let f = FixtureStateReader::new();
        let req = ReadRequest::new(
            addr(1),
            FunctionSelector::from_signature("decimals()").unwrap(),
        );
        f.answer(&req, vec![7u8]);
        f.fail_next(1, ReadError::Timeout);
        assert_eq!(f.read(&req, Duration::from_secs(1)), Err(ReadError::Timeout));
        assert_eq!(f.read(&req, Duration::from_secs(1)).unwrap().0, vec![7u8]);
        assert_eq!(f.calls(), 2);
    }

    #[test]
    fn at_reader_05_fixture_latency_over_timeout_times_out() {
        let f = FixtureStateReader::new();
        let req = ReadRequest::new(
            addr(1),
            FunctionSelector::from_signature("decimals()").unwrap(),
        );
        f.answer(&req, vec![1u8]);
        f.set_latency(Duration::from_millis(50));
        assert_eq!(
            f.read(&req, Duration::from_millis(5)),
            Err(ReadError::Timeout)
        );
    }

    /// Accepts one connection and drips response header bytes for `for_ms`.
    fn trickling_endpoint(for_ms: u64) -> String {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nX-Pad: ");
            for _ in 0..(for_ms / 50) {
                if stream.write_all(b"a").is_err() {
                    return;
                }
                thread::sleep(Duration::from_millis(50));
            }
        });
        format!("http://127.0.0.1:{port}/rpc")
    }

    #[test]
    fn at_reader_06_trickling_endpoint_is_cut_at_the_call_budget() {
        let reader = JsonRpcStateReader::new(&trickling_endpoint(4_000)).unwrap();
        let req = ReadRequest::new(addr(1), FunctionSelector::from_signature("baseToken()").unwrap());
        let started = std::time::Instant::now();
        let out = reader.read(&req, Duration::from_millis(300));
        assert_eq!(out, Err(ReadError::Timeout));
        assert!(started.elapsed() < Duration::from_millis(2_000));
    }
}
