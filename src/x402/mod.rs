//! x402 payment engine: translates `402 Payment Required` responses into
//! signed, sponsored Stacks transactions, with a single-retry guarantee and
//! a dedup cache keyed on the outbound request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use bitcoin::hashes::Hash;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::ErrorKind;

/// Header carrying the base64url-encoded payment-required envelope on a 402
/// response.
pub const HEADER_PAYMENT_REQUIRED: &str = "X-PAYMENT-REQUIRED";
/// Header carrying the base64url-encoded payment payload on the retry.
pub const HEADER_PAYMENT: &str = "X-PAYMENT";

/// `x402Version` of the outgoing payment payload. Always this crate's own
/// constant, never derived from a peer-supplied 402 response — the
/// response's `x402Version` is read elsewhere to select a compatible
/// accept option, but it must never leak into what we sign and send.
const PAYMENT_PAYLOAD_X402_VERSION: u32 = 2;

const DEDUP_TTL: Duration = Duration::from_secs(60);
const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

#[derive(Debug, Error)]
pub enum X402Error {
    #[error("malformed 402 response: {0}")]
    BadRequirements(String),

    #[error("payment requirement targets network {0}, configured network is {1}")]
    NetworkMismatch(String, String),

    #[error("no supported payment option in 402 response")]
    NoSupportedOption,

    #[error("insufficient {token}: have {have}, need {need}")]
    InsufficientBalance {
        token: String,
        have: u128,
        need: u128,
    },

    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("server returned 402 twice; refusing to retry again")]
    RetryExceeded,
}

impl X402Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            X402Error::BadRequirements(_) => ErrorKind::InvalidInput,
            X402Error::NetworkMismatch(_, _) => ErrorKind::NetworkMismatch,
            X402Error::NoSupportedOption => ErrorKind::InvalidInput,
            X402Error::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            X402Error::Upstream(_) => ErrorKind::UpstreamFailure,
            X402Error::RetryExceeded => ErrorKind::PaymentRetryExceeded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Stx,
    Sbtc,
}

/// One entry from the `accepts` array of a 402 response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentOption {
    pub network: String,
    pub asset: String,
    pub amount: String,
    #[serde(rename = "payTo")]
    pub pay_to: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentRequiredEnvelope {
    pub accepts: Vec<PaymentOption>,
    pub resource: String,
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
}

/// v1 fallback body shape when the header is absent.
#[derive(Debug, Clone, Deserialize)]
struct V1Body {
    amount: String,
    asset: String,
    recipient: String,
    network: String,
}

fn parse_requirements(
    header: Option<&str>,
    body: Option<&str>,
) -> Result<PaymentRequiredEnvelope, X402Error> {
    if let Some(h) = header {
        let decoded = BASE64_URL
            .decode(h)
            .map_err(|e| X402Error::BadRequirements(e.to_string()))?;
        let envelope: PaymentRequiredEnvelope = serde_json::from_slice(&decoded)
            .map_err(|e| X402Error::BadRequirements(e.to_string()))?;
        return Ok(envelope);
    }
    if let Some(b) = body {
        let v1: V1Body =
            serde_json::from_str(b).map_err(|e| X402Error::BadRequirements(e.to_string()))?;
        return Ok(PaymentRequiredEnvelope {
            accepts: vec![PaymentOption {
                network: v1.network,
                asset: v1.asset,
                amount: v1.amount,
                pay_to: v1.recipient,
            }],
            resource: String::new(),
            x402_version: 1,
        });
    }
    Err(X402Error::BadRequirements(
        "neither payment-required header nor v1 body present".to_string(),
    ))
}

/// Chooses the first `accepts` entry on a `stacks:` network and classifies
/// its asset as sBTC (contract identifier ending `::token-sbtc`, or the
/// literal `"sbtc"`) or STX.
fn select_option(
    envelope: &PaymentRequiredEnvelope,
    configured_network: &str,
) -> Result<(PaymentOption, Token), X402Error> {
    let chosen = envelope
        .accepts
        .iter()
        .find(|o| o.network.starts_with("stacks:"))
        .ok_or(X402Error::NoSupportedOption)?;

    if chosen.network != configured_network {
        return Err(X402Error::NetworkMismatch(
            chosen.network.clone(),
            configured_network.to_string(),
        ));
    }

    let token = if chosen.asset.ends_with("::token-sbtc") || chosen.asset == "sbtc" {
        Token::Sbtc
    } else {
        Token::Stx
    };

    Ok((chosen.clone(), token))
}

#[derive(Debug, Clone, Copy)]
pub struct Balances {
    pub stx: u128,
    pub sbtc: u128,
}

#[async_trait]
pub trait BalanceReader: Send + Sync {
    async fn read_balances(&self, address: &str) -> Result<Balances, X402Error>;
    async fn estimate_contract_call_fee(&self) -> Result<u128, X402Error>;
}

#[derive(Debug, Clone)]
pub struct SignedTx {
    pub hex_with_prefix: String,
}

#[async_trait]
pub trait TxBuilder: Send + Sync {
    /// Builds and signs a sponsored (fee = 0) transaction: a plain STX
    /// transfer, or an sBTC `transfer(amount, sender, recipient, none)`
    /// contract call with post-condition mode `Allow`.
    async fn build_sponsored_transfer(
        &self,
        token: Token,
        amount: u128,
        recipient: &str,
    ) -> Result<SignedTx, X402Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Ok { status: u16 },
    PaymentRequired,
    RateLimited,
}

#[async_trait]
pub trait Relay: Send + Sync {
    async fn send(
        &self,
        method: &str,
        url: &str,
        payment_header: Option<&str>,
    ) -> Result<RelayResponse, X402Error>;
}

pub struct RelayResponse {
    pub outcome: RelayOutcome,
    pub payment_required_header: Option<String>,
    pub body: Option<String>,
    pub txid: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentPayload {
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    pub resource: String,
    pub accepted: PaymentOption,
    pub payload: PayloadBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayloadBody {
    pub transaction: String,
}

fn encode_payment_header(payload: &PaymentPayload) -> String {
    let json = serde_json::to_vec(payload).expect("PaymentPayload always serializes");
    BASE64_URL.encode(json)
}

struct DedupEntry {
    txid: String,
    stored_at: Instant,
}

/// Process-wide dedup cache keyed on `sha256(method, url, params, body)`,
/// guarded by a mutex so the sweeper and request paths coordinate safely.
pub struct DedupCache {
    entries: Mutex<HashMap<[u8; 32], DedupEntry>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(method: &str, url: &str, params: &str, body: &str) -> [u8; 32] {
        let mut buf = Vec::new();
        buf.extend_from_slice(method.as_bytes());
        buf.push(0);
        buf.extend_from_slice(url.as_bytes());
        buf.push(0);
        buf.extend_from_slice(params.as_bytes());
        buf.push(0);
        buf.extend_from_slice(body.as_bytes());
        bitcoin::hashes::sha256::Hash::hash(&buf).to_byte_array()
    }

    pub async fn get(&self, key: &[u8; 32]) -> Option<String> {
        let entries = self.entries.lock().await;
        entries.get(key).and_then(|e| {
            if e.stored_at.elapsed() < DEDUP_TTL {
                Some(e.txid.clone())
            } else {
                None
            }
        })
    }

    pub async fn put(&self, key: [u8; 32], txid: String) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            DedupEntry {
                txid,
                stored_at: Instant::now(),
            },
        );
    }

    /// Evicts entries older than the dedup window. Intended to be driven by
    /// a periodic `tokio::spawn` loop owned by the embedding application.
    pub async fn sweep(&self) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.stored_at.elapsed() < DEDUP_TTL);
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct SettleReceipt {
    pub txid: String,
    pub status: u16,
}

/// Runs the full BUILD_REQUEST → SEND → (402 handling) → RETRY_ONCE state
/// machine for a single outbound request.
pub async fn run_once(
    dedup: &DedupCache,
    relay: &dyn Relay,
    balance_reader: &dyn BalanceReader,
    tx_builder: &dyn TxBuilder,
    configured_network: &str,
    method: &str,
    url: &str,
    params: &str,
    body: &str,
    payer_address: &str,
) -> Result<SettleReceipt, X402Error> {
    let cache_key = DedupCache::key(method, url, params, body);
    if let Some(txid) = dedup.get(&cache_key).await {
        return Ok(SettleReceipt { txid, status: 200 });
    }

    let first = send_with_backoff(relay, method, url, None).await?;
    match first.outcome {
        RelayOutcome::Ok { status } => {
            let txid = first.txid.unwrap_or_default();
            dedup.put(cache_key, txid.clone()).await;
            return Ok(SettleReceipt { txid, status });
        }
        RelayOutcome::RateLimited => {
            return Err(X402Error::Upstream(
                "relay rate-limited through all backoff attempts".to_string(),
            ))
        }
        RelayOutcome::PaymentRequired => {}
    }

    let envelope = parse_requirements(
        first.payment_required_header.as_deref(),
        first.body.as_deref(),
    )?;
    let (option, token) = select_option(&envelope, configured_network)?;
    let amount: u128 = option
        .amount
        .parse()
        .map_err(|_| X402Error::BadRequirements(format!("non-numeric amount: {}", option.amount)))?;

    check_balance(balance_reader, payer_address, token, amount).await?;

    let signed = tx_builder
        .build_sponsored_transfer(token, amount, &option.pay_to)
        .await?;

    let payload = PaymentPayload {
        x402_version: PAYMENT_PAYLOAD_X402_VERSION,
        resource: envelope.resource.clone(),
        accepted: option,
        payload: PayloadBody {
            transaction: signed.hex_with_prefix,
        },
    };
    let payment_header = encode_payment_header(&payload);

    let retry = send_with_backoff(relay, method, url, Some(&payment_header)).await?;
    match retry.outcome {
        RelayOutcome::Ok { status } => {
            let txid = retry.txid.unwrap_or_default();
            dedup.put(cache_key, txid.clone()).await;
            Ok(SettleReceipt { txid, status })
        }
        RelayOutcome::PaymentRequired => Err(X402Error::RetryExceeded),
        RelayOutcome::RateLimited => Err(X402Error::Upstream(
            "relay rate-limited on the payment retry".to_string(),
        )),
    }
}

async fn check_balance(
    balance_reader: &dyn BalanceReader,
    payer_address: &str,
    token: Token,
    amount: u128,
) -> Result<(), X402Error> {
    let balances = balance_reader.read_balances(payer_address).await?;
    let fee = balance_reader.estimate_contract_call_fee().await?;
    match token {
        Token::Stx => {
            let need = amount + fee;
            if balances.stx < need {
                return Err(X402Error::InsufficientBalance {
                    token: "STX".to_string(),
                    have: balances.stx,
                    need,
                });
            }
        }
        Token::Sbtc => {
            if balances.sbtc < amount {
                return Err(X402Error::InsufficientBalance {
                    token: "sBTC".to_string(),
                    have: balances.sbtc,
                    need: amount,
                });
            }
            if balances.stx < fee {
                return Err(X402Error::InsufficientBalance {
                    token: "STX".to_string(),
                    have: balances.stx,
                    need: fee,
                });
            }
        }
    }
    Ok(())
}

/// Sends through the relay, retrying only `RateLimited` (503) outcomes with
/// a 1s/2s/4s exponential backoff before giving up. Every other outcome
/// (2xx, 402, or a hard error) returns immediately.
async fn send_with_backoff(
    relay: &dyn Relay,
    method: &str,
    url: &str,
    payment_header: Option<&str>,
) -> Result<RelayResponse, X402Error> {
    let mut last = relay.send(method, url, payment_header).await?;
    for delay in BACKOFF_SCHEDULE {
        if last.outcome != RelayOutcome::RateLimited {
            return Ok(last);
        }
        tokio::time::sleep(delay).await;
        last = relay.send(method, url, payment_header).await?;
    }
    Ok(last)
}

/// Spawns the periodic dedup-cache sweeper as a detached background task.
/// The caller owns the returned handle and may abort it on shutdown.
pub fn spawn_sweeper(cache: Arc<DedupCache>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            cache.sweep().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockRelay {
        responses: Mutex<Vec<RelayOutcome>>,
        calls: AtomicU32,
        requirements_header: String,
    }

    #[async_trait]
    impl Relay for MockRelay {
        async fn send(
            &self,
            _method: &str,
            _url: &str,
            _payment_header: Option<&str>,
        ) -> Result<RelayResponse, X402Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().await;
            let outcome = responses.remove(0);
            Ok(RelayResponse {
                outcome,
                payment_required_header: Some(self.requirements_header.clone()),
                body: None,
                txid: if matches!(outcome, RelayOutcome::Ok { .. }) {
                    Some("0xabc123".to_string())
                } else {
                    None
                },
            })
        }
    }

    struct MockBalances;
    #[async_trait]
    impl BalanceReader for MockBalances {
        async fn read_balances(&self, _address: &str) -> Result<Balances, X402Error> {
            Ok(Balances {
                stx: 1_000_000,
                sbtc: 200_000,
            })
        }
        async fn estimate_contract_call_fee(&self) -> Result<u128, X402Error> {
            Ok(1_000)
        }
    }

    struct MockTxBuilder;
    #[async_trait]
    impl TxBuilder for MockTxBuilder {
        async fn build_sponsored_transfer(
            &self,
            _token: Token,
            _amount: u128,
            _recipient: &str,
        ) -> Result<SignedTx, X402Error> {
            Ok(SignedTx {
                hex_with_prefix: "0xdeadbeef".to_string(),
            })
        }
    }

    fn requirements_header() -> String {
        let envelope = PaymentRequiredEnvelope {
            accepts: vec![PaymentOption {
                network: "stacks:mainnet".to_string(),
                asset: "sbtc".to_string(),
                amount: "100000".to_string(),
                pay_to: "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".to_string(),
            }],
            resource: "/resource".to_string(),
            x402_version: 2,
        };
        BASE64_URL.encode(serde_json::to_vec(&envelope).unwrap())
    }

    #[tokio::test]
    async fn s5_payment_required_then_success_settles() {
        let relay = MockRelay {
            responses: Mutex::new(vec![RelayOutcome::PaymentRequired, RelayOutcome::Ok { status: 200 }]),
            calls: AtomicU32::new(0),
            requirements_header: requirements_header(),
        };
        let dedup = DedupCache::new();
        let receipt = run_once(
            &dedup,
            &relay,
            &MockBalances,
            &MockTxBuilder,
            "stacks:mainnet",
            "GET",
            "https://example.com/resource",
            "",
            "",
            "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7",
        )
        .await
        .unwrap();
        assert_eq!(receipt.status, 200);
        assert_eq!(relay.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_402_is_fatal_not_a_loop() {
        let relay = MockRelay {
            responses: Mutex::new(vec![RelayOutcome::PaymentRequired, RelayOutcome::PaymentRequired]),
            calls: AtomicU32::new(0),
            requirements_header: requirements_header(),
        };
        let dedup = DedupCache::new();
        let err = run_once(
            &dedup,
            &relay,
            &MockBalances,
            &MockTxBuilder,
            "stacks:mainnet",
            "GET",
            "https://example.com/resource",
            "",
            "",
            "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, X402Error::RetryExceeded));
        assert_eq!(relay.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dedup_window_returns_cached_txid_without_resending() {
        let dedup = DedupCache::new();
        let key = DedupCache::key("GET", "https://example.com", "", "");
        dedup.put(key, "0xcached".to_string()).await;

        let relay = MockRelay {
            responses: Mutex::new(vec![]),
            calls: AtomicU32::new(0),
            requirements_header: requirements_header(),
        };
        let receipt = run_once(
            &dedup,
            &relay,
            &MockBalances,
            &MockTxBuilder,
            "stacks:mainnet",
            "GET",
            "https://example.com",
            "",
            "",
            "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7",
        )
        .await
        .unwrap();
        assert_eq!(receipt.txid, "0xcached");
        assert_eq!(relay.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn token_selection_classifies_sbtc_contract_identifier() {
        let envelope = PaymentRequiredEnvelope {
            accepts: vec![PaymentOption {
                network: "stacks:mainnet".to_string(),
                asset: "SP000000000000000000002Q6VF78.sbtc-token::token-sbtc".to_string(),
                amount: "5000".to_string(),
                pay_to: "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".to_string(),
            }],
            resource: String::new(),
            x402_version: 2,
        };
        let (_, token) = select_option(&envelope, "stacks:mainnet").unwrap();
        assert_eq!(token, Token::Sbtc);
    }

    #[test]
    fn network_mismatch_is_rejected() {
        let envelope = PaymentRequiredEnvelope {
            accepts: vec![PaymentOption {
                network: "stacks:testnet".to_string(),
                asset: "stx".to_string(),
                amount: "100".to_string(),
                pay_to: "ST2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7".to_string(),
            }],
            resource: String::new(),
            x402_version: 2,
        };
        let err = select_option(&envelope, "stacks:mainnet").unwrap_err();
        assert!(matches!(err, X402Error::NetworkMismatch(_, _)));
    }
}
