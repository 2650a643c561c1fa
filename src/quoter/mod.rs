//! Multi-hop XYK constant-product price-impact quoter, used by the DEX
//! client to compute combined impact across a route of on-chain pools.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("pool read failed: {0}")]
    PoolRead(String),

    #[error("empty route")]
    EmptyRoute,

    #[error("no price impact available: a hop fetch failed on a multi-hop route")]
    NoImpactAvailable,
}

impl QuoteError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UpstreamFailure
    }
}

/// The five pool fields the quoter reads per hop.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub x_balance: u128,
    pub y_balance: u128,
    pub x_protocol_fee_bps: u32,
    pub y_protocol_fee_bps: u32,
    pub token_y_name: String,
}

/// Trade direction through a pool: `XForY` consumes the x side, `YForX`
/// consumes the y side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    XForY,
    YForX,
}

/// One read-only call per pool in the route.
#[async_trait]
pub trait PoolReader: Send + Sync {
    async fn read_pool(&self, pool_id: &str) -> Result<PoolState, QuoteError>;
}

#[derive(Debug, Clone, Copy)]
pub struct HopInput {
    pub reserve_in: u128,
    pub reserve_out: u128,
    pub fee_bps: u32,
}

impl PoolState {
    pub fn hop_input(&self, direction: Direction) -> HopInput {
        match direction {
            Direction::XForY => HopInput {
                reserve_in: self.x_balance,
                reserve_out: self.y_balance,
                fee_bps: self.x_protocol_fee_bps,
            },
            Direction::YForX => HopInput {
                reserve_in: self.y_balance,
                reserve_out: self.x_balance,
                fee_bps: self.y_protocol_fee_bps,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
    Severe,
}

pub fn severity(combined_impact_bps: u32) -> Severity {
    match combined_impact_bps {
        0..=99 => Severity::Low,
        100..=299 => Severity::Medium,
        300..=999 => Severity::High,
        _ => Severity::Severe,
    }
}

const IMPACT_SCALE: u128 = 1_000_000;

/// Fee-excluded per-hop impact: `x / (reserve_in + x)`, scaled by
/// `IMPACT_SCALE` and only converted to `f64` once, at the end.
fn per_hop_impact_scaled(x: u128, reserve_in: u128) -> u128 {
    if reserve_in + x == 0 {
        return 0;
    }
    (x * IMPACT_SCALE) / (reserve_in + x)
}

/// Fee-inclusive per-hop output:
/// `(x * (10_000 - fee_bps) * reserve_out) / (reserve_in * 10_000 + x * (10_000 - fee_bps))`.
fn per_hop_output(x: u128, hop: &HopInput) -> u128 {
    let fee_multiplier = 10_000u128.saturating_sub(hop.fee_bps as u128);
    let numerator = x * fee_multiplier * hop.reserve_out;
    let denominator = hop.reserve_in * 10_000 + x * fee_multiplier;
    if denominator == 0 {
        return 0;
    }
    numerator / denominator
}

pub struct RouteQuote {
    pub output_amount: u128,
    /// Combined impact as a fraction in `[0, 1]`.
    pub combined_impact: f64,
    pub severity: Severity,
    pub total_fee_bps: u32,
}

/// Computes a quote across an ordered pool path. `pools` is
/// `(pool_state, direction)` per hop, already fetched by the caller (see
/// [`quote_route`] for the fetch-then-compute convenience wrapper).
pub fn compute_route(
    input_amount: u128,
    pools: &[(PoolState, Direction)],
) -> Result<RouteQuote, QuoteError> {
    if pools.is_empty() {
        return Err(QuoteError::EmptyRoute);
    }

    let mut amount = input_amount;
    let mut retained_product_scaled: u128 = IMPACT_SCALE; // running Π(1 - impact_i), scaled.
    let mut total_fee_bps: u32 = 0;

    for (pool, direction) in pools {
        let hop = pool.hop_input(*direction);
        let impact_scaled = per_hop_impact_scaled(amount, hop.reserve_in);
        retained_product_scaled =
            (retained_product_scaled * (IMPACT_SCALE - impact_scaled)) / IMPACT_SCALE;
        amount = per_hop_output(amount, &hop);
        total_fee_bps += hop.fee_bps;
    }

    let combined_impact = 1.0 - (retained_product_scaled as f64 / IMPACT_SCALE as f64);
    let combined_impact_bps = (combined_impact * 10_000.0).round() as u32;

    Ok(RouteQuote {
        output_amount: amount,
        combined_impact,
        severity: severity(combined_impact_bps),
        total_fee_bps,
    })
}

/// Fetches each hop's pool state with a 5 s timeout and computes the route
/// quote. If any hop fetch fails on a route with more than one hop, returns
/// [`QuoteError::NoImpactAvailable`] rather than a partial, misleading
/// impact; a single-hop route surfaces the underlying fetch error instead.
pub async fn quote_route(
    reader: &dyn PoolReader,
    input_amount: u128,
    route: &[(String, Direction)],
) -> Result<RouteQuote, QuoteError> {
    if route.is_empty() {
        return Err(QuoteError::EmptyRoute);
    }

    let mut pools = Vec::with_capacity(route.len());
    for (pool_id, direction) in route {
        match tokio::time::timeout(std::time::Duration::from_secs(5), reader.read_pool(pool_id)).await {
            Ok(Ok(state)) => pools.push((state, *direction)),
            Ok(Err(e)) => {
                if route.len() > 1 {
                    return Err(QuoteError::NoImpactAvailable);
                }
                return Err(e);
            }
            Err(_) => {
                if route.len() > 1 {
                    return Err(QuoteError::NoImpactAvailable);
                }
                return Err(QuoteError::PoolRead(format!("timed out reading pool {pool_id}")));
            }
        }
    }

    compute_route(input_amount, &pools)
}

/// Reads pool reserves from the Hiro API, the concrete `PoolReader` used in
/// production. Mirrors the teacher's Esplora HTTP client: one
/// `reqwest::Client` with a fixed per-call timeout, constructed once and
/// reused.
pub struct HiroPoolReader {
    client: reqwest::Client,
    base_url: String,
}

impl HiroPoolReader {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PoolReader for HiroPoolReader {
    async fn read_pool(&self, pool_id: &str) -> Result<PoolState, QuoteError> {
        let url = format!("{}/v2/contracts/call-read/{}", self.base_url, pool_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QuoteError::PoolRead(e.to_string()))?;

        if !response.status().is_success() {
            return Err(QuoteError::PoolRead(format!(
                "pool read returned status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| QuoteError::PoolRead(e.to_string()))?;

        let field = |name: &str| -> Result<u128, QuoteError> {
            body.get(name)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<u128>().ok())
                .ok_or_else(|| QuoteError::PoolRead(format!("missing or invalid field: {name}")))
        };

        let token_y_name = body
            .get("token-y-name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| QuoteError::PoolRead("missing or invalid field: token-y-name".to_string()))?
            .to_string();

        Ok(PoolState {
            x_balance: field("x-balance")?,
            y_balance: field("y-balance")?,
            x_protocol_fee_bps: field("x-protocol-fee")? as u32,
            y_protocol_fee_bps: field("y-protocol-fee")? as u32,
            token_y_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_hop_impact_matches_s4_vector() {
        let pool = PoolState {
            x_balance: 1_000_000,
            y_balance: 1_000_000,
            x_protocol_fee_bps: 30,
            y_protocol_fee_bps: 0,
            token_y_name: "token-y".to_string(),
        };
        let quote = compute_route(10_000, &[(pool, Direction::XForY)]).unwrap();
        assert!((quote.combined_impact - 0.0099).abs() < 0.001);
        assert_eq!(quote.severity, Severity::Low);
        assert_eq!(quote.total_fee_bps, 30);
    }

    #[test]
    fn impact_is_monotonically_non_decreasing() {
        let pool = PoolState {
            x_balance: 1_000_000,
            y_balance: 1_000_000,
            x_protocol_fee_bps: 0,
            y_protocol_fee_bps: 0,
            token_y_name: "token-y".to_string(),
        };
        let mut last_impact = 0.0;
        for x in [1_000u128, 10_000, 100_000, 500_000, 999_000] {
            let quote = compute_route(x, &[(pool.clone(), Direction::XForY)]).unwrap();
            assert!(quote.combined_impact >= last_impact);
            last_impact = quote.combined_impact;
        }
    }

    #[test]
    fn severity_bucketing() {
        assert_eq!(severity(50), Severity::Low);
        assert_eq!(severity(150), Severity::Medium);
        assert_eq!(severity(500), Severity::High);
        assert_eq!(severity(1500), Severity::Severe);
    }

    #[test]
    fn empty_route_rejected() {
        assert!(matches!(compute_route(100, &[]), Err(QuoteError::EmptyRoute)));
    }
}
