//! REST API for the Slurp gateway
//!
//! Rate-limited JSON endpoints for the faucet, the ADA deposit flow, address
//! lookups and relationship analysis. Every route lives under `/api`; errors
//! are returned as `{ "error": "..." }`.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Path, Query, Request, State,
    },
    http::{self, header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::address::{CardanoAddress, Network};
use crate::config::Config;
use crate::deposit::{DepositPreview, DepositService, SubmittedTransaction, UnsignedDeposit};
use crate::error::GatewayError;
use crate::faucet::{Faucet, FaucetClaim};
use crate::provider::ChainProvider;
use crate::relationships::{AddressAnalysis, OwnershipReport, RelationshipAnalyzer};
use crate::units::Lovelace;

const MAX_REQUEST_BODY_SIZE: usize = 256 * 1024;

/// Shared state behind every handler
pub struct Gateway {
    provider: Arc<dyn ChainProvider>,
    network: Network,
    production: bool,
    cors_origins: Vec<String>,
    bind: String,
    port: u16,
    deposits: DepositService,
    faucet: Faucet,
    analyzer: RelationshipAnalyzer,
    api_stats: RwLock<ApiStats>,
    rate_limiter: Mutex<RateLimiter>,
}

/// API statistics and monitoring
#[derive(Debug, Default)]
struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    rate_limited_requests: u64,
    deposits_built: u64,
    transactions_submitted: u64,
    faucet_claims: u64,
    analyses: u64,
    start_time: Option<Instant>,
}

impl ApiStats {
    fn new() -> Self {
        ApiStats {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    fn record_request(&mut self, status: StatusCode) {
        self.total_requests += 1;
        if status.is_success() {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.rate_limited_requests += 1;
        }
    }
}

/// Fixed-window request counter per client
#[derive(Debug)]
struct RateLimiter {
    limit: u32,
    window: Duration,
    requests: HashMap<String, (u32, Instant)>,
}

impl RateLimiter {
    fn new(limit: u32, window: Duration) -> Self {
        RateLimiter {
            limit,
            window,
            requests: HashMap::new(),
        }
    }

    /// Counts a request from `identifier`, returning the seconds until the
    /// window resets when the limit is already reached.
    fn check_rate_limit(&mut self, identifier: &str, now: Instant) -> Result<(), u64> {
        let window = self.window;

        // Clean up old entries
        self.requests
            .retain(|_, (_, started)| now.duration_since(*started) < window);

        let entry = self
            .requests
            .entry(identifier.to_string())
            .or_insert((0, now));

        if entry.0 >= self.limit {
            let elapsed = now.duration_since(entry.1);
            let retry_after = window.saturating_sub(elapsed).as_secs().max(1);
            return Err(retry_after);
        }

        entry.0 += 1;
        Ok(())
    }
}

impl Gateway {
    pub fn new(config: &Config, provider: Arc<dyn ChainProvider>) -> crate::error::Result<Self> {
        Ok(Self {
            deposits: DepositService::from_config(config, provider.clone())?,
            faucet: Faucet::from_config(config, provider.clone())?,
            analyzer: RelationshipAnalyzer::new(
                provider.clone(),
                config.analyzer.max_transactions,
                config.analyzer.max_addresses,
            )
            .with_network(config.provider.network),
            provider,
            network: config.provider.network,
            production: config.server.environment.is_production(),
            cors_origins: config.server.cors_origins.clone(),
            bind: config.server.bind.clone(),
            port: config.server.port,
            api_stats: RwLock::new(ApiStats::new()),
            rate_limiter: Mutex::new(RateLimiter::new(
                config.rate_limit.requests,
                Duration::from_secs(config.rate_limit.window_secs),
            )),
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Get API statistics
    pub async fn get_stats(&self) -> ApiStatsResponse {
        let stats = self.api_stats.read().await;
        let uptime = stats.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0);

        ApiStatsResponse {
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            rate_limited_requests: stats.rate_limited_requests,
            deposits_built: stats.deposits_built,
            transactions_submitted: stats.transactions_submitted,
            faucet_claims: stats.faucet_claims,
            analyses: stats.analyses,
            uptime_seconds: uptime,
        }
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Gateway(GatewayError),
    InvalidInput(String),
    Unavailable(String),
    RateLimitExceeded { retry_after_secs: u64 },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Gateway(e) => match e {
                GatewayError::InvalidAddress(_)
                | GatewayError::InvalidAmount(_)
                | GatewayError::InvalidTransaction(_)
                | GatewayError::InsufficientFunds(_)
                | GatewayError::TransactionTooLarge { .. }
                | GatewayError::CborError(_) => StatusCode::BAD_REQUEST,
                GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
                GatewayError::CooldownActive { .. } => StatusCode::TOO_MANY_REQUESTS,
                GatewayError::ProviderError(_) => StatusCode::BAD_GATEWAY,
                GatewayError::ProviderRateLimited
                | GatewayError::FaucetDisabled
                | GatewayError::ConfigError(_) => StatusCode::SERVICE_UNAVAILABLE,
                GatewayError::CryptoError(_) | GatewayError::IoError(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::Gateway(GatewayError::CooldownActive { remaining_secs }) => Some(*remaining_secs),
            ApiError::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after();
        let message = match self {
            ApiError::Gateway(e) => e.to_string(),
            ApiError::InvalidInput(msg) | ApiError::Unavailable(msg) => msg,
            ApiError::RateLimitExceeded { .. } => "Rate limit exceeded".to_string(),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "api.error");
        }

        let mut response = (
            status,
            Json(ErrorResponse {
                error: message,
                retry_after,
            }),
        )
            .into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError::Gateway(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// An amount as sent by the frontend: a decimal ADA string or integer lovelace.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Lovelace(u64),
    Ada(String),
}

impl AmountInput {
    fn to_lovelace(&self) -> Result<Lovelace, ApiError> {
        match self {
            AmountInput::Lovelace(lovelace) => Ok(Lovelace(*lovelace)),
            AmountInput::Ada(text) => Ok(Lovelace::parse_ada(text)?),
        }
    }
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    pub amount: Option<String>,
}

#[derive(Deserialize)]
pub struct BuildTxRequest {
    pub address: String,
    pub amount: AmountInput,
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub tx_cbor: String,
    #[serde(default)]
    pub witness_set: Option<String>,
}

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub address: String,
}

#[derive(Deserialize)]
pub struct BeneficialOwnersRequest {
    pub addresses: Vec<String>,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub lovelace: Lovelace,
    pub ada: String,
    pub assets: Vec<AssetQuantity>,
    pub tx_count: u64,
}

#[derive(Serialize)]
pub struct AssetQuantity {
    pub unit: String,
    pub quantity: String,
}

#[derive(Serialize)]
pub struct ApiStatsResponse {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub deposits_built: u64,
    pub transactions_submitted: u64,
    pub faucet_claims: u64,
    pub analyses: u64,
    pub uptime_seconds: u64,
}

// ============================================================================
// Middleware
// ============================================================================

/// Client key for rate limiting: first `X-Forwarded-For` hop, else the peer address.
fn client_identifier(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn rate_limit_middleware(
    State(gateway): State<Arc<Gateway>>,
    req: Request,
    next: Next,
) -> Response {
    let client = client_identifier(&req);
    let verdict = gateway
        .rate_limiter
        .lock()
        .check_rate_limit(&client, Instant::now());
    match verdict {
        Ok(()) => next.run(req).await,
        Err(retry_after_secs) => {
            tracing::warn!(%client, retry_after_secs, "api.rate_limited");
            ApiError::RateLimitExceeded { retry_after_secs }.into_response()
        }
    }
}

async fn stats_middleware(State(gateway): State<Arc<Gateway>>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    let mut stats = gateway.api_stats.write().await;
    stats.record_request(response.status());

    response
}

/// Replaces 500/502 bodies with a generic message in production. The
/// detailed error has already been logged by `ApiError`.
async fn redaction_middleware(
    State(gateway): State<Arc<Gateway>>,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    if !gateway.production {
        return response;
    }
    let message = match response.status() {
        StatusCode::INTERNAL_SERVER_ERROR => "Internal server error",
        StatusCode::BAD_GATEWAY => "Blockchain provider unavailable",
        _ => return response,
    };
    (
        response.status(),
        Json(ErrorResponse {
            error: message.to_string(),
            retry_after: None,
        }),
    )
        .into_response()
}

/// Logs method, path, status and duration of every request.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(allowed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Build the API router with all endpoints
pub fn build_api_router(gateway: Arc<Gateway>) -> Router {
    let cors = cors_layer(&gateway.cors_origins);

    let api_routes = Router::new()
        // System endpoints
        .route("/health", get(health_check))
        .route("/stats", get(get_api_stats))
        // Address endpoints
        .route("/address/:addr/balance", get(get_address_balance))
        // Deposit endpoints
        .route("/deposit/preview", get(preview_deposit))
        .route("/build-tx", post(build_deposit_tx))
        .route("/submit", post(submit_transaction))
        // Faucet
        .route("/slurp", post(claim_tokens))
        // Relationship intelligence
        .route("/relationships/beneficial-owners", post(analyze_beneficial_owners))
        .route("/relationships/:addr", get(analyze_relationships))
        .layer(middleware::from_fn_with_state(
            gateway.clone(),
            rate_limit_middleware,
        ));

    // logging outermost so rejected and redacted responses are still timed
    Router::new()
        .nest("/api", api_routes)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            gateway.clone(),
            redaction_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            gateway.clone(),
            stats_middleware,
        ))
        .layer(middleware::from_fn(logging_middleware))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .layer(cors)
        .with_state(gateway)
}

/// Run the API server until the process is stopped
pub async fn run_api_server(gateway: Arc<Gateway>) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("{}:{}", gateway.bind, gateway.port).parse()?;
    let app = build_api_router(gateway.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        network = gateway.network.as_str(),
        provider = gateway.provider.name(),
        faucet_enabled = gateway.faucet.is_enabled(),
        "api.listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn not_found() -> ApiError {
    ApiError::Gateway(GatewayError::NotFound("Route not found".to_string()))
}

async fn health_check(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "network": gateway.network.as_str(),
            "provider": gateway.provider.name(),
            "faucet": gateway.faucet.status(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn get_api_stats(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let stats = gateway.get_stats().await;
    Json(stats)
}

async fn get_address_balance(
    State(gateway): State<Arc<Gateway>>,
    Path(addr_str): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let address = CardanoAddress::parse(&addr_str)?;
    address.ensure_network(gateway.network)?;

    let balance = gateway
        .provider
        .address_balance(address.as_bech32())
        .await
        .map_err(GatewayError::from)?;

    Ok(Json(BalanceResponse {
        address: balance.address,
        lovelace: balance.lovelace,
        ada: balance.lovelace.to_ada_string(),
        assets: balance
            .assets
            .iter()
            .map(|(asset, quantity)| AssetQuantity {
                unit: asset.unit(),
                quantity: quantity.to_string(),
            })
            .collect(),
        tx_count: balance.tx_count,
    }))
}

async fn preview_deposit(
    State(gateway): State<Arc<Gateway>>,
    query: Result<Query<PreviewQuery>, QueryRejection>,
) -> Result<Json<DepositPreview>, ApiError> {
    let Query(query) = query?;
    let amount = query
        .amount
        .ok_or_else(|| ApiError::InvalidInput("Query parameter 'amount' is required".to_string()))?;
    let amount = Lovelace::parse_ada(&amount)?;
    Ok(Json(gateway.deposits.preview(amount).await?))
}

async fn build_deposit_tx(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<BuildTxRequest>, JsonRejection>,
) -> Result<Json<UnsignedDeposit>, ApiError> {
    let Json(request) = payload?;
    let amount = request.amount.to_lovelace()?;
    let deposit = gateway.deposits.build(&request.address, amount).await?;

    gateway.api_stats.write().await.deposits_built += 1;
    Ok(Json(deposit))
}

async fn submit_transaction(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmittedTransaction>, ApiError> {
    let Json(request) = payload?;
    if request.tx_cbor.trim().is_empty() {
        return Err(ApiError::InvalidInput("tx_cbor is required".to_string()));
    }
    let submitted = gateway
        .deposits
        .submit(&request.tx_cbor, request.witness_set.as_deref())
        .await?;

    gateway.api_stats.write().await.transactions_submitted += 1;
    Ok(Json(submitted))
}

async fn claim_tokens(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> Result<Json<FaucetClaim>, ApiError> {
    let Json(request) = payload?;
    let claim = gateway
        .faucet
        .claim(&request.address)
        .await
        .map_err(|e| match e {
            GatewayError::InsufficientFunds(msg) => ApiError::Unavailable(msg),
            other => ApiError::Gateway(other),
        })?;

    gateway.api_stats.write().await.faucet_claims += 1;
    Ok(Json(claim))
}

async fn analyze_relationships(
    State(gateway): State<Arc<Gateway>>,
    Path(addr_str): Path<String>,
) -> Result<Json<AddressAnalysis>, ApiError> {
    let analysis = gateway.analyzer.analyze(&addr_str).await?;

    gateway.api_stats.write().await.analyses += 1;
    Ok(Json(analysis))
}

async fn analyze_beneficial_owners(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<BeneficialOwnersRequest>, JsonRejection>,
) -> Result<Json<OwnershipReport>, ApiError> {
    let Json(request) = payload?;
    // limits apply to the deduplicated list
    let report = gateway.analyzer.analyze_many(&request.addresses).await?;

    gateway.api_stats.write().await.analyses += 1;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_window() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_rate_limit("a", start).is_ok());
        assert!(limiter.check_rate_limit("a", start).is_ok());
        let retry = limiter.check_rate_limit("a", start + Duration::from_secs(20));
        assert_eq!(retry, Err(40));

        // other clients are unaffected
        assert!(limiter.check_rate_limit("b", start).is_ok());

        // the window resets
        assert!(limiter
            .check_rate_limit("a", start + Duration::from_secs(61))
            .is_ok());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (GatewayError::InvalidAddress("x".into()), StatusCode::BAD_REQUEST),
            (GatewayError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                GatewayError::CooldownActive { remaining_secs: 5 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (GatewayError::ProviderError("x".into()), StatusCode::BAD_GATEWAY),
            (GatewayError::FaucetDisabled, StatusCode::SERVICE_UNAVAILABLE),
            (GatewayError::IoError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::Gateway(error).status(), status);
        }
    }

    #[test]
    fn test_amount_input() {
        let parsed: AmountInput = serde_json::from_str("\"2.5\"").unwrap();
        assert_eq!(parsed.to_lovelace().unwrap(), Lovelace(2_500_000));
        let parsed: AmountInput = serde_json::from_str("3000000").unwrap();
        assert_eq!(parsed.to_lovelace().unwrap(), Lovelace(3_000_000));
    }
}
