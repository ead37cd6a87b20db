//! Integration tests for the Slurp API endpoints
//!
//! Every test runs the full router against an in-memory chain provider.

use async_trait::async_trait;
use axum_test::TestServer;
use serde_json::{json, Value};
use slurp::address::{CardanoAddress, Network};
use slurp::api::{build_api_router, Gateway};
use slurp::config::{Config, Environment};
use slurp::provider::{
    AddressBalance, AssetBundle, AssetId, ChainProvider, InMemoryProvider, ProtocolParameters,
    ProviderError, ProviderResult, TxParties, TxRef, Utxo,
};
use slurp::transaction::{PaymentSigner, SignedTransaction};
use slurp::units::Lovelace;
use std::sync::Arc;

const POLICY: &str = "bb00000000000000000000000000000000000000000000000000bb02";
const FAUCET_SEED: [u8; 32] = [7; 32];
const WALLET_SEED: [u8; 32] = [8; 32];

fn treasury() -> CardanoAddress {
    CardanoAddress::enterprise(&[0xee; 28], Network::Preprod).unwrap()
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.deposit.treasury_address = Some(treasury().to_string());
    config.faucet.signing_key = Some(hex::encode(FAUCET_SEED));
    config.faucet.policy_id = POLICY.to_string();
    config.faucet.asset_name = hex::encode("SLURP");
    config.faucet.token_amount = 500;
    config
}

fn funded_provider() -> Arc<InMemoryProvider> {
    let provider = Arc::new(InMemoryProvider::new());

    let faucet = PaymentSigner::from_seed(FAUCET_SEED)
        .address(Network::Preprod)
        .unwrap();
    let mut assets = AssetBundle::new();
    assets.insert(AssetId::new(POLICY, hex::encode("SLURP")), 1_000_000);
    provider.add_utxo(Utxo {
        tx_hash: "01".repeat(32),
        output_index: 0,
        address: faucet.to_string(),
        lovelace: Lovelace(100_000_000),
        assets,
    });

    let wallet = PaymentSigner::from_seed(WALLET_SEED)
        .address(Network::Preprod)
        .unwrap();
    provider.add_utxo(Utxo {
        tx_hash: "02".repeat(32),
        output_index: 3,
        address: wallet.to_string(),
        lovelace: Lovelace(40_000_000),
        assets: AssetBundle::new(),
    });

    provider
}

fn server_with(config: Config, provider: Arc<dyn ChainProvider>) -> TestServer {
    let gateway = Arc::new(Gateway::new(&config, provider).expect("Failed to build gateway"));
    TestServer::new(build_api_router(gateway)).expect("Failed to create test server")
}

fn recipient() -> String {
    CardanoAddress::enterprise(&[0x42; 28], Network::Preprod)
        .unwrap()
        .to_string()
}

/// Fails every call the way an unreachable indexer would.
struct DownProvider;

#[async_trait]
impl ChainProvider for DownProvider {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn protocol_parameters(&self) -> ProviderResult<ProtocolParameters> {
        Err(down())
    }

    async fn latest_slot(&self) -> ProviderResult<u64> {
        Err(down())
    }

    async fn address_utxos(&self, _address: &str) -> ProviderResult<Vec<Utxo>> {
        Err(down())
    }

    async fn address_balance(&self, _address: &str) -> ProviderResult<AddressBalance> {
        Err(down())
    }

    async fn address_transactions(&self, _address: &str, _limit: usize) -> ProviderResult<Vec<TxRef>> {
        Err(down())
    }

    async fn transaction_parties(&self, _tx_hash: &str) -> ProviderResult<TxParties> {
        Err(down())
    }

    async fn submit_transaction(&self, _cbor: &[u8]) -> ProviderResult<String> {
        Err(down())
    }
}

fn down() -> ProviderError {
    ProviderError::Upstream {
        status: 500,
        body: "secret upstream detail".to_string(),
    }
}

#[tokio::test]
async fn test_health_and_stats() {
    let server = server_with(test_config(), funded_provider());

    let response = server.get("/api/health").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["network"], "preprod");
    assert_eq!(json["provider"], "memory");
    assert_eq!(json["faucet"]["enabled"], true);
    assert!(json["timestamp"].is_string());

    let response = server.get("/api/stats").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert!(json["total_requests"].as_u64().unwrap() >= 1);
    assert!(json["successful_requests"].is_number());
    assert!(json["failed_requests"].is_number());
    assert!(json["faucet_claims"].is_number());
    assert!(json["uptime_seconds"].is_number());
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let server = server_with(test_config(), funded_provider());

    let response = server.get("/api/does-not-exist").await;
    assert_eq!(response.status_code(), 404);
    let json: Value = response.json();
    assert!(json["error"].is_string());

    let response = server.get("/index.html").await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_address_balance() {
    let server = server_with(test_config(), funded_provider());
    let wallet = PaymentSigner::from_seed(WALLET_SEED)
        .address(Network::Preprod)
        .unwrap();

    let response = server
        .get(&format!("/api/address/{}/balance", wallet))
        .await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["lovelace"], 40_000_000);
    assert_eq!(json["ada"], "40.000000");

    // hex form from a CIP-30 wallet resolves to the same address
    let response = server
        .get(&format!("/api/address/{}/balance", wallet.to_hex()))
        .await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["address"], wallet.to_string());

    let response = server.get("/api/address/not-an-address/balance").await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .get(&format!("/api/address/{}/balance", recipient()))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_deposit_preview() {
    let server = server_with(test_config(), funded_provider());

    let response = server.get("/api/deposit/preview?amount=10").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["amount"], 10_000_000);
    assert_eq!(json["fee_source"], "network");
    let fee = json["estimated_fee"].as_u64().unwrap();
    assert_eq!(json["total"].as_u64().unwrap(), 10_000_000 + fee);

    let response = server.get("/api/deposit/preview").await;
    assert_eq!(response.status_code(), 400);

    let response = server.get("/api/deposit/preview?amount=abc").await;
    assert_eq!(response.status_code(), 400);

    // below the configured minimum
    let response = server.get("/api/deposit/preview?amount=0.5").await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_deposit_preview_falls_back() {
    let provider = funded_provider();
    provider.set_parameters_unavailable(true);
    let server = server_with(test_config(), provider);

    let response = server.get("/api/deposit/preview?amount=5").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["fee_source"], "fallback");
}

#[tokio::test]
async fn test_build_sign_and_submit_deposit() {
    let provider = funded_provider();
    let server = server_with(test_config(), provider.clone());
    let wallet = PaymentSigner::from_seed(WALLET_SEED);
    let sender = wallet.address(Network::Preprod).unwrap();

    let response = server
        .post("/api/build-tx")
        .json(&json!({ "address": sender.to_string(), "amount": "12.5" }))
        .await;
    assert_eq!(response.status_code(), 200);
    let built: Value = response.json();
    assert_eq!(built["amount"], 12_500_000);
    assert_eq!(built["treasury"], treasury().to_string());
    let tx_cbor = built["tx_cbor"].as_str().unwrap().to_string();

    // an unsigned transaction is refused
    let response = server
        .post("/api/submit")
        .json(&json!({ "tx_cbor": tx_cbor }))
        .await;
    assert_eq!(response.status_code(), 400);

    // the browser wallet returns only its witness set
    let mut signed = SignedTransaction::from_hex(&tx_cbor).unwrap();
    wallet.sign(&mut signed).unwrap();
    let (vkey, signature) = signed.vkey_witnesses()[0].clone();
    let witness_set = ciborium::Value::Map(vec![(
        ciborium::Value::Integer(0.into()),
        ciborium::Value::Array(vec![ciborium::Value::Array(vec![
            ciborium::Value::Bytes(vkey),
            ciborium::Value::Bytes(signature),
        ])]),
    )]);
    let mut witness_bytes = Vec::new();
    ciborium::into_writer(&witness_set, &mut witness_bytes).unwrap();

    let response = server
        .post("/api/submit")
        .json(&json!({ "tx_cbor": tx_cbor, "witness_set": hex::encode(witness_bytes) }))
        .await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["tx_hash"], built["tx_hash"]);
    assert_eq!(provider.submitted().len(), 1);
}

#[tokio::test]
async fn test_build_tx_validation() {
    let server = server_with(test_config(), funded_provider());

    let response = server
        .post("/api/build-tx")
        .json(&json!({ "address": "addr_test1garbage", "amount": "5" }))
        .await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .post("/api/build-tx")
        .json(&json!({ "address": recipient() }))
        .await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert!(json["error"].is_string());

    let response = server
        .post("/api/build-tx")
        .json(&json!({ "address": recipient(), "amount": "20000" }))
        .await;
    assert_eq!(response.status_code(), 400);

    // valid request, but the wallet holds nothing
    let response = server
        .post("/api/build-tx")
        .json(&json!({ "address": recipient(), "amount": "5" }))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_faucet_claim_and_cooldown() {
    let provider = funded_provider();
    let server = server_with(test_config(), provider.clone());

    let response = server
        .post("/api/slurp")
        .json(&json!({ "address": recipient() }))
        .await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["token_amount"], 500);
    assert_eq!(json["tx_hash"].as_str().unwrap().len(), 64);
    assert_eq!(provider.submitted().len(), 1);

    let response = server
        .post("/api/slurp")
        .json(&json!({ "address": recipient() }))
        .await;
    assert_eq!(response.status_code(), 429);
    let json: Value = response.json();
    assert!(json["retry_after"].as_u64().unwrap() > 0);
    assert!(json["error"].as_str().unwrap().contains("cooldown"));
    assert_eq!(provider.submitted().len(), 1);

    let response = server.get("/api/stats").await;
    let json: Value = response.json();
    assert_eq!(json["faucet_claims"], 1);
}

#[tokio::test]
async fn test_faucet_disabled() {
    let mut config = test_config();
    config.faucet.signing_key = None;
    let server = server_with(config, funded_provider());

    let response = server
        .post("/api/slurp")
        .json(&json!({ "address": recipient() }))
        .await;
    assert_eq!(response.status_code(), 503);
}

#[tokio::test]
async fn test_faucet_rejects_mainnet_address() {
    let server = server_with(test_config(), funded_provider());
    let mainnet = CardanoAddress::enterprise(&[0x42; 28], Network::Mainnet).unwrap();

    let response = server
        .post("/api/slurp")
        .json(&json!({ "address": mainnet.to_string() }))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_rate_limit() {
    let mut config = test_config();
    config.rate_limit.requests = 3;
    let server = server_with(config, funded_provider());

    for _ in 0..3 {
        let response = server.get("/api/health").await;
        assert_eq!(response.status_code(), 200);
    }
    let response = server.get("/api/health").await;
    assert_eq!(response.status_code(), 429);
    let json: Value = response.json();
    assert_eq!(json["error"], "Rate limit exceeded");
    assert!(response.headers().contains_key("retry-after"));

    // a different client has its own window
    let response = server
        .get("/api/health")
        .add_header(
            "x-forwarded-for".parse::<axum::http::HeaderName>().unwrap(),
            "203.0.113.9".parse::<axum::http::HeaderValue>().unwrap(),
        )
        .await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_upstream_errors_are_redacted_in_production() {
    let mut config = test_config();
    config.server.environment = Environment::Production;
    let server = server_with(config, Arc::new(DownProvider));

    let response = server
        .get(&format!("/api/address/{}/balance", recipient()))
        .await;
    assert_eq!(response.status_code(), 502);
    let json: Value = response.json();
    assert!(!json["error"].as_str().unwrap().contains("secret"));

    let server = server_with(test_config(), Arc::new(DownProvider));
    let response = server
        .get(&format!("/api/address/{}/balance", recipient()))
        .await;
    assert_eq!(response.status_code(), 502);
    let json: Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("secret"));
}

#[tokio::test]
async fn test_relationship_endpoints() {
    let provider = funded_provider();
    let me = CardanoAddress::enterprise(&[0x10; 28], Network::Preprod).unwrap().to_string();
    let other = CardanoAddress::enterprise(&[0x11; 28], Network::Preprod).unwrap().to_string();
    let hub = CardanoAddress::enterprise(&[0x12; 28], Network::Preprod).unwrap().to_string();

    for (i, source) in [&me, &me, &other].into_iter().enumerate() {
        provider.add_transaction(
            TxParties {
                hash: format!("{:064x}", i + 1),
                inputs: vec![source.clone()],
                outputs: vec![hub.clone(), source.clone()],
            },
            100 + i as u64,
            1_700_000_000 + i as i64 * 60,
        );
    }
    let server = server_with(test_config(), provider);

    let response = server.get(&format!("/api/relationships/{}", me)).await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["transaction_count"], 2);
    assert_eq!(json["connections"][0]["target"], hub);
    assert_eq!(json["connections"][0]["strength"], 2);
    assert_eq!(json["connections"][0]["type"], "outgoing");
    assert_eq!(json["clusters"][0]["tier"], "repeated");
    assert!(json["risk"]["score"].is_number());

    let response = server.get("/api/relationships/bogus").await;
    assert_eq!(response.status_code(), 400);

    let response = server
        .post("/api/relationships/beneficial-owners")
        .json(&json!({ "addresses": [me, other] }))
        .await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["beneficial_owners"][0]["address"], hub);
    assert_eq!(json["beneficial_owners"][0]["likelihood"], 100.0);
    assert_eq!(json["beneficial_owners"][0]["strength"], "strong");
    assert_eq!(json["timing_correlations"].as_array().unwrap().len(), 1);

    let response = server
        .post("/api/relationships/beneficial-owners")
        .json(&json!({ "addresses": [] }))
        .await;
    assert_eq!(response.status_code(), 400);

    let too_many: Vec<String> = (0..11u8)
        .map(|i| {
            CardanoAddress::enterprise(&[i; 28], Network::Preprod)
                .unwrap()
                .to_string()
        })
        .collect();
    let response = server
        .post("/api/relationships/beneficial-owners")
        .json(&json!({ "addresses": too_many }))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_owner_limit_counts_unique_addresses() {
    let server = server_with(test_config(), Arc::new(InMemoryProvider::new()));

    let mut addresses: Vec<String> = (0..10u8)
        .map(|i| {
            CardanoAddress::enterprise(&[i; 28], Network::Preprod)
                .unwrap()
                .to_string()
        })
        .collect();
    addresses.push(addresses[0].clone());
    assert_eq!(addresses.len(), 11);

    let response = server
        .post("/api/relationships/beneficial-owners")
        .json(&json!({ "addresses": addresses }))
        .await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["analyzed"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn test_relationships_reject_other_network() {
    let server = server_with(test_config(), funded_provider());
    let mainnet = CardanoAddress::enterprise(&[0x10; 28], Network::Mainnet)
        .unwrap()
        .to_string();

    let response = server.get(&format!("/api/relationships/{}", mainnet)).await;
    assert_eq!(response.status_code(), 400);
    let json: Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("preprod"));

    let response = server
        .post("/api/relationships/beneficial-owners")
        .json(&json!({ "addresses": [mainnet] }))
        .await;
    assert_eq!(response.status_code(), 400);
}
