//! Relationship analyzer against an in-memory chain

use async_trait::async_trait;
use slurp::address::{CardanoAddress, Network};
use slurp::error::GatewayError;
use slurp::provider::{
    AddressBalance, ChainProvider, InMemoryProvider, ProtocolParameters, ProviderError,
    ProviderResult, TxParties, TxRef, Utxo,
};
use slurp::relationships::{
    ClusterTier, ConnectionType, OwnershipStrength, RelationshipAnalyzer, RiskLevel,
};
use std::sync::Arc;

const BASE_TIME: i64 = 1_700_000_000;

fn addr(tag: u8) -> String {
    CardanoAddress::enterprise(&[tag; 28], Network::Preprod)
        .unwrap()
        .to_string()
}

struct Chain {
    provider: InMemoryProvider,
    next: u64,
}

impl Chain {
    fn new() -> Self {
        Self {
            provider: InMemoryProvider::new(),
            next: 1,
        }
    }

    fn pay(&mut self, from: &str, to: &[&str], time: i64) {
        let mut outputs: Vec<String> = to.iter().map(|s| s.to_string()).collect();
        outputs.push(from.to_string());
        self.provider.add_transaction(
            TxParties {
                hash: format!("{:064x}", self.next),
                inputs: vec![from.to_string()],
                outputs,
            },
            self.next,
            time,
        );
        self.next += 1;
    }
}

/// Delegates to an in-memory chain but fails lookups for one address.
struct FlakyProvider {
    inner: InMemoryProvider,
    broken: String,
}

#[async_trait]
impl ChainProvider for FlakyProvider {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn protocol_parameters(&self) -> ProviderResult<ProtocolParameters> {
        self.inner.protocol_parameters().await
    }

    async fn latest_slot(&self) -> ProviderResult<u64> {
        self.inner.latest_slot().await
    }

    async fn address_utxos(&self, address: &str) -> ProviderResult<Vec<Utxo>> {
        self.inner.address_utxos(address).await
    }

    async fn address_balance(&self, address: &str) -> ProviderResult<AddressBalance> {
        self.inner.address_balance(address).await
    }

    async fn address_transactions(&self, address: &str, limit: usize) -> ProviderResult<Vec<TxRef>> {
        if address == self.broken {
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        self.inner.address_transactions(address, limit).await
    }

    async fn transaction_parties(&self, tx_hash: &str) -> ProviderResult<TxParties> {
        self.inner.transaction_parties(tx_hash).await
    }

    async fn submit_transaction(&self, cbor: &[u8]) -> ProviderResult<String> {
        self.inner.submit_transaction(cbor).await
    }
}

#[tokio::test]
async fn test_single_address_analysis() {
    let (me, alice, bob) = (addr(1), addr(2), addr(3));
    let mut chain = Chain::new();
    for i in 0..3 {
        chain.pay(&me, &[alice.as_str()], BASE_TIME + i * 100);
    }
    chain.pay(&alice, &[me.as_str()], BASE_TIME + 400);
    chain.pay(&me, &[bob.as_str()], BASE_TIME + 500);

    let analyzer = RelationshipAnalyzer::new(Arc::new(chain.provider), 25, 10);
    let analysis = analyzer.analyze(&me).await.unwrap();

    assert_eq!(analysis.transaction_count, 5);
    assert_eq!(analysis.connections.len(), 2);

    let alice_link = &analysis.connections[0];
    assert_eq!(alice_link.target, alice);
    assert_eq!(alice_link.strength, 4);
    assert_eq!(alice_link.connection_type, ConnectionType::Bidirectional);
    assert_eq!(alice_link.first_seen, BASE_TIME);
    assert_eq!(alice_link.last_seen, BASE_TIME + 400);

    assert_eq!(analysis.clusters[0].tier, ClusterTier::HighFrequency);
    assert_eq!(analysis.clusters[1].tier, ClusterTier::Single);

    // five transactions and a single high-frequency link score nothing
    assert_eq!(analysis.risk.score, 0);
    assert_eq!(analysis.risk.level, RiskLevel::Low);
}

#[tokio::test]
async fn test_transaction_limit_respected() {
    let (me, peer) = (addr(1), addr(2));
    let mut chain = Chain::new();
    for i in 0..10 {
        chain.pay(&me, &[peer.as_str()], BASE_TIME + i);
    }

    let analyzer = RelationshipAnalyzer::new(Arc::new(chain.provider), 4, 10);
    let analysis = analyzer.analyze(&me).await.unwrap();
    assert_eq!(analysis.transaction_count, 4);
    assert_eq!(analysis.connections[0].strength, 4);
    // the most recent transactions are the ones analyzed
    assert_eq!(analysis.connections[0].last_seen, BASE_TIME + 9);
    assert_eq!(analysis.connections[0].first_seen, BASE_TIME + 6);
}

#[tokio::test]
async fn test_quiet_address() {
    let analyzer = RelationshipAnalyzer::new(Arc::new(InMemoryProvider::new()), 25, 10);
    let analysis = analyzer.analyze(&addr(9)).await.unwrap();
    assert_eq!(analysis.transaction_count, 0);
    assert!(analysis.connections.is_empty());
    assert!(analysis.clusters.is_empty());
    assert_eq!(analysis.risk.score, 10);
}

#[tokio::test]
async fn test_invalid_address_rejected() {
    let analyzer = RelationshipAnalyzer::new(Arc::new(InMemoryProvider::new()), 25, 10);
    let err = analyzer.analyze("addr1nope").await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidAddress(_)));
}

#[tokio::test]
async fn test_shared_funder_across_addresses() {
    let (a, b, c, funder, stranger) = (addr(1), addr(2), addr(3), addr(4), addr(5));
    let mut chain = Chain::new();
    chain.pay(&funder, &[a.as_str(), b.as_str(), c.as_str()], BASE_TIME);
    chain.pay(&stranger, &[c.as_str()], BASE_TIME + 10 * 3600);

    let analyzer = RelationshipAnalyzer::new(Arc::new(chain.provider), 25, 10);
    let report = analyzer
        .analyze_many(&[a.clone(), b.clone(), c.clone(), a.clone()])
        .await
        .unwrap();

    // duplicates collapse
    assert_eq!(report.analyzed.len(), 3);
    assert!(report.failures.is_empty());

    // the funder is the only counterparty a and b have
    let funder_candidate = report
        .beneficial_owners
        .iter()
        .find(|candidate| candidate.address == funder)
        .unwrap();
    assert_eq!(funder_candidate.appearances, 3);
    assert_eq!(funder_candidate.likelihood, 100.0);
    assert_eq!(funder_candidate.strength, OwnershipStrength::Strong);
    assert!(!report
        .beneficial_owners
        .iter()
        .any(|candidate| candidate.address == stranger));

    // c's average activity is pulled into a later window
    assert_eq!(report.timing_correlations.len(), 1);
    assert_eq!(report.timing_correlations[0].addresses, vec![a, b]);
}

#[tokio::test]
async fn test_partial_failure_is_reported() {
    let (a, b, funder) = (addr(1), addr(2), addr(4));
    let mut chain = Chain::new();
    chain.pay(&funder, &[a.as_str(), b.as_str()], BASE_TIME);

    let provider = FlakyProvider {
        inner: chain.provider,
        broken: b.clone(),
    };
    let analyzer = RelationshipAnalyzer::new(Arc::new(provider), 25, 10);
    let report = analyzer.analyze_many(&[a.clone(), b.clone()]).await.unwrap();

    assert_eq!(report.analyzed.len(), 1);
    assert_eq!(report.analyzed[0].address, a);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].address, b);
    assert!(report.beneficial_owners.is_empty());
}

#[tokio::test]
async fn test_all_failures_is_an_error() {
    let provider = FlakyProvider {
        inner: InMemoryProvider::new(),
        broken: addr(1),
    };
    let analyzer = RelationshipAnalyzer::new(Arc::new(provider), 25, 10);
    let err = analyzer.analyze_many(&[addr(1)]).await.unwrap_err();
    assert!(matches!(err, GatewayError::ProviderError(_)));
}

#[tokio::test]
async fn test_address_limit() {
    let analyzer = RelationshipAnalyzer::new(Arc::new(InMemoryProvider::new()), 25, 2);
    let err = analyzer
        .analyze_many(&[addr(1), addr(2), addr(3)])
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidAddress(_)));
    assert!(analyzer.analyze_many(&[]).await.is_err());
}

#[tokio::test]
async fn test_network_mismatch_rejected() {
    let analyzer = RelationshipAnalyzer::new(Arc::new(InMemoryProvider::new()), 25, 10)
        .with_network(Network::Preprod);
    let mainnet = CardanoAddress::enterprise(&[1; 28], Network::Mainnet)
        .unwrap()
        .to_string();

    let err = analyzer.analyze(&mainnet).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidAddress(_)));
    let err = analyzer
        .analyze_many(&[addr(2), mainnet])
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidAddress(_)));

    assert!(analyzer.analyze(&addr(2)).await.is_ok());
}
