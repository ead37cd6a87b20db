//! Relationship intelligence
//!
//! Builds a single-hop graph of counterparties for an address from its
//! recent transactions, buckets the connections into strength tiers,
//! scores the address, and across several addresses looks for shared
//! counterparties (beneficial-owner candidates) and synchronized activity.
//! Everything is recomputed per request.

pub mod graph;
pub mod ownership;
pub mod scoring;

pub use graph::{
    build_graph, cluster_connections, Cluster, ClusterTier, Connection, ConnectionType,
    RelationshipGraph, RiskLevel,
};
pub use ownership::{
    beneficial_owner_candidates, timing_correlations, BeneficialOwnerCandidate,
    OwnershipStrength, TimingGroup,
};
pub use scoring::{assess, RiskAssessment};

use crate::address::{CardanoAddress, Network};
use crate::error::{GatewayError, Result};
use crate::provider::{ChainProvider, TxParties, TxRef};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct AddressAnalysis {
    pub address: String,
    pub transaction_count: usize,
    pub connections: Vec<Connection>,
    pub clusters: Vec<Cluster>,
    pub risk: RiskAssessment,
    pub analyzed_at: String,
}

impl AddressAnalysis {
    pub fn from_graph(graph: RelationshipGraph) -> Self {
        let clusters = cluster_connections(&graph.connections);
        let risk = assess(&graph);
        AddressAnalysis {
            address: graph.address,
            transaction_count: graph.transaction_count,
            connections: graph.connections,
            clusters,
            risk,
            analyzed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn graph(&self) -> RelationshipGraph {
        RelationshipGraph {
            address: self.address.clone(),
            transaction_count: self.transaction_count,
            connections: self.connections.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisFailure {
    pub address: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnershipReport {
    pub analyzed: Vec<AddressAnalysis>,
    pub beneficial_owners: Vec<BeneficialOwnerCandidate>,
    pub timing_correlations: Vec<TimingGroup>,
    pub failures: Vec<AnalysisFailure>,
}

#[derive(Clone)]
pub struct RelationshipAnalyzer {
    provider: Arc<dyn ChainProvider>,
    max_transactions: usize,
    max_addresses: usize,
    network: Option<Network>,
}

impl RelationshipAnalyzer {
    pub fn new(provider: Arc<dyn ChainProvider>, max_transactions: usize, max_addresses: usize) -> Self {
        Self {
            provider,
            max_transactions: max_transactions.max(1),
            max_addresses: max_addresses.max(1),
            network: None,
        }
    }

    /// Rejects addresses from any other network before querying the indexer.
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    fn parse_address(&self, raw: &str) -> Result<CardanoAddress> {
        let address = CardanoAddress::parse(raw)?;
        if let Some(network) = self.network {
            address.ensure_network(network)?;
        }
        Ok(address)
    }

    /// Analyzes one address.
    pub async fn analyze(&self, address: &str) -> Result<AddressAnalysis> {
        let address = self.parse_address(address)?;
        let graph = self.fetch_graph(address.as_bech32()).await?;
        let analysis = AddressAnalysis::from_graph(graph);
        info!(
            address = %analysis.address,
            transactions = analysis.transaction_count,
            connections = analysis.connections.len(),
            risk_score = analysis.risk.score,
            "relationships.analyzed"
        );
        Ok(analysis)
    }

    /// Analyzes several addresses concurrently and correlates them.
    ///
    /// Addresses that fail to load are reported in `failures`; the call only
    /// fails outright when none could be analyzed.
    pub async fn analyze_many(&self, addresses: &[String]) -> Result<OwnershipReport> {
        let mut unique: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for raw in addresses {
            let parsed = self.parse_address(raw)?;
            if seen.insert(parsed.as_bech32().to_string()) {
                unique.push(parsed.as_bech32().to_string());
            }
        }
        if unique.is_empty() {
            return Err(GatewayError::InvalidAddress(
                "At least one address is required".to_string(),
            ));
        }
        if unique.len() > self.max_addresses {
            return Err(GatewayError::InvalidAddress(format!(
                "At most {} addresses may be analyzed at once",
                self.max_addresses
            )));
        }

        let mut tasks = JoinSet::new();
        for (position, address) in unique.iter().cloned().enumerate() {
            let analyzer = self.clone();
            tasks.spawn(async move {
                let result = analyzer.fetch_graph(&address).await;
                (position, address, result)
            });
        }

        let mut graphs: Vec<(usize, RelationshipGraph)> = Vec::new();
        let mut failures = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let (position, address, result) = joined
                .map_err(|e| GatewayError::ProviderError(format!("Analysis task failed: {}", e)))?;
            match result {
                Ok(graph) => graphs.push((position, graph)),
                Err(e) => {
                    warn!(%address, error = %e, "relationships.analysis_failed");
                    failures.push(AnalysisFailure {
                        address,
                        error: e.to_string(),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        if graphs.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        graphs.sort_by_key(|(position, _)| *position);
        let analyzed: Vec<AddressAnalysis> = graphs
            .into_iter()
            .map(|(_, graph)| AddressAnalysis::from_graph(graph))
            .collect();
        let graphs: Vec<RelationshipGraph> = analyzed.iter().map(AddressAnalysis::graph).collect();
        let beneficial_owners = beneficial_owner_candidates(&graphs);
        let timing = timing_correlations(&graphs);

        info!(
            analyzed = analyzed.len(),
            failed = failures.len(),
            candidates = beneficial_owners.len(),
            timing_groups = timing.len(),
            "relationships.correlated"
        );

        failures.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(OwnershipReport {
            analyzed,
            beneficial_owners,
            timing_correlations: timing,
            failures,
        })
    }

    async fn fetch_graph(&self, address: &str) -> Result<RelationshipGraph> {
        let txs = self
            .provider
            .address_transactions(address, self.max_transactions)
            .await?;

        let mut tasks = JoinSet::new();
        for (position, tx) in txs.into_iter().enumerate() {
            let provider = Arc::clone(&self.provider);
            tasks.spawn(async move {
                let parties = provider.transaction_parties(&tx.tx_hash).await;
                (position, tx, parties)
            });
        }

        let mut detailed: Vec<(usize, TxRef, TxParties)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (position, tx, parties) = joined
                .map_err(|e| GatewayError::ProviderError(format!("Lookup task failed: {}", e)))?;
            detailed.push((position, tx, parties?));
        }
        detailed.sort_by_key(|(position, _, _)| *position);

        let transactions: Vec<(TxRef, TxParties)> = detailed
            .into_iter()
            .map(|(_, tx, parties)| (tx, parties))
            .collect();
        Ok(build_graph(address, &transactions))
    }
}
