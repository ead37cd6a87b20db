//! Single-hop relationship graph and strength-tier clusters

use crate::provider::{TxParties, TxRef};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Direction of value flow between the analyzed address and a counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Counterparty funded the analyzed address.
    Incoming,
    /// Analyzed address paid the counterparty.
    Outgoing,
    Bidirectional,
}

impl ConnectionType {
    fn merge(self, other: ConnectionType) -> ConnectionType {
        if self == other {
            self
        } else {
            ConnectionType::Bidirectional
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    /// Counterparty address.
    pub target: String,
    /// Number of transactions shared with the counterparty.
    pub strength: u32,
    pub first_seen: i64,
    pub last_seen: i64,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipGraph {
    pub address: String,
    pub transaction_count: usize,
    /// Strongest first, ties broken by target.
    pub connections: Vec<Connection>,
}

impl RelationshipGraph {
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.connections.iter().map(|c| c.target.as_str())
    }

    /// Mean `last_seen` over all connections.
    pub fn average_last_seen(&self) -> Option<f64> {
        if self.connections.is_empty() {
            return None;
        }
        let sum: f64 = self.connections.iter().map(|c| c.last_seen as f64).sum();
        Some(sum / self.connections.len() as f64)
    }
}

/// Builds the graph of `address` from its transactions and their parties.
pub fn build_graph(address: &str, transactions: &[(TxRef, TxParties)]) -> RelationshipGraph {
    let mut connections: BTreeMap<String, Connection> = BTreeMap::new();

    for (tx, parties) in transactions {
        let mut seen_in_tx: HashSet<&str> = HashSet::new();
        let is_sender = parties.inputs.iter().any(|a| a == address);
        let is_receiver = parties.outputs.iter().any(|a| a == address);

        let mut sides: Vec<(&String, ConnectionType)> = Vec::new();
        if is_sender {
            sides.extend(parties.outputs.iter().map(|a| (a, ConnectionType::Outgoing)));
        }
        if is_receiver {
            sides.extend(parties.inputs.iter().map(|a| (a, ConnectionType::Incoming)));
        }

        for (counterparty, direction) in sides {
            if counterparty == address {
                continue;
            }
            let first_in_tx = seen_in_tx.insert(counterparty.as_str());
            let entry = connections
                .entry(counterparty.clone())
                .or_insert_with(|| Connection {
                    target: counterparty.clone(),
                    strength: 0,
                    first_seen: tx.block_time,
                    last_seen: tx.block_time,
                    connection_type: direction,
                });
            entry.connection_type = entry.connection_type.merge(direction);
            if first_in_tx {
                entry.strength += 1;
                entry.first_seen = entry.first_seen.min(tx.block_time);
                entry.last_seen = entry.last_seen.max(tx.block_time);
            }
        }
    }

    let mut connections: Vec<Connection> = connections.into_values().collect();
    connections.sort_by(|a, b| b.strength.cmp(&a.strength).then_with(|| a.target.cmp(&b.target)));

    RelationshipGraph {
        address: address.to_string(),
        transaction_count: transactions.len(),
        connections,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterTier {
    /// Strength 1
    Single,
    /// Strength 2
    Repeated,
    /// Strength 3 and above
    HighFrequency,
}

impl ClusterTier {
    pub fn for_strength(strength: u32) -> ClusterTier {
        match strength {
            0 | 1 => ClusterTier::Single,
            2 => ClusterTier::Repeated,
            _ => ClusterTier::HighFrequency,
        }
    }

    pub fn risk(self) -> RiskLevel {
        match self {
            ClusterTier::Single => RiskLevel::Low,
            ClusterTier::Repeated => RiskLevel::Medium,
            ClusterTier::HighFrequency => RiskLevel::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub tier: ClusterTier,
    pub risk: RiskLevel,
    pub size: usize,
    pub members: Vec<String>,
}

/// Buckets connections by strength tier, highest tier first. Empty tiers are omitted.
pub fn cluster_connections(connections: &[Connection]) -> Vec<Cluster> {
    [ClusterTier::HighFrequency, ClusterTier::Repeated, ClusterTier::Single]
        .into_iter()
        .filter_map(|tier| {
            let members: Vec<String> = connections
                .iter()
                .filter(|c| ClusterTier::for_strength(c.strength) == tier)
                .map(|c| c.target.clone())
                .collect();
            if members.is_empty() {
                return None;
            }
            Some(Cluster {
                tier,
                risk: tier.risk(),
                size: members.len(),
                members,
            })
        })
        .collect()
}
