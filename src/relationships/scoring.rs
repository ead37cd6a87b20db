//! Additive risk score over a relationship graph

use super::graph::{ClusterTier, RelationshipGraph, RiskLevel};
use serde::Serialize;

pub const MAX_SCORE: u8 = 100;

/// Score at or above which an address is rated high risk.
pub const HIGH_RISK_THRESHOLD: u8 = 60;
/// Score at or above which an address is rated medium risk.
pub const MEDIUM_RISK_THRESHOLD: u8 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
    /// Human-readable reasons, one per rule that fired.
    pub factors: Vec<String>,
}

/// Scores a graph:
///
/// | rule | points |
/// |------|--------|
/// | more than 30 connections | 20 |
/// | more than 15 connections | 10 |
/// | 5 or more high-frequency connections | 30 |
/// | 2 to 4 high-frequency connections | 15 |
/// | fewer than 5 transactions | 10 |
///
/// The connection rules and the high-frequency rules are each exclusive.
/// The total is capped at [`MAX_SCORE`].
pub fn assess(graph: &RelationshipGraph) -> RiskAssessment {
    let mut score: u32 = 0;
    let mut factors = Vec::new();

    let connections = graph.connections.len();
    if connections > 30 {
        score += 20;
        factors.push(format!("{} distinct counterparties", connections));
    } else if connections > 15 {
        score += 10;
        factors.push(format!("{} distinct counterparties", connections));
    }

    let high_frequency = graph
        .connections
        .iter()
        .filter(|c| ClusterTier::for_strength(c.strength) == ClusterTier::HighFrequency)
        .count();
    if high_frequency >= 5 {
        score += 30;
        factors.push(format!("{} high-frequency counterparties", high_frequency));
    } else if high_frequency >= 2 {
        score += 15;
        factors.push(format!("{} high-frequency counterparties", high_frequency));
    }

    if graph.transaction_count < 5 {
        score += 10;
        factors.push(format!("only {} transactions", graph.transaction_count));
    }

    let score = score.min(MAX_SCORE as u32) as u8;
    RiskAssessment {
        score,
        level: level_for(score),
        factors,
    }
}

pub fn level_for(score: u8) -> RiskLevel {
    if score >= HIGH_RISK_THRESHOLD {
        RiskLevel::High
    } else if score >= MEDIUM_RISK_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationships::graph::{Connection, ConnectionType};

    fn graph(strengths: &[u32], transaction_count: usize) -> RelationshipGraph {
        RelationshipGraph {
            address: "addr_test1me".to_string(),
            transaction_count,
            connections: strengths
                .iter()
                .enumerate()
                .map(|(i, s)| Connection {
                    target: format!("addr_test1peer{}", i),
                    strength: *s,
                    first_seen: 0,
                    last_seen: 0,
                    connection_type: ConnectionType::Outgoing,
                })
                .collect(),
        }
    }

    #[test]
    fn test_quiet_address_scores_low() {
        let risk = assess(&graph(&[1, 1], 10));
        assert_eq!(risk.score, 0);
        assert_eq!(risk.level, RiskLevel::Low);
        assert!(risk.factors.is_empty());
    }

    #[test]
    fn test_few_transactions_bonus() {
        let risk = assess(&graph(&[1], 4));
        assert_eq!(risk.score, 10);
    }

    #[test]
    fn test_connection_tiers() {
        assert_eq!(assess(&graph(&[1; 16], 20)).score, 10);
        assert_eq!(assess(&graph(&[1; 15], 20)).score, 0);
        assert_eq!(assess(&graph(&[1; 31], 40)).score, 20);
    }

    #[test]
    fn test_high_frequency_tiers() {
        assert_eq!(assess(&graph(&[3], 20)).score, 0);
        assert_eq!(assess(&graph(&[3, 4], 20)).score, 15);
        assert_eq!(assess(&graph(&[3, 3, 3, 3], 20)).score, 15);
        assert_eq!(assess(&graph(&[3, 3, 3, 3, 9], 20)).score, 30);
    }

    #[test]
    fn test_everything_fires() {
        let mut strengths = vec![5; 6];
        strengths.extend(vec![1; 30]);
        let risk = assess(&graph(&strengths, 3));
        assert_eq!(risk.score, 60);
        assert_eq!(risk.level, RiskLevel::High);
        assert_eq!(risk.factors.len(), 3);
    }

    #[test]
    fn test_levels() {
        assert_eq!(level_for(29), RiskLevel::Low);
        assert_eq!(level_for(30), RiskLevel::Medium);
        assert_eq!(level_for(59), RiskLevel::Medium);
        assert_eq!(level_for(100), RiskLevel::High);
    }
}
