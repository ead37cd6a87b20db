//! Cross-address heuristics: shared counterparties and timing correlation

use super::graph::RelationshipGraph;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Width of a timing-correlation window in seconds.
pub const TIMING_WINDOW_SECS: i64 = 3600;

/// Likelihood (percent) at which a candidate is rated strong.
pub const STRONG_LIKELIHOOD: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipStrength {
    Strong,
    Moderate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeneficialOwnerCandidate {
    pub address: String,
    /// Number of analyzed addresses that transacted with this one.
    pub appearances: usize,
    /// Share of analyzed addresses, in percent.
    pub likelihood: f64,
    pub strength: OwnershipStrength,
    pub linked_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingGroup {
    /// Unix seconds at the start of the window.
    pub window_start: i64,
    pub addresses: Vec<String>,
    /// 0 to 100, higher when the addresses' activity is tightly packed.
    pub confidence: f64,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Counterparties shared by at least two of the analyzed graphs.
pub fn beneficial_owner_candidates(graphs: &[RelationshipGraph]) -> Vec<BeneficialOwnerCandidate> {
    if graphs.is_empty() {
        return Vec::new();
    }

    let mut linked: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for graph in graphs {
        for target in graph.targets() {
            linked.entry(target).or_default().insert(graph.address.as_str());
        }
    }

    let analyzed = graphs.len() as f64;
    let mut candidates: Vec<BeneficialOwnerCandidate> = linked
        .into_iter()
        .filter(|(_, sources)| sources.len() >= 2)
        .map(|(address, sources)| {
            let likelihood = round1(sources.len() as f64 / analyzed * 100.0);
            BeneficialOwnerCandidate {
                address: address.to_string(),
                appearances: sources.len(),
                likelihood,
                strength: if likelihood >= STRONG_LIKELIHOOD {
                    OwnershipStrength::Strong
                } else {
                    OwnershipStrength::Moderate
                },
                linked_addresses: sources.into_iter().map(str::to_string).collect(),
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.likelihood
            .total_cmp(&a.likelihood)
            .then_with(|| a.address.cmp(&b.address))
    });
    candidates
}

/// Groups addresses whose average last activity falls in the same hour window.
pub fn timing_correlations(graphs: &[RelationshipGraph]) -> Vec<TimingGroup> {
    let mut buckets: BTreeMap<i64, Vec<(&str, f64)>> = BTreeMap::new();
    for graph in graphs {
        if let Some(average) = graph.average_last_seen() {
            let bucket = (average as i64).div_euclid(TIMING_WINDOW_SECS);
            buckets
                .entry(bucket)
                .or_default()
                .push((graph.address.as_str(), average));
        }
    }

    let mut groups: Vec<TimingGroup> = buckets
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|(bucket, members)| {
            let n = members.len() as f64;
            let mean = members.iter().map(|(_, t)| t).sum::<f64>() / n;
            let variance = members.iter().map(|(_, t)| (t - mean).powi(2)).sum::<f64>() / n;
            let stddev = variance.sqrt();
            let confidence = (1.0 - stddev / TIMING_WINDOW_SECS as f64).max(0.0) * 100.0;
            TimingGroup {
                window_start: bucket * TIMING_WINDOW_SECS,
                addresses: members.iter().map(|(a, _)| a.to_string()).collect(),
                confidence: round1(confidence),
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.window_start.cmp(&b.window_start))
    });
    groups
}
