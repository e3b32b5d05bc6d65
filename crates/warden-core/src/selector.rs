//! Model Selector: aggregates model reports into a per-category
//! recommendation.
//!
//! The selection rules are fixed:
//! 1. Per category, average quality and latency over each model's scored cases
//! 2. `combined = 0.7 × quality + 0.3 × 1 / max(latency, 0.1)`
//! 3. Strictly highest combined score wins; ties keep the model whose id sorts first
//!
//! Selection is a pure function of the reports, so concurrent benchmarking
//! cannot change the outcome.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::report::ModelReport;

pub const QUALITY_WEIGHT: f64 = 0.7;
pub const LATENCY_WEIGHT: f64 = 0.3;

/// Latencies below this are treated as this, so speed cannot dominate.
pub const LATENCY_FLOOR_SECS: f64 = 0.1;

/// Combined quality/latency score.
pub fn combined_score(avg_quality: f64, avg_latency_secs: f64) -> f64 {
    QUALITY_WEIGHT * avg_quality + LATENCY_WEIGHT * (1.0 / avg_latency_secs.max(LATENCY_FLOOR_SECS))
}

/// One model's standing in a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub model_id: String,
    pub cases: usize,
    pub avg_quality: f64,
    pub avg_latency_secs: f64,
    pub combined_score: f64,
}

/// Selected model per category plus the standings it was chosen from.
///
/// A category no model produced a scored case for is simply absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub selections: BTreeMap<String, String>,
    pub standings: BTreeMap<String, Vec<Standing>>,
}

impl Recommendation {
    pub fn model_for(&self, category: &str) -> Option<&str> {
        self.selections.get(category).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

/// Picks a model per category.
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    /// A winner must score strictly above this.
    min_combined_score: f64,
}

impl ModelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_combined_score(mut self, min: f64) -> Self {
        self.min_combined_score = min;
        self
    }

    /// Select a model per category.
    ///
    /// `reports` is keyed by model id; `BTreeMap` iteration order is the
    /// deterministic tie-break order.
    pub fn select(&self, reports: &BTreeMap<String, ModelReport>) -> Recommendation {
        let mut standings: BTreeMap<String, Vec<Standing>> = BTreeMap::new();

        for (model_id, report) in reports {
            for (category, standing) in category_standings(model_id, report) {
                standings.entry(category).or_default().push(standing);
            }
        }

        let mut selections = BTreeMap::new();
        for (category, ranked) in &standings {
            let mut best: Option<&Standing> = None;
            for standing in ranked {
                if standing.combined_score <= self.min_combined_score {
                    continue;
                }
                if best.map_or(true, |b| standing.combined_score > b.combined_score) {
                    best = Some(standing);
                }
            }

            match best {
                Some(winner) => {
                    tracing::info!(
                        category = %category,
                        model = %winner.model_id,
                        combined_score = winner.combined_score,
                        "Selected model"
                    );
                    selections.insert(category.clone(), winner.model_id.clone());
                }
                None => tracing::warn!(category = %category, "No model cleared the selection threshold"),
            }
        }

        Recommendation {
            selections,
            standings,
        }
    }
}

/// Per-category averages for one model, over scored cases only.
fn category_standings(model_id: &str, report: &ModelReport) -> BTreeMap<String, Standing> {
    let mut sums: BTreeMap<&str, (usize, f64, f64)> = BTreeMap::new();
    for result in &report.results {
        if let Some((quality, latency)) = result.measurement() {
            let entry = sums.entry(result.category.as_str()).or_insert((0, 0.0, 0.0));
            entry.0 += 1;
            entry.1 += quality;
            entry.2 += latency;
        }
    }

    sums.into_iter()
        .map(|(category, (cases, quality_sum, latency_sum))| {
            let avg_quality = quality_sum / cases as f64;
            let avg_latency_secs = latency_sum / cases as f64;
            (
                category.to_string(),
                Standing {
                    model_id: model_id.to_string(),
                    cases,
                    avg_quality,
                    avg_latency_secs,
                    combined_score: combined_score(avg_quality, avg_latency_secs),
                },
            )
        })
        .collect()
}
