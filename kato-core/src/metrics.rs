//! Ranking metrics for surviving predictions
//!
//! All functions are pure over a prefetched statistics snapshot, so
//! the computation is deterministic and free of suspension points.
//! Disallowed conditions (zero denominators, absent statistics, the
//! fragmentation sentinel) surface as `Computation` errors with the
//! metric name attached; nothing here substitutes a silent default.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{Event, GlobalStats, Prediction, RankMetric, SymbolStats};

/// Statistics snapshot for one predict call
#[derive(Debug, Clone, Default)]
pub struct StatsView {
    pub globals: GlobalStats,
    /// Stats for every unique symbol appearing in candidate windows
    pub symbols: BTreeMap<String, SymbolStats>,
}

impl StatsView {
    /// `pattern_member_frequency(sym) / total_unique_patterns`
    ///
    /// Both quantities count patterns; symbol occurrence totals never
    /// enter this ratio.
    fn symbol_probability(&self, metric: &'static str, symbol: &str) -> Result<f64> {
        if self.globals.total_unique_patterns == 0 {
            return Err(Error::Computation {
                metric,
                message: "total_unique_patterns is zero".to_string(),
            });
        }
        let stats = self.symbols.get(symbol).ok_or_else(|| Error::Computation {
            metric,
            message: format!("missing statistics for symbol {symbol}"),
        })?;
        Ok(stats.pattern_member_frequency as f64 / self.globals.total_unique_patterns as f64)
    }
}

/// Per-candidate inputs assembled by the prediction pipeline
#[derive(Debug, Clone)]
pub struct MetricInputs<'a> {
    pub matches: &'a [String],
    pub present: &'a [Event],
    pub extras: &'a [String],
    pub similarity: f64,
    pub fragmentation: i64,
    pub frequency: u64,
    /// Frequency sum across the surviving prediction ensemble
    pub ensemble_frequency: u64,
}

/// The full metric block attached to a prediction
#[derive(Debug, Clone, PartialEq)]
pub struct MetricBlock {
    pub evidence: f64,
    pub confidence: f64,
    pub snr: f64,
    pub normalized_entropy: f64,
    pub global_normalized_entropy: f64,
    pub itfdf_similarity: f64,
    pub potential: f64,
    pub confluence: f64,
    pub tfidf_score: f64,
}

fn entropy(probabilities: impl Iterator<Item = f64>, unique_count: usize) -> f64 {
    let raw: f64 = probabilities
        .filter(|p| *p > 0.0)
        .map(|p| p * (1.0 / p).log2())
        .sum();
    if unique_count > 1 {
        raw / (unique_count as f64).log2()
    } else {
        raw
    }
}

/// Compute every metric for one surviving prediction
pub fn compute(inputs: &MetricInputs<'_>, stats: &StatsView) -> Result<MetricBlock> {
    let present_counts: BTreeMap<&str, usize> = {
        let mut counts = BTreeMap::new();
        for symbol in inputs.present.iter().flatten() {
            *counts.entry(symbol.as_str()).or_insert(0) += 1;
        }
        counts
    };
    let present_length: usize = inputs.present.iter().map(Vec::len).sum();
    let unique_count = present_counts.len();
    let match_count = inputs.matches.len();

    if unique_count == 0 || present_length == 0 {
        return Err(Error::Computation {
            metric: "evidence",
            message: "present segment is empty".to_string(),
        });
    }

    let evidence = match_count as f64 / unique_count as f64;
    let confidence = match_count as f64 / present_length as f64;

    let snr_denominator = match_count + inputs.extras.len();
    let snr = if snr_denominator > 0 {
        match_count as f64 / snr_denominator as f64
    } else {
        0.0
    };

    let normalized_entropy = entropy(
        present_counts
            .values()
            .map(|&count| count as f64 / present_length as f64),
        unique_count,
    );

    let global_probabilities: Vec<f64> = present_counts
        .keys()
        .map(|symbol| stats.symbol_probability("global_normalized_entropy", symbol))
        .collect::<Result<_>>()?;
    let global_normalized_entropy =
        entropy(global_probabilities.iter().copied(), unique_count);

    if inputs.ensemble_frequency == 0 {
        return Err(Error::Computation {
            metric: "itfdf_similarity",
            message: "total ensemble pattern frequency is zero".to_string(),
        });
    }
    let frequency_share = inputs.frequency as f64 / inputs.ensemble_frequency as f64;
    let distance = 1.0 - inputs.similarity;
    let itfdf_similarity = 1.0 - distance * frequency_share;

    if inputs.fragmentation < 0 {
        return Err(Error::Computation {
            metric: "potential",
            message: format!("fragmentation sentinel {}", inputs.fragmentation),
        });
    }
    let potential = (evidence + confidence) * snr
        + itfdf_similarity
        + 1.0 / (inputs.fragmentation as f64 + 1.0);

    let mut window_probability = 1.0;
    for symbol in present_counts.keys() {
        window_probability *= stats.symbol_probability("confluence", symbol)?;
    }
    let confluence = frequency_share * (1.0 - window_probability);

    let mut unique_matches: Vec<&str> = inputs.matches.iter().map(String::as_str).collect();
    unique_matches.dedup();
    let mut tfidf_sum = 0.0;
    for symbol in &unique_matches {
        let stats_entry = stats.symbols.get(*symbol).ok_or_else(|| Error::Computation {
            metric: "tfidf_score",
            message: format!("missing statistics for symbol {symbol}"),
        })?;
        if stats_entry.pattern_member_frequency == 0 {
            return Err(Error::Computation {
                metric: "tfidf_score",
                message: format!("pattern_member_frequency is zero for symbol {symbol}"),
            });
        }
        if stats.globals.total_unique_patterns == 0 {
            return Err(Error::Computation {
                metric: "tfidf_score",
                message: "total_unique_patterns is zero".to_string(),
            });
        }
        let tf = present_counts.get(*symbol).copied().unwrap_or(0) as f64
            / present_length as f64;
        let idf = (stats.globals.total_unique_patterns as f64
            / stats_entry.pattern_member_frequency as f64)
            .log2();
        tfidf_sum += tf * idf + 1.0;
    }
    let tfidf_score = tfidf_sum / unique_matches.len() as f64;

    Ok(MetricBlock {
        evidence,
        confidence,
        snr,
        normalized_entropy,
        global_normalized_entropy,
        itfdf_similarity,
        potential,
        confluence,
        tfidf_score,
    })
}

/// Value used to rank a prediction under the configured metric
pub fn rank_value(prediction: &Prediction, metric: RankMetric) -> f64 {
    match metric {
        RankMetric::Potential => prediction.potential,
        RankMetric::Confidence => prediction.confidence,
        RankMetric::Evidence => prediction.evidence,
        RankMetric::ItfdfSimilarity => prediction.itfdf_similarity,
        RankMetric::TfidfScore => prediction.tfidf_score,
    }
}
