//! Retail shelf metric scores
//!
//! The metric processor reports on-shelf-availability (OSA), share-of-shelf
//! (SOS) and planogram-compliance (PGC). The canonical scale everywhere in
//! this system is 0-100; values from the processor are clamped on entry and
//! stored on shelves as fixed-point two-decimal strings.

use serde::{Deserialize, Serialize};

/// Raw scores as reported by the metric processor, clamped to [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricScores {
    pub osa: f64,
    pub sos: f64,
    pub pgc: f64,
}

impl MetricScores {
    pub fn new(osa: f64, sos: f64, pgc: f64) -> Self {
        Self {
            osa: clamp_score(osa),
            sos: clamp_score(sos),
            pgc: clamp_score(pgc),
        }
    }

    /// Render to the fixed-point form stored on a shelf
    pub fn summary(&self) -> MetricSummary {
        MetricSummary {
            osa: format!("{:.2}", self.osa),
            sos: format!("{:.2}", self.sos),
            pgc: format!("{:.2}", self.pgc),
        }
    }
}

fn clamp_score(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Shelf-level metric summary, two-decimal fixed point on the 0-100 scale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSummary {
    #[serde(rename = "OSA")]
    pub osa: String,
    #[serde(rename = "SOS")]
    pub sos: String,
    #[serde(rename = "PGC")]
    pub pgc: String,
}

impl MetricSummary {
    /// Placeholder summary for a shelf with no processed metrics yet
    pub fn zero() -> Self {
        MetricScores::new(0.0, 0.0, 0.0).summary()
    }
}
