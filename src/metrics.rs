//! Running per-run statistics.
//!
//! `RunningMetrics` keeps three parallel series, one entry per processed
//! frame. The series are private and only grow together through `record`, so
//! their lengths are equal after every completed frame.

use serde::Serialize;

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunningMetrics {
    people_counts: Vec<usize>,
    anomaly_counts: Vec<usize>,
    processing_times_ms: Vec<f64>,
}

/// Aggregate view of a run, as shown in the results summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub frames_analyzed: usize,
    pub total_people: usize,
    pub peak_people: usize,
    pub frames_with_anomalies: usize,
    pub total_anomalies: usize,
    pub mean_processing_ms: f64,
}

/// Serialized form for presentation/export: the series plus their summary.
#[derive(Serialize)]
pub struct MetricsReport<'a> {
    pub summary: MetricsSummary,
    #[serde(flatten)]
    pub series: &'a RunningMetrics,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one processed frame. Processing time is stored rounded to two
    /// decimals.
    pub fn record(&mut self, people: usize, anomalies: usize, processing_ms: f64) {
        self.people_counts.push(people);
        self.anomaly_counts.push(anomalies);
        self.processing_times_ms
            .push((processing_ms * 100.0).round() / 100.0);
    }

    pub fn len(&self) -> usize {
        self.people_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.people_counts.is_empty()
    }

    pub fn people_counts(&self) -> &[usize] {
        &self.people_counts
    }

    pub fn anomaly_counts(&self) -> &[usize] {
        &self.anomaly_counts
    }

    pub fn processing_times_ms(&self) -> &[f64] {
        &self.processing_times_ms
    }

    pub fn clear(&mut self) {
        self.people_counts.clear();
        self.anomaly_counts.clear();
        self.processing_times_ms.clear();
    }

    pub fn summary(&self) -> MetricsSummary {
        if self.is_empty() {
            return MetricsSummary::default();
        }
        let total_time: f64 = self.processing_times_ms.iter().sum();
        MetricsSummary {
            frames_analyzed: self.len(),
            total_people: self.people_counts.iter().sum(),
            peak_people: self.people_counts.iter().copied().max().unwrap_or(0),
            frames_with_anomalies: self.anomaly_counts.iter().filter(|&&n| n > 0).count(),
            total_anomalies: self.anomaly_counts.iter().sum(),
            mean_processing_ms: total_time / self.len() as f64,
        }
    }

    pub fn report(&self) -> MetricsReport<'_> {
        MetricsReport {
            summary: self.summary(),
            series: self,
        }
    }
}
