//! Scan results handed to display and export layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::error::AppResult;
use crate::hardware::capabilities::SampleResult;

/// Published after every completed sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepUpdate {
    /// Run this sweep belongs to
    pub run_id: Uuid,
    /// Index of the sweep that just finished
    pub sweep_index: u32,
    /// Axis positions visited, in traversal order
    pub positions: Vec<f64>,
    /// Count rate at each position (counts/s)
    pub count_rates: Vec<f64>,
}

/// Snapshot of everything a scan has accumulated so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResults {
    /// Unique id of the controller run
    pub run_id: Uuid,
    /// Name of the scanned axis
    pub axis: String,
    /// When the controller was first started
    pub started_at: Option<DateTime<Utc>>,
    /// When this snapshot was taken
    pub captured_at: DateTime<Utc>,
    /// Lower scan bound
    pub min_position: f64,
    /// Upper scan bound (exclusive)
    pub max_position: f64,
    /// Step between sampled positions
    pub step_size: f64,
    /// Value of the sweep counter at capture time
    pub sweeps_completed: u32,
    /// Positions per accumulated sweep
    pub positions_by_sweep: Vec<Vec<f64>>,
    /// Raw samples per accumulated sweep
    pub raw_counts_by_sweep: Vec<Vec<SampleResult>>,
    /// Count rates per accumulated sweep
    pub count_rate_by_sweep: Vec<Vec<f64>>,
}

impl ScanResults {
    /// Point-wise mean count rate over all accumulated sweeps.
    ///
    /// Sweeps of different length (range changed mid-run) are averaged over
    /// the sweeps that reach each index.
    pub fn mean_count_rate(&self) -> Vec<f64> {
        let longest = self
            .count_rate_by_sweep
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0);

        (0..longest)
            .map(|i| {
                let (sum, n) = self
                    .count_rate_by_sweep
                    .iter()
                    .filter_map(|sweep| sweep.get(i))
                    .fold((0.0, 0u32), |(sum, n), rate| (sum + rate, n + 1));
                sum / f64::from(n)
            })
            .collect()
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the snapshot as JSON, creating parent directories as needed
    pub fn write_json(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        tracing::info!(path = %path.display(), sweeps = self.sweeps_completed, "Scan results written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results_with(rates: Vec<Vec<f64>>) -> ScanResults {
        ScanResults {
            run_id: Uuid::new_v4(),
            axis: "tuning_voltage".into(),
            started_at: None,
            captured_at: Utc::now(),
            min_position: 0.0,
            max_position: 1.0,
            step_size: 0.5,
            sweeps_completed: rates.len() as u32,
            positions_by_sweep: vec![],
            raw_counts_by_sweep: vec![],
            count_rate_by_sweep: rates,
        }
    }

    #[test]
    fn test_mean_count_rate() {
        let results = results_with(vec![vec![1.0, 2.0, 3.0], vec![3.0, 4.0]]);
        assert_eq!(results.mean_count_rate(), vec![2.0, 3.0, 3.0]);
        assert!(results_with(vec![]).mean_count_rate().is_empty());
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("scan.json");
        let results = results_with(vec![vec![10.0, 20.0]]);

        results.write_json(&path).unwrap();

        let loaded: ScanResults =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.count_rate_by_sweep, vec![vec![10.0, 20.0]]);
        assert_eq!(loaded.run_id, results.run_id);
    }
}
