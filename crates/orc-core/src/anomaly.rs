use orc_types::{AnomalyType, Severity, Status, TaskNumber, WaveAnomaly};
use parking_lot::Mutex;
use std::time::Duration;

/// Thresholds governing when the anomaly monitor raises a `WaveAnomaly`.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyMonitorConfig {
    /// Consecutive `Red`/`Failed` results within a wave that trigger
    /// [`AnomalyType::ConsecutiveFailures`].
    pub consecutive_failure_threshold: u32,
    /// Cumulative failure rate (failed/total, over the whole wave so
    /// far) that triggers [`AnomalyType::HighErrorRate`].
    pub error_rate_threshold: f64,
    /// A task's `duration / estimated_time` ratio that triggers
    /// [`AnomalyType::DurationOutlier`].
    pub duration_deviation_threshold: f64,
}

impl Default for AnomalyMonitorConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: 3,
            error_rate_threshold: 0.5,
            duration_deviation_threshold: 2.0,
        }
    }
}

struct WaveState {
    wave_name: String,
    total: u32,
    failed: u32,
    consecutive_failures: u32,
}

impl WaveState {
    fn new(wave_name: String) -> Self {
        Self {
            wave_name,
            total: 0,
            failed: 0,
            consecutive_failures: 0,
        }
    }
}

fn consecutive_failure_severity(count: u32) -> Severity {
    if count >= 5 {
        Severity::High
    } else if count >= 4 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn error_rate_severity(rate: f64) -> Severity {
    if rate >= 0.8 {
        Severity::High
    } else if rate >= 0.6 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn duration_outlier_severity(ratio: f64) -> Severity {
    if ratio >= 5.0 {
        Severity::High
    } else if ratio >= 3.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Observes task results as a wave executes and raises anomalies based
/// on consecutive failures, cumulative error rate, and duration-vs-
/// estimate outliers.
///
/// Both a consecutive-failure anomaly and a high-error-rate anomaly can
/// be true of the same result; `record` reports every anomaly that
/// applies rather than picking one, since each reflects a distinct
/// pattern an operator would want to know about. Surfacing an anomaly
/// here does not itself abort the wave — whether to act on it is the
/// orchestrator's call.
pub struct AnomalyMonitor {
    config: AnomalyMonitorConfig,
    state: Mutex<WaveState>,
}

impl AnomalyMonitor {
    /// Create a monitor with the given thresholds, for a wave not yet
    /// named (call [`AnomalyMonitor::start_wave`] before recording).
    #[must_use]
    pub fn new(config: AnomalyMonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WaveState::new(String::new())),
        }
    }

    /// Reset all counters and begin tracking a new wave.
    pub fn start_wave(&self, wave_name: impl Into<String>) {
        self.reset(wave_name);
    }

    /// Reset all counters, keeping the monitor usable for the next
    /// wave named `wave_name`.
    pub fn reset(&self, wave_name: impl Into<String>) {
        *self.state.lock() = WaveState::new(wave_name.into());
    }

    /// Record a task's outcome and return every anomaly it triggers.
    /// `estimated_time` is the task's own estimate, when it declared
    /// one; duration-outlier detection is skipped without it.
    pub fn record(
        &self,
        task_number: &TaskNumber,
        status: Status,
        duration: Duration,
        estimated_time: Option<Duration>,
    ) -> Vec<WaveAnomaly> {
        let mut state = self.state.lock();
        let mut anomalies = Vec::new();

        let is_failure = matches!(status, Status::Red | Status::Failed);
        state.total += 1;

        if is_failure {
            state.failed += 1;
            state.consecutive_failures += 1;

            if state.consecutive_failures >= self.config.consecutive_failure_threshold {
                anomalies.push(WaveAnomaly {
                    anomaly_type: AnomalyType::ConsecutiveFailures,
                    description: format!(
                        "{} consecutive task failures in wave {}",
                        state.consecutive_failures, state.wave_name
                    ),
                    severity: consecutive_failure_severity(state.consecutive_failures),
                    task_number: Some(task_number.clone()),
                    wave_name: state.wave_name.clone(),
                });
            }

            if state.total >= 3 {
                let error_rate = f64::from(state.failed) / f64::from(state.total);
                if error_rate >= self.config.error_rate_threshold {
                    anomalies.push(WaveAnomaly {
                        anomaly_type: AnomalyType::HighErrorRate,
                        description: format!(
                            "error rate {:.0}% over {} tasks in wave {}",
                            error_rate * 100.0,
                            state.total,
                            state.wave_name
                        ),
                        severity: error_rate_severity(error_rate),
                        task_number: Some(task_number.clone()),
                        wave_name: state.wave_name.clone(),
                    });
                }
            }
        } else {
            state.consecutive_failures = 0;
        }

        if let Some(estimated) = estimated_time {
            let estimated_secs = estimated.as_secs_f64();
            let observed_secs = duration.as_secs_f64();
            if estimated_secs > 0.0 && observed_secs > 0.0 {
                let ratio = observed_secs / estimated_secs;
                if ratio >= self.config.duration_deviation_threshold {
                    anomalies.push(WaveAnomaly {
                        anomaly_type: AnomalyType::DurationOutlier,
                        description: format!(
                            "task {task_number} took {observed_secs:.1}s, {ratio:.1}x its {estimated_secs:.1}s estimate"
                        ),
                        severity: duration_outlier_severity(ratio),
                        task_number: Some(task_number.clone()),
                        wave_name: state.wave_name.clone(),
                    });
                }
            }
        }

        anomalies
    }

    /// Re-derive the current wave's standing anomalies (consecutive
    /// failures, error rate) without recording a new result. Returns
    /// `(healthy, anomalies)` where `healthy` is `anomalies.is_empty()`.
    #[must_use]
    pub fn check_health(&self) -> (bool, Vec<WaveAnomaly>) {
        let state = self.state.lock();
        let mut anomalies = Vec::new();

        if state.consecutive_failures >= self.config.consecutive_failure_threshold {
            anomalies.push(WaveAnomaly {
                anomaly_type: AnomalyType::ConsecutiveFailures,
                description: format!(
                    "{} consecutive task failures in wave {}",
                    state.consecutive_failures, state.wave_name
                ),
                severity: consecutive_failure_severity(state.consecutive_failures),
                task_number: None,
                wave_name: state.wave_name.clone(),
            });
        }

        if state.total >= 3 {
            let error_rate = f64::from(state.failed) / f64::from(state.total);
            if error_rate >= self.config.error_rate_threshold {
                anomalies.push(WaveAnomaly {
                    anomaly_type: AnomalyType::HighErrorRate,
                    description: format!(
                        "error rate {:.0}% over {} tasks in wave {}",
                        error_rate * 100.0,
                        state.total,
                        state.wave_name
                    ),
                    severity: error_rate_severity(error_rate),
                    task_number: None,
                    wave_name: state.wave_name.clone(),
                });
            }
        }

        let healthy = anomalies.is_empty();
        (healthy, anomalies)
    }

    /// Current `(total, failed, consecutive)` counters for the wave
    /// being tracked.
    #[must_use]
    pub fn stats(&self) -> (u32, u32, u32) {
        let state = self.state.lock();
        (state.total, state.failed, state.consecutive_failures)
    }
}

impl Default for AnomalyMonitor {
    fn default() -> Self {
        Self::new(AnomalyMonitorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_failures_trigger_at_threshold() {
        let monitor = AnomalyMonitor::new(AnomalyMonitorConfig {
            consecutive_failure_threshold: 2,
            ..Default::default()
        });
        monitor.start_wave("wave-1");

        let first = monitor.record(&TaskNumber::new("1"), Status::Red, Duration::from_secs(1), None);
        assert!(first.iter().all(|a| a.anomaly_type != AnomalyType::ConsecutiveFailures));

        let second = monitor.record(&TaskNumber::new("2"), Status::Red, Duration::from_secs(1), None);
        assert!(second.iter().any(|a| a.anomaly_type == AnomalyType::ConsecutiveFailures));
    }

    #[test]
    fn consecutive_failure_severity_scales_with_count() {
        let monitor = AnomalyMonitor::new(AnomalyMonitorConfig {
            consecutive_failure_threshold: 3,
            ..Default::default()
        });
        monitor.start_wave("wave-1");
        for i in 1..=3 {
            monitor.record(&TaskNumber::new(i.to_string()), Status::Red, Duration::from_secs(1), None);
        }
        let fourth = monitor.record(&TaskNumber::new("4"), Status::Red, Duration::from_secs(1), None);
        let anomaly = fourth
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::ConsecutiveFailures)
            .unwrap();
        assert_eq!(anomaly.severity, Severity::Medium);

        let fifth = monitor.record(&TaskNumber::new("5"), Status::Red, Duration::from_secs(1), None);
        let anomaly = fifth
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::ConsecutiveFailures)
            .unwrap();
        assert_eq!(anomaly.severity, Severity::High);
    }

    #[test]
    fn success_resets_consecutive_counter() {
        let monitor = AnomalyMonitor::new(AnomalyMonitorConfig {
            consecutive_failure_threshold: 2,
            ..Default::default()
        });
        monitor.start_wave("wave-1");
        monitor.record(&TaskNumber::new("1"), Status::Red, Duration::from_secs(1), None);
        monitor.record(&TaskNumber::new("2"), Status::Green, Duration::from_secs(1), None);
        let anomalies = monitor.record(&TaskNumber::new("3"), Status::Red, Duration::from_secs(1), None);
        assert!(anomalies.iter().all(|a| a.anomaly_type != AnomalyType::ConsecutiveFailures));
    }

    #[test]
    fn duration_outlier_is_relative_to_estimate() {
        let monitor = AnomalyMonitor::new(AnomalyMonitorConfig {
            duration_deviation_threshold: 2.0,
            ..Default::default()
        });
        monitor.start_wave("wave-1");
        let anomalies = monitor.record(
            &TaskNumber::new("1"),
            Status::Green,
            Duration::from_secs(30),
            Some(Duration::from_secs(10)),
        );
        let anomaly = anomalies
            .iter()
            .find(|a| a.anomaly_type == AnomalyType::DurationOutlier)
            .unwrap();
        assert_eq!(anomaly.severity, Severity::Medium);
    }

    #[test]
    fn duration_outlier_is_skipped_without_an_estimate() {
        let monitor = AnomalyMonitor::new(AnomalyMonitorConfig::default());
        monitor.start_wave("wave-1");
        let anomalies = monitor.record(&TaskNumber::new("1"), Status::Green, Duration::from_secs(30), None);
        assert!(anomalies.iter().all(|a| a.anomaly_type != AnomalyType::DurationOutlier));
    }

    #[test]
    fn both_consecutive_and_error_rate_anomalies_can_fire_together() {
        let monitor = AnomalyMonitor::new(AnomalyMonitorConfig {
            consecutive_failure_threshold: 2,
            error_rate_threshold: 0.5,
            ..Default::default()
        });
        monitor.start_wave("wave-1");
        monitor.record(&TaskNumber::new("1"), Status::Red, Duration::from_secs(1), None);
        let anomalies = monitor.record(&TaskNumber::new("2"), Status::Red, Duration::from_secs(1), None);
        assert!(anomalies.iter().any(|a| a.anomaly_type == AnomalyType::ConsecutiveFailures));
        assert!(anomalies.iter().any(|a| a.anomaly_type == AnomalyType::HighErrorRate));
    }

    #[test]
    fn check_health_reports_standing_anomalies_without_recording() {
        let monitor = AnomalyMonitor::new(AnomalyMonitorConfig {
            consecutive_failure_threshold: 2,
            ..Default::default()
        });
        monitor.start_wave("wave-1");
        monitor.record(&TaskNumber::new("1"), Status::Red, Duration::from_secs(1), None);
        monitor.record(&TaskNumber::new("2"), Status::Red, Duration::from_secs(1), None);

        let (healthy, anomalies) = monitor.check_health();
        assert!(!healthy);
        assert!(anomalies.iter().any(|a| a.anomaly_type == AnomalyType::ConsecutiveFailures));

        let (healthy_again, _) = monitor.check_health();
        assert_eq!(healthy, healthy_again);
    }

    #[test]
    fn reset_clears_counters_for_the_next_wave() {
        let monitor = AnomalyMonitor::new(AnomalyMonitorConfig::default());
        monitor.start_wave("wave-1");
        monitor.record(&TaskNumber::new("1"), Status::Red, Duration::from_secs(1), None);
        assert_eq!(monitor.stats(), (1, 1, 1));

        monitor.reset("wave-2");
        assert_eq!(monitor.stats(), (0, 0, 0));
    }

    #[test]
    fn stats_report_total_failed_and_consecutive() {
        let monitor = AnomalyMonitor::new(AnomalyMonitorConfig::default());
        monitor.start_wave("wave-1");
        monitor.record(&TaskNumber::new("1"), Status::Green, Duration::from_secs(1), None);
        monitor.record(&TaskNumber::new("2"), Status::Red, Duration::from_secs(1), None);
        monitor.record(&TaskNumber::new("3"), Status::Red, Duration::from_secs(1), None);
        assert_eq!(monitor.stats(), (3, 2, 2));
    }
}
