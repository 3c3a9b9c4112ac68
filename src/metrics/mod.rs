mod types;

pub use types::{CaptureMetrics, CaptureResult, MetricsSnapshot, SystemMetrics};

use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_CAPTURES: usize = 20;

/// Capture and dispatch statistics. Skips, timeouts and failures are absorbed
/// by the pipeline; this is where they remain visible.
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

#[derive(Default)]
struct Counters {
    captures: u64,
    completed: u64,
    skips: u64,
    busy: u64,
    timeouts: u64,
    failures: u64,
    discarded: u64,
}

struct MetricsState {
    recent_captures: Vec<CaptureMetrics>,
    counters: Counters,
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes; take the baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_captures: Vec::with_capacity(MAX_RECENT_CAPTURES),
                counters: Counters::default(),
                system,
                pid,
            })),
        }
    }

    /// Process CPU percent and resident memory in MB.
    pub async fn sample_system_metrics(&self) -> (f32, f64) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        if let Some(process) = state.system.process(pid) {
            (
                process.cpu_usage(),
                process.memory() as f64 / 1024.0 / 1024.0,
            )
        } else {
            (0.0, 0.0)
        }
    }

    pub async fn record_capture(&self, metrics: CaptureMetrics) {
        let mut state = self.inner.lock().await;

        let counters = &mut state.counters;
        match metrics.result {
            CaptureResult::Skipped(_) => counters.skips += 1,
            result => {
                counters.captures += 1;
                match result {
                    CaptureResult::Completed => counters.completed += 1,
                    CaptureResult::Busy => counters.busy += 1,
                    CaptureResult::TimedOut => counters.timeouts += 1,
                    CaptureResult::Failed => counters.failures += 1,
                    CaptureResult::Discarded => counters.discarded += 1,
                    CaptureResult::Skipped(_) => {}
                }
            }
        }

        state.recent_captures.push(metrics);
        if state.recent_captures.len() > MAX_RECENT_CAPTURES {
            state.recent_captures.remove(0);
        }
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let system = state
            .system
            .process(pid)
            .map(|process| SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            })
            .unwrap_or_default();

        let counters = &state.counters;
        MetricsSnapshot {
            system,
            recent_captures: state.recent_captures.clone(),
            capture_count: counters.captures,
            completed_count: counters.completed,
            skip_count: counters.skips,
            busy_count: counters.busy,
            timeout_count: counters.timeouts,
            failure_count: counters.failures,
            discarded_count: counters.discarded,
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.recent_captures.clear();
        state.counters = Counters::default();
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
