// src/metrics.rs

//! Per-run timing and memory measurement.
//!
//! Peak memory is sampled with `sysinfo` while the child runs. It is
//! best-effort: samples are taken on an interval, so very short spikes (or
//! very short runs) may report nothing, in which case the value is `None`.

use serde::Serialize;
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Interval between RSS samples.
pub const SAMPLE_EVERY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rss_kb: Option<u64>,
}

/// Samples the RSS of one process until stopped or the process disappears.
pub struct PeakMemory {
    stop: CancellationToken,
    handle: JoinHandle<u64>,
}

impl PeakMemory {
    pub fn watch(pid: u32, every: Duration) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();

        let handle = tokio::spawn(async move {
            let pid = Pid::from_u32(pid);
            let mut system = System::new();
            let mut peak_kb = 0u64;
            let mut ticker = tokio::time::interval(every);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                system.refresh_process(pid);
                match system.process(pid) {
                    // sysinfo 0.30 reports bytes
                    Some(process) => peak_kb = peak_kb.max(process.memory() / 1024),
                    None => break,
                }
            }

            peak_kb
        });

        Self { stop, handle }
    }

    /// Stop sampling and return the peak RSS in KB, if any sample landed.
    pub async fn finish(self) -> Option<u64> {
        self.stop.cancel();
        match self.handle.await {
            Ok(kb) if kb > 0 => Some(kb),
            _ => None,
        }
    }
}
