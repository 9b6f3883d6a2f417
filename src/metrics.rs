//! Process and session metrics, reused by the `/metrics` endpoint and the
//! registry heartbeat.

use serde::Serialize;
use tokio::time::Instant;

use crate::session::{SessionSnapshot, SessionStatistics};

/// Aggregate worker metrics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMetrics {
    /// One-minute load average; absent on unsupported platforms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_load: Option<f64>,
    /// Resident-set share of total memory; absent on unsupported platforms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used_percent: Option<f64>,
    pub uptime_seconds: u64,
    pub total_sessions: usize,
    pub active_sessions: usize,
}

/// Per-session row of the `/metrics` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetricsEntry {
    pub session_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
    pub is_recovered: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub worker: WorkerMetrics,
    pub statistics: SessionStatistics,
    pub sessions: Vec<SessionMetricsEntry>,
}

pub fn worker_metrics(started_at: Instant, stats: &SessionStatistics) -> WorkerMetrics {
    WorkerMetrics {
        cpu_load: read_cpu_load(),
        memory_used_percent: read_memory_used_percent(),
        uptime_seconds: started_at.elapsed().as_secs(),
        total_sessions: stats.total,
        active_sessions: stats.connected,
    }
}

pub fn snapshot(
    started_at: Instant,
    stats: SessionStatistics,
    sessions: &[SessionSnapshot],
) -> MetricsSnapshot {
    MetricsSnapshot {
        worker: worker_metrics(started_at, &stats),
        statistics: stats,
        sessions: sessions
            .iter()
            .map(|s| SessionMetricsEntry {
                session_id: s.session_id.clone(),
                status: s.state.as_str(),
                last_seen: s.last_seen,
                is_recovered: s.is_recovered,
            })
            .collect(),
    }
}

#[cfg(target_os = "linux")]
fn read_cpu_load() -> Option<f64> {
    let raw = std::fs::read_to_string("/proc/loadavg").ok()?;
    raw.split_whitespace().next()?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_load() -> Option<f64> {
    None
}

#[cfg(target_os = "linux")]
fn read_memory_used_percent() -> Option<f64> {
    fn field_kb(content: &str, key: &str) -> Option<f64> {
        content
            .lines()
            .find(|line| line.starts_with(key))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    }

    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;

    let rss = field_kb(&status, "VmRSS:")?;
    let total = field_kb(&meminfo, "MemTotal:")?;
    if total <= 0.0 {
        return None;
    }

    Some((rss / total * 100.0 * 100.0).round() / 100.0)
}

#[cfg(not(target_os = "linux"))]
fn read_memory_used_percent() -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[test]
    fn worker_metrics_reflect_session_counts() {
        let stats = SessionStatistics {
            total: 3,
            connected: 2,
            qr_ready: 1,
            ..SessionStatistics::default()
        };

        let metrics = worker_metrics(Instant::now(), &stats);
        assert_eq!(metrics.total_sessions, 3);
        assert_eq!(metrics.active_sessions, 2);
    }

    #[test]
    fn session_entries_use_stable_status_strings() {
        let mut snapshot = SessionSnapshot::new("metrics-1", "user-1", None, false);
        snapshot.state = SessionState::QrReady;

        let rendered = super::snapshot(Instant::now(), SessionStatistics::default(), &[snapshot]);
        assert_eq!(rendered.sessions.len(), 1);
        assert_eq!(rendered.sessions[0].status, "qr_ready");
    }
}
