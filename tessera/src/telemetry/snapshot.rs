//! Point-in-time telemetry snapshot.

use std::fmt;
use std::time::Duration;

/// Immutable copy of [`EngineMetrics`](super::EngineMetrics) counters with
/// derived ratios.
#[derive(Clone, Debug, Default)]
pub struct TelemetrySnapshot {
    pub uptime: Duration,

    // === Cache ===
    pub tile_requests: u64,
    /// Requests answered by a tile that already existed
    pub tile_requests_coalesced: u64,
    pub tiles_evicted: u64,
    pub tiles_requeued: u64,

    // === Fetch ===
    pub fetches_started: u64,
    pub fetches_succeeded: u64,
    pub fetches_failed: u64,
    pub fetches_cancelled: u64,
    pub fetches_active: usize,
    pub bytes_downloaded: u64,
    pub bytes_per_second: f64,

    // === Disk store ===
    pub disk_hits: u64,
    pub disk_misses: u64,

    // === Timing ===
    pub total_download_time_ms: u64,
    pub total_decode_time_ms: u64,
}

impl TelemetrySnapshot {
    /// Share of requests that reused an existing tile (0.0 - 1.0).
    pub fn coalescing_rate(&self) -> f64 {
        ratio(self.tile_requests_coalesced, self.tile_requests)
    }

    /// Share of finished fetches that failed (0.0 - 1.0).
    pub fn failure_rate(&self) -> f64 {
        ratio(
            self.fetches_failed,
            self.fetches_succeeded + self.fetches_failed,
        )
    }

    /// Disk store hit rate (0.0 - 1.0).
    pub fn disk_hit_rate(&self) -> f64 {
        ratio(self.disk_hits, self.disk_hits + self.disk_misses)
    }

    pub fn bytes_downloaded_human(&self) -> String {
        format_bytes(self.bytes_downloaded)
    }

    pub fn throughput_human(&self) -> String {
        format!("{}/s", format_bytes(self.bytes_per_second as u64))
    }

    pub fn uptime_human(&self) -> String {
        format_duration(self.uptime)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Engine Telemetry (uptime: {})", self.uptime_human())?;
        writeln!(f, "─────────────────────────────────────────")?;
        writeln!(f)?;

        writeln!(f, "Tiles:")?;
        writeln!(
            f,
            "  Requests: {} ({:.1}% coalesced)",
            self.tile_requests,
            self.coalescing_rate() * 100.0
        )?;
        writeln!(f, "  Evicted: {}", self.tiles_evicted)?;
        writeln!(f, "  Re-queued: {}", self.tiles_requeued)?;
        writeln!(f)?;

        writeln!(f, "Fetches:")?;
        writeln!(
            f,
            "  Succeeded: {}  Failed: {} ({:.1}%)  Cancelled: {}",
            self.fetches_succeeded,
            self.fetches_failed,
            self.failure_rate() * 100.0,
            self.fetches_cancelled
        )?;
        writeln!(f, "  Active: {}", self.fetches_active)?;
        writeln!(
            f,
            "  Downloaded: {} ({})",
            self.bytes_downloaded_human(),
            self.throughput_human()
        )?;
        writeln!(f)?;

        writeln!(f, "Disk store:")?;
        write!(
            f,
            "  {:.1}% hit rate ({} hits, {} misses)",
            self.disk_hit_rate() * 100.0,
            self.disk_hits,
            self.disk_misses
        )
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.1} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} B", bytes)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_with_zero_totals() {
        let snapshot = TelemetrySnapshot::default();
        assert_eq!(snapshot.coalescing_rate(), 0.0);
        assert_eq!(snapshot.failure_rate(), 0.0);
        assert_eq!(snapshot.disk_hit_rate(), 0.0);
    }

    #[test]
    fn test_rates() {
        let snapshot = TelemetrySnapshot {
            tile_requests: 10,
            tile_requests_coalesced: 4,
            fetches_succeeded: 3,
            fetches_failed: 1,
            disk_hits: 1,
            disk_misses: 3,
            ..Default::default()
        };
        assert!((snapshot.coalescing_rate() - 0.4).abs() < 1e-12);
        assert!((snapshot.failure_rate() - 0.25).abs() < 1e-12);
        assert!((snapshot.disk_hit_rate() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1_500_000), "1.5 MB");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m");
        assert_eq!(format_duration(Duration::from_secs(75)), "1m 15s");
    }

    #[test]
    fn test_display_mentions_sections() {
        let text = TelemetrySnapshot::default().to_string();
        assert!(text.contains("Tiles:"));
        assert!(text.contains("Fetches:"));
        assert!(text.contains("Disk store:"));
    }
}
