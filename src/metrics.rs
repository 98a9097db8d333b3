//! Periodic system metric sampling
//!
//! CPU, memory, disk, and best-effort CPU temperature land in the
//! `system_metrics` table. The data server runs `sampling_task` in the
//! background; `POST /system/metrics` triggers one collection on demand.

use std::time::Duration;

use sysinfo::{Components, Disks, System};

use crate::storage::{Database, StorageResult};

/// Interval of the background sampling task
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(300);

/// One snapshot of host utilization
#[derive(Debug, Clone, Copy)]
pub struct MetricSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub temperature: Option<f64>,
}

/// Sample the host. Blocking: the CPU reading needs two refreshes.
pub fn sample_system() -> MetricSample {
    let mut system = System::new_all();
    system.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu_usage();

    let cpu_percent = system.global_cpu_usage() as f64;
    let memory_percent = if system.total_memory() > 0 {
        system.used_memory() as f64 / system.total_memory() as f64 * 100.0
    } else {
        0.0
    };

    let disks = Disks::new_with_refreshed_list();
    let (total, available) = disks.list().iter().fold((0u64, 0u64), |(t, a), disk| {
        (t + disk.total_space(), a + disk.available_space())
    });
    let disk_percent = if total > 0 {
        (total - available) as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    let components = Components::new_with_refreshed_list();
    let temperature = components
        .list()
        .iter()
        .find(|c| c.label().to_lowercase().contains("cpu"))
        .map(|c| c.temperature() as f64);

    MetricSample {
        cpu_percent,
        memory_percent,
        disk_percent,
        temperature,
    }
}

/// Sample and persist one metrics row
pub fn collect_and_store(db: &Database) -> StorageResult<String> {
    let sample = sample_system();
    db.insert_metric(
        Some(sample.cpu_percent),
        Some(sample.memory_percent),
        Some(sample.disk_percent),
        sample.temperature,
    )
}

/// Background loop persisting a sample every interval
pub async fn sampling_task(db: Database) {
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    loop {
        ticker.tick().await;
        let db = db.clone();
        let result = tokio::task::spawn_blocking(move || collect_and_store(&db)).await;
        match result {
            Ok(Ok(_)) => tracing::debug!("System metrics sampled"),
            Ok(Err(e)) => tracing::error!("Metric collection error: {}", e),
            Err(e) => tracing::error!("Metric task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_in_range() {
        let sample = sample_system();
        assert!((0.0..=100.0).contains(&sample.cpu_percent));
        assert!((0.0..=100.0).contains(&sample.memory_percent));
        assert!((0.0..=100.0).contains(&sample.disk_percent));
    }

    #[test]
    fn test_collect_persists_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("metrics.db"));
        db.init_schema().unwrap();

        collect_and_store(&db).unwrap();
        let metrics = db.recent_metrics(1).unwrap();
        assert_eq!(metrics.len(), 1);
        assert!(metrics[0].cpu_percent.is_some());
    }
}
