use std::sync::atomic::{AtomicU64, Ordering};

/// Per-shipper counters. Shared through an `Arc` so a runner can read them
/// while the shipper is owned elsewhere.
#[derive(Debug, Default)]
pub struct ShipperStats {
    entries_written: AtomicU64,
    batches_written: AtomicU64,
    failed_flushes: AtomicU64,
    skipped_records: AtomicU64,
    substituted_timestamps: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShipperStatsSnapshot {
    pub entries_written: u64,
    pub batches_written: u64,
    pub failed_flushes: u64,
    pub skipped_records: u64,
    pub substituted_timestamps: u64,
}

impl ShipperStats {
    pub fn record_batch(&self, entries: usize) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.entries_written
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub fn record_failed_flush(&self) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_substituted_timestamp(&self) {
        self.substituted_timestamps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ShipperStatsSnapshot {
        ShipperStatsSnapshot {
            entries_written: self.entries_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            skipped_records: self.skipped_records.load(Ordering::Relaxed),
            substituted_timestamps: self.substituted_timestamps.load(Ordering::Relaxed),
        }
    }
}
