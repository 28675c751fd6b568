//! Disk sink: JSON lines in size-rotated segment files.
//!
//! Records are appended to `invalidtxs-<seq>.jsonl` files in one directory.
//! A new segment is started when the active one would grow past the segment
//! limit, and on every open (existing segments are never appended to). The
//! sum of all segment sizes is kept under `max_disk_usage`:
//!
//! - [`EvictionPolicy::IgnoreNew`] refuses records that do not fit. Usage is
//!   re-read from disk (at most once per [`REFRESH_INTERVAL`]) so space freed
//!   by an operator is picked up.
//! - [`EvictionPolicy::DeleteOld`] deletes the oldest segments until the
//!   record fits.
//!
//! A record larger than the whole budget is dropped under either policy.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{InvalidTxSink, SinkCounters, SinkOutcome, SinkStats};
use crate::config::{EvictionPolicy, FileSinkConfig};
use crate::error::SinkError;
use crate::record::InvalidTxRecord;

const SEGMENT_PREFIX: &str = "invalidtxs-";
const SEGMENT_SUFFIX: &str = ".jsonl";

/// The budget is split into at least this many segments so that eviction
/// never has to throw away everything at once.
const MIN_SEGMENTS: u64 = 4;

/// Minimum time between on-disk usage rescans while refusing writes.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// One segment file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub seq: u64,
    pub path: PathBuf,
    pub size: u64,
}

/// Segment file name for a sequence number.
pub fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}{seq:010}{SEGMENT_SUFFIX}"))
}

fn parse_seq(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// List the segment files in `dir`, oldest first. A missing directory has
/// no segments; unrelated files are ignored.
pub fn scan_segments(dir: &Path) -> io::Result<Vec<Segment>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Some(seq) = entry.file_name().to_str().and_then(parse_seq) else {
            continue;
        };
        let meta = entry.metadata()?;
        if meta.is_file() {
            segments.push(Segment {
                seq,
                path: entry.path(),
                size: meta.len(),
            });
        }
    }
    segments.sort_by_key(|s| s.seq);
    Ok(segments)
}

struct State {
    /// Oldest first. When `active` is set it writes to the last entry.
    segments: VecDeque<Segment>,
    active: Option<File>,
    total: u64,
    next_seq: u64,
    last_refresh: Option<Instant>,
}

/// Disk-backed sink with a total size cap.
pub struct FileSink {
    dir: PathBuf,
    max_disk_usage: u64,
    policy: EvictionPolicy,
    segment_limit: u64,
    write_hex: bool,
    state: Mutex<State>,
    stats: SinkStats,
}

impl FileSink {
    /// Open (creating if needed) the sink directory and account for the
    /// segments already in it.
    pub fn open(config: &FileSinkConfig) -> Result<Self, SinkError> {
        fs::create_dir_all(&config.dir)?;
        let segments = scan_segments(&config.dir)?;
        let total = segments.iter().map(|s| s.size).sum();
        let next_seq = segments.last().map_or(0, |s| s.seq + 1);

        info!(
            dir = %config.dir.display(),
            segments = segments.len(),
            bytes = total,
            policy = %config.eviction_policy,
            "invalidtx: file sink opened"
        );

        Ok(Self {
            dir: config.dir.clone(),
            max_disk_usage: config.max_disk_usage,
            policy: config.eviction_policy,
            segment_limit: config
                .segment_bytes
                .min(config.max_disk_usage / MIN_SEGMENTS)
                .max(1),
            write_hex: config.write_hex,
            state: Mutex::new(State {
                segments: segments.into(),
                active: None,
                total,
                next_seq,
                last_refresh: None,
            }),
            stats: SinkStats::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Bytes currently accounted on disk.
    pub fn disk_usage(&self) -> u64 {
        self.state.lock().total
    }

    /// Snapshot of the tracked segments, oldest first.
    pub fn segments(&self) -> Vec<Segment> {
        self.state.lock().segments.iter().cloned().collect()
    }

    /// Re-read usage from disk, picking up segments removed by someone else.
    pub fn refresh_usage(&self) -> Result<u64, SinkError> {
        let mut state = self.state.lock();
        self.rescan(&mut state)?;
        Ok(state.total)
    }

    fn rescan(&self, state: &mut State) -> io::Result<()> {
        let on_disk = scan_segments(&self.dir)?;
        let active_seq = state.active.as_ref().and(state.segments.back()).map(|s| s.seq);
        if active_seq.is_some_and(|seq| on_disk.last().map(|s| s.seq) != Some(seq)) {
            state.active = None;
        }
        state.total = on_disk.iter().map(|s| s.size).sum();
        state.segments = on_disk.into();
        state.last_refresh = Some(Instant::now());
        Ok(())
    }

    /// Delete the oldest segment. Returns `false` if there is none.
    fn evict_oldest(&self, state: &mut State) -> io::Result<bool> {
        let Some(oldest) = state.segments.pop_front() else {
            return Ok(false);
        };
        if state.segments.is_empty() {
            // The oldest was also the active one.
            state.active = None;
        }
        match fs::remove_file(&oldest.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                state.segments.push_front(oldest);
                return Err(e);
            }
        }
        state.total = state.total.saturating_sub(oldest.size);
        debug!(seq = oldest.seq, bytes = oldest.size, "invalidtx: evicted segment");
        Ok(true)
    }

    fn append(&self, state: &mut State, line: &[u8]) -> io::Result<()> {
        let len = line.len() as u64;
        let rotate = match (&state.active, state.segments.back()) {
            (Some(_), Some(seg)) => seg.size > 0 && seg.size + len > self.segment_limit,
            _ => true,
        };
        if rotate {
            let seq = state.next_seq;
            let path = segment_path(&self.dir, seq);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            state.next_seq += 1;
            state.segments.push_back(Segment { seq, path, size: 0 });
            state.active = Some(file);
            debug!(seq, "invalidtx: started segment");
        }

        let (Some(file), Some(seg)) = (state.active.as_mut(), state.segments.back_mut()) else {
            return Ok(());
        };
        match file.write_all(line) {
            Ok(()) => {
                seg.size += len;
                state.total += len;
                Ok(())
            }
            Err(e) => {
                // Part of the line may have landed; never append after it.
                let actual = fs::metadata(&seg.path).map_or(seg.size, |m| m.len());
                state.total = state.total.saturating_sub(seg.size) + actual;
                seg.size = actual;
                state.active = None;
                warn!(seq = seg.seq, "invalidtx: segment write failed, closing it: {e}");
                Err(e)
            }
        }
    }

    fn drop_record(&self, record: &InvalidTxRecord, len: usize, usage: u64) -> SinkOutcome {
        debug!(
            txid = %record.txid(),
            bytes = len,
            usage,
            max = self.max_disk_usage,
            "invalidtx: file sink full, record dropped"
        );
        self.stats.record(SinkOutcome::Dropped, len)
    }
}

impl InvalidTxSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn write(&self, record: &InvalidTxRecord) -> Result<SinkOutcome, SinkError> {
        let mut line = record.to_json(self.write_hex)?;
        line.push('\n');
        let len = line.len() as u64;

        if len > self.max_disk_usage {
            return Ok(self.drop_record(record, line.len(), 0));
        }

        let mut state = self.state.lock();
        let active_gone = state.active.is_some()
            && state.segments.back().is_none_or(|seg| !seg.path.exists());
        if active_gone {
            debug!("invalidtx: active segment removed externally, rescanning");
            self.rescan(&mut state)?;
        }

        if state.total + len > self.max_disk_usage {
            match self.policy {
                EvictionPolicy::IgnoreNew => {
                    let stale = state
                        .last_refresh
                        .is_none_or(|at| at.elapsed() >= REFRESH_INTERVAL);
                    if stale {
                        self.rescan(&mut state)?;
                    }
                    if state.total + len > self.max_disk_usage {
                        return Ok(self.drop_record(record, line.len(), state.total));
                    }
                }
                EvictionPolicy::DeleteOld => {
                    while state.total + len > self.max_disk_usage {
                        if !self.evict_oldest(&mut state)? {
                            // Untracked bytes only; nothing left to delete.
                            state.total = 0;
                        }
                    }
                }
            }
        }

        self.append(&mut state, line.as_bytes())?;
        Ok(self.stats.record(SinkOutcome::Written, line.len()))
    }

    fn clear(&self) -> Result<u64, SinkError> {
        let mut state = self.state.lock();
        state.active = None;
        let mut freed = 0;
        for segment in scan_segments(&self.dir)? {
            match fs::remove_file(&segment.path) {
                Ok(()) => freed += segment.size,
                Err(e) => warn!(path = %segment.path.display(), "invalidtx: failed to remove segment: {e}"),
            }
        }
        state.segments.clear();
        state.total = 0;
        info!(dir = %self.dir.display(), freed, "invalidtx: file sink cleared");
        Ok(freed)
    }

    fn counters(&self) -> SinkCounters {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::make_record;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn config(dir: &Path, max: u64, policy: EvictionPolicy) -> FileSinkConfig {
        FileSinkConfig {
            dir: dir.to_path_buf(),
            max_disk_usage: max,
            eviction_policy: policy,
            segment_bytes: max,
            write_hex: true,
        }
    }

    fn line_len(sig_len: usize) -> u64 {
        make_record(1, sig_len).to_json(true).unwrap().len() as u64 + 1
    }

    fn on_disk(dir: &Path) -> u64 {
        scan_segments(dir).unwrap().iter().map(|s| s.size).sum()
    }

    // ------------------------------------------------------------------
    // Basic writes
    // ------------------------------------------------------------------

    #[test]
    fn writes_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::open(&config(dir.path(), 1_000_000, EvictionPolicy::IgnoreNew)).unwrap();
        let a = make_record(1, 50);
        let b = make_record(2, 50);
        assert_eq!(sink.write(&a).unwrap(), SinkOutcome::Written);
        assert_eq!(sink.write(&b).unwrap(), SinkOutcome::Written);

        let segments = scan_segments(dir.path()).unwrap();
        assert_eq!(segments.len(), 1);
        let text = fs::read_to_string(&segments[0].path).unwrap();
        let lines: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["txid"], a.txid().to_string());
        assert_eq!(lines[1]["txid"], b.txid().to_string());
        assert_eq!(sink.disk_usage(), on_disk(dir.path()));
        assert_eq!(sink.counters().written, 2);
    }

    #[test]
    fn rotates_segments_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let len = line_len(200);
        let mut cfg = config(dir.path(), 100 * len, EvictionPolicy::IgnoreNew);
        cfg.segment_bytes = 2 * len;
        let sink = FileSink::open(&cfg).unwrap();
        for seed in 0..6 {
            sink.write(&make_record(seed, 200)).unwrap();
        }
        let segments = scan_segments(dir.path()).unwrap();
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.size <= 2 * len));
        assert_eq!(sink.segments(), segments);
        assert_eq!(sink.dir(), dir.path());
    }

    #[test]
    fn reopen_counts_existing_segments_and_starts_new_one() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1_000_000, EvictionPolicy::IgnoreNew);
        {
            let sink = FileSink::open(&cfg).unwrap();
            sink.write(&make_record(1, 50)).unwrap();
        }
        let before = on_disk(dir.path());
        let sink = FileSink::open(&cfg).unwrap();
        assert_eq!(sink.disk_usage(), before);
        sink.write(&make_record(2, 50)).unwrap();
        assert_eq!(scan_segments(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn ignores_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        let sink = FileSink::open(&config(dir.path(), 1_000, EvictionPolicy::IgnoreNew)).unwrap();
        assert_eq!(sink.disk_usage(), 0);
    }

    // ------------------------------------------------------------------
    // IgnoreNew
    // ------------------------------------------------------------------

    #[test]
    fn ignore_new_plateaus_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let len = line_len(100);
        let max = 5 * len + len / 2;
        let sink = FileSink::open(&config(dir.path(), max, EvictionPolicy::IgnoreNew)).unwrap();

        let outcomes: Vec<SinkOutcome> = (0..10).map(|s| sink.write(&make_record(s, 100)).unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|o| **o == SinkOutcome::Written).count(), 5);
        assert!(outcomes[5..].iter().all(|o| *o == SinkOutcome::Dropped));
        assert_eq!(on_disk(dir.path()), 5 * len);
        assert!(on_disk(dir.path()) <= max);
        assert_eq!(sink.counters().dropped, 5);
    }

    #[test]
    fn ignore_new_resumes_after_external_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let len = line_len(100);
        let mut cfg = config(dir.path(), 4 * len, EvictionPolicy::IgnoreNew);
        cfg.segment_bytes = len;
        let sink = FileSink::open(&cfg).unwrap();
        for seed in 0..4 {
            assert_eq!(sink.write(&make_record(seed, 100)).unwrap(), SinkOutcome::Written);
        }
        assert_eq!(sink.write(&make_record(9, 100)).unwrap(), SinkOutcome::Dropped);

        let oldest = &scan_segments(dir.path()).unwrap()[0];
        fs::remove_file(&oldest.path).unwrap();
        assert_eq!(sink.refresh_usage().unwrap(), 3 * len);
        assert_eq!(sink.write(&make_record(10, 100)).unwrap(), SinkOutcome::Written);
        assert_eq!(on_disk(dir.path()), 4 * len);
    }

    #[test]
    fn record_larger_than_budget_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::open(&config(dir.path(), 100, EvictionPolicy::DeleteOld)).unwrap();
        assert_eq!(sink.write(&make_record(1, 500)).unwrap(), SinkOutcome::Dropped);
        assert_eq!(on_disk(dir.path()), 0);
    }

    // ------------------------------------------------------------------
    // DeleteOld
    // ------------------------------------------------------------------

    #[test]
    fn delete_old_stays_under_cap_and_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let len = line_len(100);
        let max = 4 * len;
        let mut cfg = config(dir.path(), max, EvictionPolicy::DeleteOld);
        cfg.segment_bytes = len;
        let sink = FileSink::open(&cfg).unwrap();

        for seed in 0..20 {
            assert_eq!(sink.write(&make_record(seed, 100)).unwrap(), SinkOutcome::Written);
            assert!(on_disk(dir.path()) <= max);
            assert_eq!(sink.disk_usage(), on_disk(dir.path()));
        }

        let newest = scan_segments(dir.path()).unwrap().pop().unwrap();
        let text = fs::read_to_string(newest.path).unwrap();
        assert!(text.contains(&make_record(19, 100).txid().to_string()));
        assert_eq!(sink.counters().written, 20);
    }

    #[test]
    fn delete_old_evicts_active_segment_when_it_is_the_only_one() {
        let dir = tempfile::tempdir().unwrap();
        let small = line_len(10);
        let large = line_len(400);
        let sink = FileSink::open(&config(dir.path(), large + small / 2, EvictionPolicy::DeleteOld)).unwrap();
        sink.write(&make_record(1, 10)).unwrap();
        assert_eq!(sink.write(&make_record(2, 400)).unwrap(), SinkOutcome::Written);
        assert_eq!(on_disk(dir.path()), large);
    }

    // ------------------------------------------------------------------
    // External changes and failures
    // ------------------------------------------------------------------

    #[test]
    fn writes_land_on_disk_after_external_delete() {
        let dir = tempfile::tempdir().unwrap();
        let len = line_len(100);
        let sink = FileSink::open(&config(dir.path(), 1_000_000, EvictionPolicy::DeleteOld)).unwrap();
        sink.write(&make_record(1, 100)).unwrap();

        for segment in scan_segments(dir.path()).unwrap() {
            fs::remove_file(segment.path).unwrap();
        }
        for seed in 2..7 {
            assert_eq!(sink.write(&make_record(seed, 100)).unwrap(), SinkOutcome::Written);
        }
        assert_eq!(on_disk(dir.path()), 5 * len);
        assert_eq!(sink.disk_usage(), 5 * len);
    }

    #[test]
    fn ignore_new_sees_external_delete_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let len = line_len(100);
        let sink = FileSink::open(&config(dir.path(), 2 * len, EvictionPolicy::IgnoreNew)).unwrap();
        sink.write(&make_record(1, 100)).unwrap();
        sink.write(&make_record(2, 100)).unwrap();
        assert_eq!(sink.write(&make_record(3, 100)).unwrap(), SinkOutcome::Dropped);

        for segment in scan_segments(dir.path()).unwrap() {
            fs::remove_file(segment.path).unwrap();
        }
        assert_eq!(sink.write(&make_record(4, 100)).unwrap(), SinkOutcome::Written);
        assert_eq!(on_disk(dir.path()), len);
    }

    #[cfg(unix)]
    #[test]
    fn failed_write_starts_a_fresh_segment() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let len = line_len(100);
        let sink = FileSink::open(&config(dir.path(), 1_000_000, EvictionPolicy::IgnoreNew)).unwrap();
        // The next segment the sink opens is a device that is always full.
        std::os::unix::fs::symlink(full, segment_path(dir.path(), 0)).unwrap();

        assert!(matches!(sink.write(&make_record(1, 100)), Err(SinkError::Io(_))));
        assert_eq!(sink.disk_usage(), 0);

        assert_eq!(sink.write(&make_record(2, 100)).unwrap(), SinkOutcome::Written);
        let text = fs::read_to_string(segment_path(dir.path(), 1)).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains(&make_record(2, 100).txid().to_string()));
        assert_eq!(sink.disk_usage(), len);
    }

    // ------------------------------------------------------------------
    // Clear
    // ------------------------------------------------------------------

    #[test]
    fn clear_removes_all_segments() {
        let dir = tempfile::tempdir().unwrap();
        let len = line_len(100);
        let mut cfg = config(dir.path(), 100 * len, EvictionPolicy::IgnoreNew);
        cfg.segment_bytes = len;
        let sink = FileSink::open(&cfg).unwrap();
        for seed in 0..3 {
            sink.write(&make_record(seed, 100)).unwrap();
        }
        assert_eq!(sink.clear().unwrap(), 3 * len);
        assert!(scan_segments(dir.path()).unwrap().is_empty());
        assert_eq!(sink.disk_usage(), 0);

        sink.write(&make_record(5, 100)).unwrap();
        assert_eq!(on_disk(dir.path()), len);
    }
}
