use std::collections::VecDeque;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::QueueError;
use super::segment::{self, HeadCursor, SegmentWriter};

/// Default number of envelopes per segment file.
pub const DEFAULT_SEGMENT_CAPACITY: usize = 2000;

/// Crash-recoverable FIFO of envelopes of one type, stored as segment files in a directory.
///
/// All state sits behind one mutex. `dequeue_block` parks the calling thread on a condvar
/// until a record arrives or the queue is closed; async callers should run it inside
/// `tokio::task::spawn_blocking`.
pub struct DurableQueue<E> {
    name: String,
    dir: PathBuf,
    state: Mutex<QueueState>,
    available: Condvar,
    _envelope: PhantomData<fn() -> E>,
}

struct QueueState {
    closed: bool,
    /// Consumers are turned away but producers may still append.
    stopped: bool,
    capacity: usize,
    /// Segment sequence numbers on disk, head first and tail last. Never empty.
    segments: VecDeque<u64>,
    head_consumed: usize,
    /// Undequeued raw records of the head segment.
    head_records: VecDeque<String>,
    /// `None` once closed.
    tail: Option<SegmentWriter>,
    len: usize,
}

impl QueueState {
    fn head_seq(&self) -> u64 {
        self.segments.front().copied().unwrap_or_default()
    }
}

impl<E> DurableQueue<E>
where
    E: Serialize + DeserializeOwned,
{
    /// Creates the queue at `fallback_dir/name`, or reopens it with its remaining records in
    /// their original order.
    pub fn open(
        name: &str,
        fallback_dir: impl AsRef<Path>,
        segment_capacity: usize,
    ) -> Result<Self, QueueError> {
        let dir = fallback_dir.as_ref().join(name);
        if segment_capacity == 0 {
            return Err(QueueError::init(&dir, "segment capacity must be positive"));
        }
        fs::create_dir_all(&dir).map_err(|e| QueueError::init(&dir, e.to_string()))?;

        let state = recover(&dir, segment_capacity)?;
        info!(
            "Opened queue [{}] in [{}]: {} records across {} segments",
            name,
            dir.display(),
            state.len,
            state.segments.len()
        );

        Ok(Self {
            name: name.to_string(),
            dir,
            state: Mutex::new(state),
            available: Condvar::new(),
            _envelope: PhantomData,
        })
    }

    /// Appends `envelope` at the tail. Returns once the record is on disk.
    pub fn enqueue(&self, envelope: &E) -> Result<(), QueueError> {
        let record = serde_json::to_string(envelope).map_err(QueueError::Serialization)?;

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(QueueError::Closed);
        }
        let tail = state.tail.as_mut().ok_or(QueueError::Closed)?;

        if tail.records() >= state.capacity {
            let next_seq = tail.seq() + 1;
            tail.sync()?;
            *tail = SegmentWriter::create(&self.dir, next_seq)?;
            state.segments.push_back(next_seq);
            debug!("Queue [{}] rolled over to segment {}", self.name, next_seq);
        }

        tail.append(&record)?;
        if tail.seq() == state.head_seq() {
            state.head_records.push_back(record);
        }
        state.len += 1;
        drop(guard);

        self.available.notify_one();
        Ok(())
    }

    /// Removes and returns the head envelope, waiting until one exists or the queue closes.
    ///
    /// Returns [`QueueError::Closed`] once the queue is closed or its consumers are stopped.
    pub fn dequeue_block(&self) -> Result<E, QueueError> {
        let mut state = self.lock();
        loop {
            if state.closed || state.stopped {
                return Err(QueueError::Closed);
            }
            if let Some(envelope) = self.take_head(&mut state)? {
                return Ok(envelope);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking dequeue; `Ok(None)` when the queue is empty.
    pub fn dequeue(&self) -> Result<Option<E>, QueueError> {
        let mut state = self.lock();
        if state.closed || state.stopped {
            return Err(QueueError::Closed);
        }
        self.take_head(&mut state)
    }

    fn take_head(&self, state: &mut QueueState) -> Result<Option<E>, QueueError> {
        loop {
            let Some(raw) = state.head_records.pop_front() else {
                if state.segments.len() > 1 {
                    self.advance_head(state)?;
                    continue;
                }
                return Ok(None);
            };

            let segment = state.head_seq();
            let position = state.head_consumed;
            // The record only leaves memory once the cursor past it is on disk.
            if let Err(err) = self.persist_head(state) {
                state.head_records.push_front(raw);
                return Err(err);
            }
            state.len = state.len.saturating_sub(1);

            return match serde_json::from_str(&raw) {
                Ok(envelope) => Ok(Some(envelope)),
                Err(source) => {
                    warn!(
                        "Queue [{}] dropped undecodable record {} of segment {}",
                        self.name, position, segment
                    );
                    Err(QueueError::Deserialization {
                        segment,
                        position,
                        raw,
                        source,
                    })
                }
            };
        }
    }

    /// Moves the cursor past the record just popped from the head.
    ///
    /// State is only touched after the write succeeds.
    fn persist_head(&self, state: &mut QueueState) -> Result<(), QueueError> {
        if state.head_records.is_empty() && state.segments.len() > 1 {
            return self.advance_head(state);
        }
        segment::save_cursor(
            &self.dir,
            HeadCursor {
                segment: state.head_seq(),
                consumed: state.head_consumed + 1,
            },
        )?;
        state.head_consumed += 1;
        Ok(())
    }

    /// Makes the second segment the head. The drained file is removed last; if that fails it
    /// is older than the cursor and `recover` deletes it on the next open.
    fn advance_head(&self, state: &mut QueueState) -> Result<(), QueueError> {
        let (Some(&drained), Some(&next)) = (state.segments.front(), state.segments.get(1)) else {
            return Ok(());
        };
        let contents = segment::read_segment(&segment::segment_path(&self.dir, next))?;
        segment::save_cursor(
            &self.dir,
            HeadCursor {
                segment: next,
                consumed: 0,
            },
        )?;

        state.segments.pop_front();
        state.head_records = contents.records.into();
        state.head_consumed = 0;

        match segment::remove_segment(&self.dir, drained) {
            Ok(()) => debug!("Queue [{}] reclaimed drained segment {}", self.name, drained),
            Err(e) => warn!(
                "Queue [{}] left drained segment {} on disk: {}",
                self.name, drained, e
            ),
        }
        Ok(())
    }
}

impl<E> DurableQueue<E> {
    /// Turns away current and future consumers while still accepting appends.
    ///
    /// Lets in-flight work be retried or handed back before the queue is closed.
    pub fn stop_consumers(&self) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        drop(state);

        self.available.notify_all();
        info!("Stopped consumers of queue [{}]", self.name);
    }

    /// Marks the queue closed, wakes every blocked consumer, and releases the tail file.
    ///
    /// Only the first call does anything; later calls return [`QueueError::Closed`].
    pub fn close(&self) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.closed = true;
        let tail = state.tail.take();
        drop(state);

        self.available.notify_all();
        if let Some(tail) = tail {
            tail.sync()?;
        }
        info!("Closed queue [{}]", self.name);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of undequeued records, including any that will fail to deserialize.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn segment_count(&self) -> usize {
        self.lock().segments.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> Drop for DurableQueue<E> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Rebuilds queue state from the files in `dir`.
fn recover(dir: &Path, capacity: usize) -> Result<QueueState, QueueError> {
    let init_err = |e: std::io::Error| QueueError::init(dir, e.to_string());

    let cursor = segment::load_cursor(dir)
        .map_err(|e| QueueError::init(dir, format!("unreadable head cursor: {e}")))?;
    let mut seqs = segment::list_segments(dir).map_err(init_err)?;

    // Segments older than the cursor were drained before a crash interrupted their removal.
    if let Some(cursor) = cursor {
        for stale in seqs.iter().filter(|seq| **seq < cursor.segment) {
            segment::remove_segment(dir, *stale).map_err(init_err)?;
        }
        seqs.retain(|seq| *seq >= cursor.segment);
    }

    if seqs.is_empty() {
        let seq = cursor.map_or(1, |c| c.segment.max(1));
        SegmentWriter::create(dir, seq).map_err(init_err)?;
        seqs.push(seq);
    }

    let head_seq = seqs[0];
    let tail_seq = seqs[seqs.len() - 1];

    let tail_path = segment::segment_path(dir, tail_seq);
    let tail_contents = segment::read_segment(&tail_path).map_err(init_err)?;
    if tail_contents.torn {
        warn!(
            "Truncating torn record at byte {} of [{}]",
            tail_contents.valid_len,
            tail_path.display()
        );
        segment::truncate_segment(&tail_path, tail_contents.valid_len).map_err(init_err)?;
    }
    let tail = SegmentWriter::reopen(dir, tail_seq, tail_contents.records.len())
        .map_err(init_err)?;

    let mut len = 0usize;
    if seqs.len() > 2 {
        for seq in &seqs[1..seqs.len() - 1] {
            len += read_sealed(dir, *seq)?.len();
        }
    }
    if head_seq != tail_seq {
        len += tail_contents.records.len();
    }

    let head_records = if head_seq == tail_seq {
        tail_contents.records
    } else {
        read_sealed(dir, head_seq)?
    };

    let head_consumed = match cursor {
        Some(c) if c.segment == head_seq => c.consumed,
        _ => 0,
    };
    if head_consumed > head_records.len() {
        return Err(QueueError::init(
            dir,
            format!(
                "head cursor consumed {} records but segment {} holds {}",
                head_consumed,
                head_seq,
                head_records.len()
            ),
        ));
    }
    let head_records: VecDeque<String> = head_records.into_iter().skip(head_consumed).collect();
    len += head_records.len();

    Ok(QueueState {
        closed: false,
        stopped: false,
        capacity,
        segments: seqs.into(),
        head_consumed,
        head_records,
        tail: Some(tail),
        len,
    })
}

/// Reads a segment that is no longer written to; a torn record there is corruption.
fn read_sealed(dir: &Path, seq: u64) -> Result<Vec<String>, QueueError> {
    let path = segment::segment_path(dir, seq);
    let contents =
        segment::read_segment(&path).map_err(|e| QueueError::init(dir, e.to_string()))?;
    if contents.torn {
        return Err(QueueError::init(
            dir,
            format!("sealed segment [{}] ends in a partial record", path.display()),
        ));
    }
    Ok(contents.records)
}
