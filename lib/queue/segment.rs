//! Segment files and the head cursor.
//!
//! ```text
//! <fallback_dir>/<name>/
//!   0000000000001.seg   # JSON Lines, at most `segment_capacity` records
//!   0000000000002.seg
//!   head.cursor         # {"segment":1,"consumed":17}
//! ```
//!
//! Every record is written with its trailing newline in one `write_all` and fsynced, so a
//! line without a newline can only be a torn write from a crash. Such a tail is truncated on
//! open. The cursor is replaced with write-to-temp-then-rename so it is always either the old
//! or the new value.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const SEGMENT_EXTENSION: &str = "seg";
const SEGMENT_SEQ_WIDTH: usize = 13;
const CURSOR_FILE: &str = "head.cursor";
const CURSOR_TMP_FILE: &str = "head.cursor.tmp";

pub(crate) fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{seq:013}.{SEGMENT_EXTENSION}"))
}

fn parse_segment_seq(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != SEGMENT_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != SEGMENT_SEQ_WIDTH || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Lists segment sequence numbers present in `dir`, oldest first.
pub(crate) fn list_segments(dir: &Path) -> io::Result<Vec<u64>> {
    let mut seqs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(seq) = parse_segment_seq(&entry.path()) {
            seqs.push(seq);
        }
    }
    seqs.sort_unstable();
    Ok(seqs)
}

/// Complete records of one segment file.
#[derive(Debug, Default)]
pub(crate) struct SegmentContents {
    pub records: Vec<String>,
    /// Byte length of the prefix made of complete lines.
    pub valid_len: u64,
    /// Whether a partial final line was found past `valid_len`.
    pub torn: bool,
}

/// Reads every complete line of a segment.
///
/// Lines that are not valid UTF-8 are kept with replacement characters so they surface as
/// undecodable records at their own position instead of failing the whole segment.
pub(crate) fn read_segment(path: &Path) -> io::Result<SegmentContents> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut contents = SegmentContents::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        let bytes_read = reader.read_until(b'\n', &mut line)?;
        if bytes_read == 0 {
            break;
        }
        if line.last() != Some(&b'\n') {
            contents.torn = true;
            break;
        }
        contents.valid_len += bytes_read as u64;
        line.pop();
        if !line.is_empty() {
            contents
                .records
                .push(String::from_utf8_lossy(&line).into_owned());
        }
    }

    Ok(contents)
}

pub(crate) fn truncate_segment(path: &Path, len: u64) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    fsync_file(&file)
}

pub(crate) fn remove_segment(dir: &Path, seq: u64) -> io::Result<()> {
    match fs::remove_file(segment_path(dir, seq)) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fsync_dir(dir)
}

/// Append handle on the tail segment.
#[derive(Debug)]
pub(crate) struct SegmentWriter {
    seq: u64,
    file: File,
    records: usize,
}

impl SegmentWriter {
    pub fn create(dir: &Path, seq: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(dir, seq))?;
        fsync_dir(dir)?;
        Ok(Self {
            seq,
            file,
            records: 0,
        })
    }

    /// Reopens an existing segment whose complete record count is already known.
    pub fn reopen(dir: &Path, seq: u64, records: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .open(segment_path(dir, seq))?;
        Ok(Self { seq, file, records })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn append(&mut self, record: &str) -> io::Result<()> {
        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        fsync_file(&self.file)?;
        self.records += 1;
        Ok(())
    }

    pub fn sync(&self) -> io::Result<()> {
        fsync_file(&self.file)
    }
}

/// How far the head segment has been drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct HeadCursor {
    pub segment: u64,
    pub consumed: usize,
}

pub(crate) fn load_cursor(dir: &Path) -> io::Result<Option<HeadCursor>> {
    let raw = match fs::read_to_string(dir.join(CURSOR_FILE)) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_str(raw.trim())
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub(crate) fn save_cursor(dir: &Path, cursor: HeadCursor) -> io::Result<()> {
    let encoded =
        serde_json::to_vec(&cursor).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp_path = dir.join(CURSOR_TMP_FILE);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&encoded)?;
        fsync_file(&file)?;
    }
    fs::rename(&tmp_path, dir.join(CURSOR_FILE))?;
    fsync_dir(dir)
}

fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Directory entries (created, renamed, removed files) are only durable after this.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
