//! Booking ledger log.
//!
//! One record per [`Event`]: `[u32 le: payload len][bincode payload][u32 le: crc32]`.
//! A crash mid-write leaves at most one torn record at the tail. Opening the
//! log cuts that tail off so later appends stay readable.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

const HEADER_LEN: u64 = 4;
const TRAILER_LEN: u64 = 4;
/// Larger length prefixes are treated as corruption.
const MAX_RECORD_LEN: u64 = 1 << 24;

fn frame(event: &Event) -> io::Result<Vec<u8>> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidData, "event too large for ledger"))?;
    let mut record = Vec::with_capacity(payload.len() + 8);
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(&payload);
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(record)
}

enum Record {
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Short read, checksum mismatch, or undecodable payload.
    Torn,
}

/// `read_exact` that reports a short read as `Ok(false)`.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_record(reader: &mut impl Read) -> io::Result<Record> {
    let mut header = [0u8; HEADER_LEN as usize];
    let mut got = 0;
    while got < header.len() {
        match reader.read(&mut header[got..]) {
            Ok(0) if got == 0 => return Ok(Record::End),
            Ok(0) => return Ok(Record::Torn),
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    let len = u32::from_le_bytes(header) as u64;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Torn);
    }
    let mut payload = vec![0u8; len as usize];
    let mut trailer = [0u8; TRAILER_LEN as usize];
    if !fill(reader, &mut payload)? || !fill(reader, &mut trailer)? {
        return Ok(Record::Torn);
    }
    if u32::from_le_bytes(trailer) != crc32fast::hash(&payload) {
        return Ok(Record::Torn);
    }
    Ok(match bincode::deserialize(&payload) {
        Ok(event) => Record::Event(event, HEADER_LEN + len + TRAILER_LEN),
        Err(_) => Record::Torn,
    })
}

/// Result of reading a ledger file back.
#[derive(Debug, Default, PartialEq)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the readable prefix.
    pub valid_len: u64,
    /// Bytes after the readable prefix.
    pub discarded: u64,
}

pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length as of the last successful fsync.
    synced_len: u64,
    /// Bytes and records handed to the writer since then.
    pending_len: u64,
    pending_records: u64,
    appends_since_compact: u64,
    /// Set when a failed write could not be rolled back.
    poisoned: bool,
    #[cfg(test)]
    fault: Option<Fault>,
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq)]
enum Fault {
    /// The next `flush_sync` fails before anything reaches the file.
    Flush,
    /// The next append puts half a record on disk and fails.
    TornWrite,
}

impl Wal {
    /// Read every intact record. Stops at the first torn one.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut replay = Replay::default();
        while let Record::Event(event, size) = read_record(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += size;
        }
        replay.discarded = file_len.saturating_sub(replay.valid_len);
        Ok(replay)
    }

    /// Replay the log at `path`, drop any torn tail, and open it for appends.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if replay.discarded > 0 {
            tracing::warn!(
                "{}: discarding {} trailing bytes of torn ledger record",
                path.display(),
                replay.discarded
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            synced_len: replay.valid_len,
            pending_len: 0,
            pending_records: 0,
            appends_since_compact: 0,
            poisoned: false,
            #[cfg(test)]
            fault: None,
        };
        Ok((wal, replay.events))
    }

    /// Buffer one event. Nothing is durable until `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("ledger refused write after an unrecoverable failure"));
        }
        let record = frame(event)?;
        #[cfg(test)]
        self.inject_torn_write(&record)?;
        self.writer.write_all(&record)?;
        self.pending_len += record.len() as u64;
        self.pending_records += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        #[cfg(test)]
        self.inject_flush_failure()?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.pending_len;
        self.appends_since_compact += self.pending_records;
        self.pending_len = 0;
        self.pending_records = 0;
        Ok(())
    }

    /// Append `events` and fsync them as one unit. On failure the file is cut
    /// back to its last synced length, so none of them survive a restart.
    pub fn commit<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        let result = events
            .into_iter()
            .try_for_each(|event| self.append_buffered(event))
            .and_then(|()| self.flush_sync());
        if result.is_err() {
            self.roll_back();
        }
        result
    }

    fn roll_back(&mut self) {
        let dropped = self.pending_records;
        match self.discard_unsynced() {
            Ok(()) => tracing::warn!(
                "{}: rolled back {dropped} unsynced ledger records",
                self.path.display()
            ),
            Err(e) => {
                self.poisoned = true;
                tracing::error!(
                    "{}: cannot roll back failed write, refusing further appends: {e}",
                    self.path.display()
                );
            }
        }
    }

    fn discard_unsynced(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // Whatever the old writer still buffers is dropped, not flushed.
        let _ = stale.into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.synced_len)?;
        file.sync_all()?;
        self.pending_len = 0;
        self.pending_records = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    #[cfg(test)]
    fn inject_torn_write(&mut self, record: &[u8]) -> io::Result<()> {
        if self.fault != Some(Fault::TornWrite) {
            return Ok(());
        }
        self.fault = None;
        self.writer.write_all(&record[..record.len() / 2])?;
        self.writer.flush()?;
        Err(io::Error::other("injected torn write"))
    }

    #[cfg(test)]
    fn inject_flush_failure(&mut self) -> io::Result<()> {
        if self.fault != Some(Fault::Flush) {
            return Ok(());
        }
        self.fault = None;
        Err(io::Error::other("injected flush failure"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write `events` as a fresh ledger beside `path` and fsync it.
    pub fn write_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::snapshot_path(path))?);
        for event in events {
            writer.write_all(&frame(event)?)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Move the snapshot over the live ledger and continue appending to it.
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        self.flush_sync()?;
        fs::rename(Self::snapshot_path(&self.path), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}
