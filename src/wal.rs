use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_WAL_RECORD_LEN;
use crate::model::Event;

/// Every log file starts with these bytes.
const MAGIC: &[u8; 8] = b"WASHWAL1";

fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Reads one record and its size on disk. `Ok(None)` marks the end of the
/// usable log: clean EOF, a torn tail, a bad checksum or an undecodable payload.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_WAL_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_or_eof(reader, &mut payload)? || !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let size = (len + 8) as u64;
    Ok(bincode::deserialize(&payload).ok().map(|event| (event, size)))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
        file.write_all(MAGIC)?;
        file.sync_all()?;
    }
    Ok(BufWriter::new(file))
}

/// Append-only event log for one laundry.
///
/// Layout: the 8-byte magic, then records of
/// `[u32 le: len][bincode: Event][u32 le: crc32 of payload]`.
/// A crash mid-append leaves a torn tail that replay drops.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: open_for_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer one event; durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write a sibling file, fsync, rename over.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            tmp.write_all(MAGIC)?;
            for event in events {
                write_record(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        self.writer.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        self.writer = open_for_append(&self.path)?;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// All intact events in the log. A missing file is an empty log; a file
    /// with a foreign header is refused.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.events)
    }

    /// Replay the log, cut off anything after the last intact record, and
    /// open it for appending. New records always follow a valid prefix.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let Scan { events, valid_len } = scan(path)?;
        match fs::metadata(path) {
            Ok(meta) if meta.len() > valid_len => {
                tracing::warn!(
                    "{}: dropping {} bytes after the last intact record",
                    path.display(),
                    meta.len() - valid_len
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok((Self::open(path)?, events))
    }
}

struct Scan {
    events: Vec<Event>,
    /// Bytes up to the end of the last intact record.
    valid_len: u64,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let empty = Scan { events: Vec::new(), valid_len: 0 };
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(empty),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut header = [0u8; 8];
    if !read_or_eof(&mut reader, &mut header)? {
        return Ok(empty);
    }
    if &header != MAGIC {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("{} is not a washbook log", path.display()),
        ));
    }
    let mut scan = Scan { events: Vec::new(), valid_len: MAGIC.len() as u64 };
    while let Some((event, size)) = read_record(&mut reader)? {
        scan.events.push(event);
        scan.valid_len += size;
    }
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::household::HouseholdColor;
    use crate::model::{Span, WashDuration};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("washbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn sample_events() -> Vec<Event> {
        let household = Ulid::new();
        vec![
            Event::HouseholdRegistered {
                id: household,
                name: "1. th".into(),
                color: HouseholdColor::Red,
                at: 1,
            },
            Event::ReservationCreated {
                id: Ulid::new(),
                user_id: household,
                span: Span::new(1000, 2000),
                duration: WashDuration::OneHour,
                at: 2,
            },
        ]
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = sample_events();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 2);
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn missing_file_replays_empty() {
        let path = tmp_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn reopen_does_not_repeat_header() {
        let path = tmp_path("reopen.wal");
        let events = sample_events();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&events[0]).unwrap();
        }
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&events[1]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn.wal");
        let events = sample_events();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        assert_eq!(Wal::replay(&path).unwrap(), events[..1].to_vec());
    }

    #[test]
    fn appends_after_torn_tail_survive_next_replay() {
        let path = tmp_path("torn_then_append.wal");
        let events = sample_events();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&events[0]).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[9, 0, 0]).unwrap();
        drop(file);

        {
            let (mut wal, replayed) = Wal::recover(&path).unwrap();
            assert_eq!(replayed, events[..1].to_vec());
            wal.append(&events[1]).unwrap();
        }

        let (_, replayed) = Wal::recover(&path).unwrap();
        assert_eq!(replayed, events);
    }

    #[test]
    fn torn_header_is_reset() {
        let path = tmp_path("torn_header.wal");
        fs::write(&path, &MAGIC[..3]).unwrap();
        let events = sample_events();
        {
            let (mut wal, replayed) = Wal::recover(&path).unwrap();
            assert!(replayed.is_empty());
            wal.append(&events[0]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events[..1].to_vec());
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let events = sample_events();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert_eq!(Wal::replay(&path).unwrap().len(), 1);
    }

    #[test]
    fn foreign_header_refused() {
        let path = tmp_path("foreign.wal");
        fs::write(&path, b"NOTAWASHLOG").unwrap();
        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn rewrite_replaces_contents() {
        let path = tmp_path("rewrite.wal");
        let events = sample_events();
        let mut wal = Wal::open(&path).unwrap();
        for e in &events {
            wal.append(e).unwrap();
        }
        wal.rewrite(&events[..1]).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);

        let extra = Event::ReservationsPurged { before: 5 };
        wal.append(&extra).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![events[0].clone(), extra]);
    }
}
