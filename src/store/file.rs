//! The store's journal on disk.
//!
//! Records are `[u32 len][bincode StoreEvent][u32 crc32]`, little endian,
//! back to back. Only the tail can be damaged (a crash mid-append); opening
//! the journal cuts a damaged tail off so later appends stay readable.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::StoreEvent;

/// No single store mutation comes near this; a larger length prefix is garbage.
const MAX_RECORD_BYTES: u32 = 16 * 1024 * 1024;

/// Why replay stopped before the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TailDamage {
    /// The file ends inside a record.
    Truncated,
    /// Checksum mismatch or an impossible length.
    Corrupt,
    /// Checksum matched but the payload is not a `StoreEvent`.
    Undecodable,
}

/// Result of reading a journal from the start.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    pub events: Vec<StoreEvent>,
    /// Length of the prefix holding `events`.
    pub intact_bytes: u64,
    pub damage: Option<TailDamage>,
}

enum Frame {
    Record { event: StoreEvent, bytes: u64 },
    End,
    Damaged(TailDamage),
}

/// Read until `buf` is full or the file ends. Returns bytes read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    match fill(reader, &mut len_buf)? {
        0 => return Ok(Frame::End),
        4 => {}
        _ => return Ok(Frame::Damaged(TailDamage::Truncated)),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_RECORD_BYTES {
        return Ok(Frame::Damaged(TailDamage::Corrupt));
    }

    let mut payload = vec![0u8; len as usize];
    if fill(reader, &mut payload)? < payload.len() {
        return Ok(Frame::Damaged(TailDamage::Truncated));
    }
    let mut crc_buf = [0u8; 4];
    if fill(reader, &mut crc_buf)? < crc_buf.len() {
        return Ok(Frame::Damaged(TailDamage::Truncated));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Damaged(TailDamage::Corrupt));
    }
    Ok(match bincode::deserialize::<StoreEvent>(&payload) {
        Ok(event) => Frame::Record {
            event,
            bytes: 8 + u64::from(len),
        },
        Err(_) => Frame::Damaged(TailDamage::Undecodable),
    })
}

fn write_frame(writer: &mut impl Write, event: &StoreEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_BYTES)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "journal record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Append handle on a journal file. Owned by the journal writer task.
pub(crate) struct JournalFile {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl JournalFile {
    /// Read the journal at `path`, cut off any damaged tail and open it for
    /// appending. A missing file (and its directory) is created.
    pub fn recover(path: &Path) -> io::Result<(Self, Replay)> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let replay = Self::replay(path)?;
        if let Some(damage) = replay.damage {
            tracing::warn!(
                path = %path.display(),
                ?damage,
                kept = replay.events.len(),
                kept_bytes = replay.intact_bytes,
                "journal tail discarded"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.intact_bytes)?;
            file.sync_all()?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let journal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((journal, replay))
    }

    /// Every intact record of the journal at `path`, without modifying it.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        loop {
            match read_frame(&mut reader)? {
                Frame::Record { event, bytes } => {
                    replay.events.push(event);
                    replay.intact_bytes += bytes;
                }
                Frame::End => break,
                Frame::Damaged(damage) => {
                    replay.damage = Some(damage);
                    break;
                }
            }
        }
        Ok(replay)
    }

    /// Buffer one record. Nothing is durable until [`sync`](Self::sync).
    pub fn append(&mut self, event: &StoreEvent) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Replace the journal with `events`: written and fsynced beside the live
    /// file, then renamed over it.
    pub fn rewrite(&mut self, events: &[StoreEvent]) -> io::Result<()> {
        let tmp = self.path.with_extension("journal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for event in events {
                write_frame(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn journal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("bookdesk_test_journal_file");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn venue_saved(name: &str) -> StoreEvent {
        StoreEvent::VenueSaved(Venue {
            id: VenueId::new(),
            name: name.into(),
        })
    }

    fn write_all(path: &Path, events: &[StoreEvent]) {
        let (mut journal, _) = JournalFile::recover(path).unwrap();
        for event in events {
            journal.append(event).unwrap();
        }
        journal.sync().unwrap();
    }

    #[test]
    fn recover_returns_synced_records() {
        let path = journal_path("synced.journal");
        let events = vec![venue_saved("Gymnasium"), venue_saved("Chapel")];
        write_all(&path, &events);

        let (journal, replay) = JournalFile::recover(&path).unwrap();
        assert_eq!(replay.events, events);
        assert_eq!(replay.damage, None);
        assert_eq!(replay.intact_bytes, fs::metadata(&path).unwrap().len());
        assert_eq!(journal.appends_since_compact(), 0);
    }

    #[test]
    fn missing_journal_is_created_empty() {
        let path = journal_path("nested/fresh.journal");
        let _ = fs::remove_dir_all(path.parent().unwrap());
        let (_, replay) = JournalFile::recover(&path).unwrap();
        assert!(replay.events.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn torn_tail_is_cut_so_later_appends_survive() {
        let path = journal_path("torn.journal");
        let first = venue_saved("Chapel");
        write_all(&path, std::slice::from_ref(&first));
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        assert_eq!(JournalFile::replay(&path).unwrap().damage, Some(TailDamage::Truncated));

        let late = venue_saved("Auditorium");
        {
            let (mut journal, replay) = JournalFile::recover(&path).unwrap();
            assert_eq!(replay.events, vec![first.clone()]);
            journal.append(&late).unwrap();
            journal.sync().unwrap();
        }
        let replay = JournalFile::replay(&path).unwrap();
        assert_eq!(replay.events, vec![first, late]);
        assert_eq!(replay.damage, None);
    }

    #[test]
    fn checksum_mismatch_is_corrupt() {
        let path = journal_path("bad_crc.journal");
        let event = StoreEvent::ReservationDeleted {
            id: ReservationId::new(),
        };
        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        let replay = JournalFile::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.damage, Some(TailDamage::Corrupt));
    }

    #[test]
    fn absurd_length_is_corrupt_not_allocated() {
        let path = journal_path("huge_len.journal");
        fs::write(&path, u32::MAX.to_le_bytes()).unwrap();
        assert_eq!(JournalFile::replay(&path).unwrap().damage, Some(TailDamage::Corrupt));
    }

    #[test]
    fn foreign_payload_is_undecodable() {
        let path = journal_path("foreign.journal");
        let payload = [0xFFu8; 4];
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&crc32fast::hash(&payload).to_le_bytes()).unwrap();
        }
        assert_eq!(JournalFile::replay(&path).unwrap().damage, Some(TailDamage::Undecodable));
    }

    #[test]
    fn rewrite_shrinks_and_resets_the_counter() {
        let path = journal_path("rewrite.journal");
        let keep = venue_saved("Function Hall");
        let (mut journal, _) = JournalFile::recover(&path).unwrap();
        journal.append(&keep).unwrap();
        for i in 0..10 {
            journal.append(&venue_saved(&format!("Scratch {i}"))).unwrap();
        }
        journal.sync().unwrap();
        assert_eq!(journal.appends_since_compact(), 11);
        let before = fs::metadata(&path).unwrap().len();

        journal.rewrite(std::slice::from_ref(&keep)).unwrap();
        assert_eq!(journal.appends_since_compact(), 0);
        let late = venue_saved("Quadrangle");
        journal.append(&late).unwrap();
        journal.sync().unwrap();

        assert!(fs::metadata(&path).unwrap().len() < before);
        assert_eq!(JournalFile::replay(&path).unwrap().events, vec![keep, late]);
    }
}
