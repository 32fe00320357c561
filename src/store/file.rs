use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use super::{EmbeddingRecord, Records, VectorStore};
use crate::error::StoreError;

/// Largest frame body accepted when reading. Anything above is treated as
/// corruption rather than allocated.
const MAX_FRAME: usize = 64 << 20;
const HEADER: usize = 4;

/// Append-only collection file under a store directory.
///
/// Layout of `<dir>/<collection>.bin`: a sequence of frames, each a `u32`
/// little-endian body length followed by the postcard-encoded record.
pub struct FileStore {
    path: PathBuf,
    writer: File,
    /// Set when a failed append could not be rolled back; the file may end
    /// in a partial frame and further appends would land behind it.
    poisoned: bool,
}

impl FileStore {
    pub fn open(dir: &Path, collection: &str) -> Result<Self, StoreError> {
        if collection.is_empty()
            || collection.contains(['/', '\\'])
            || collection.starts_with('.')
        {
            return Err(StoreError::UnsupportedEndpoint(format!(
                "{} (collection {:?})",
                dir.display(),
                collection
            )));
        }

        let unavailable = |source: io::Error| StoreError::Unavailable {
            endpoint: dir.display().to_string(),
            source,
        };
        fs::create_dir_all(dir).map_err(unavailable)?;

        let path = dir.join(format!("{}.bin", collection));
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(unavailable)?;

        let store = Self {
            path,
            writer,
            poisoned: false,
        };
        store.recover_tail()?;
        log::debug!("opened store collection {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cut off an incomplete final frame left by an interrupted append so
    /// later appends start on a frame boundary.
    ///
    /// An interrupted append leaves a prefix of a single frame. A tail with
    /// room for two of the largest intact frames points at a damaged length
    /// header further up, and is reported instead of truncated.
    fn recover_tail(&self) -> Result<(), StoreError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut offset = 0u64;
        let mut records = 0usize;
        let mut largest = 0u64;
        loop {
            match read_frame(&mut reader, offset)? {
                Frame::Record(_, consumed) => {
                    offset += consumed;
                    records += 1;
                    largest = largest.max(consumed);
                }
                Frame::End => break,
                Frame::Torn => {
                    let total = self.writer.metadata()?.len();
                    let tail = total - offset;
                    if records > 0 && tail >= 2 * largest {
                        return Err(StoreError::Corrupt {
                            offset,
                            reason: format!(
                                "frame runs past end of file with {} byte(s) left, \
                                 too many for one interrupted append",
                                tail
                            ),
                        });
                    }
                    log::warn!(
                        "{}: dropping {} byte(s) of torn tail after {} record(s)",
                        self.path.display(),
                        tail,
                        records
                    );
                    self.writer.set_len(offset)?;
                    self.writer.sync_all()?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Finish an append that started at byte `start`. A failed append is cut
    /// back to `start` so no partial frame is left in front of later ones.
    fn settle_append(&mut self, start: u64, written: io::Result<()>) -> Result<(), StoreError> {
        let Err(e) = written else {
            return Ok(());
        };
        match self
            .writer
            .set_len(start)
            .and_then(|()| self.writer.sync_all())
        {
            Ok(()) => log::warn!(
                "{}: append failed, rolled back to byte {}",
                self.path.display(),
                start
            ),
            Err(undo) => {
                log::error!(
                    "{}: append failed and rollback to byte {} failed too: {}",
                    self.path.display(),
                    start,
                    undo
                );
                self.poisoned = true;
            }
        }
        Err(e.into())
    }
}

impl VectorStore for FileStore {
    fn insert(&mut self, record: EmbeddingRecord) -> Result<(), StoreError> {
        let body = postcard::to_allocvec(&record)?;
        if body.len() > MAX_FRAME {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                format!("record {} is {} bytes", record.identifier, body.len()),
            )));
        }

        if self.poisoned {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::Other,
                format!(
                    "{}: an earlier failed append could not be undone; reopen the store",
                    self.path.display()
                ),
            )));
        }

        let mut frame = Vec::with_capacity(HEADER + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);

        let start = self.writer.metadata()?.len();
        let written = self
            .writer
            .write_all(&frame)
            .and_then(|()| self.writer.sync_data());
        self.settle_append(start, written)
    }

    fn fetch_all(&self) -> Result<Records<'_>, StoreError> {
        let file = File::open(&self.path)?;
        Ok(Box::new(FrameReader {
            path: &self.path,
            reader: BufReader::new(file),
            offset: 0,
            done: false,
        }))
    }

    fn purge(&mut self) -> Result<(), StoreError> {
        self.writer.set_len(0)?;
        self.writer.sync_all()?;
        self.poisoned = false;
        Ok(())
    }
}

enum Frame {
    Record(EmbeddingRecord, u64),
    End,
    Torn,
}

/// Read until `buf` is full or the file ends. Returns the bytes read.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

fn read_frame(reader: &mut impl Read, offset: u64) -> Result<Frame, StoreError> {
    let mut header = [0u8; HEADER];
    match fill(reader, &mut header)? {
        0 => return Ok(Frame::End),
        HEADER => {}
        _ => return Ok(Frame::Torn),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME {
        return Err(StoreError::Corrupt {
            offset,
            reason: format!("frame length {} exceeds {}", len, MAX_FRAME),
        });
    }

    let mut body = vec![0u8; len];
    if fill(reader, &mut body)? < len {
        return Ok(Frame::Torn);
    }

    let record = postcard::from_bytes(&body).map_err(|e| StoreError::Corrupt {
        offset,
        reason: e.to_string(),
    })?;
    Ok(Frame::Record(record, (HEADER + len) as u64))
}

struct FrameReader<'a> {
    path: &'a Path,
    reader: BufReader<File>,
    offset: u64,
    done: bool,
}

impl Iterator for FrameReader<'_> {
    type Item = Result<EmbeddingRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_frame(&mut self.reader, self.offset) {
            Ok(Frame::Record(record, consumed)) => {
                self.offset += consumed;
                Some(Ok(record))
            }
            Ok(Frame::End) => {
                self.done = true;
                None
            }
            Ok(Frame::Torn) => {
                log::warn!(
                    "{}: incomplete frame at byte {}, ending scan",
                    self.path.display(),
                    self.offset
                );
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
