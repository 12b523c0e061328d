//! # Write-Ahead Log
//!
//! Append-only log providing durability for page mutations. Every change
//! that must survive a crash is appended (and synced) here before it is
//! applied to a data page; recovery replays the tail of this log.
//!
//! ## File Format
//!
//! ```text
//! +--------------------------+
//! | WalFileHeader (24 bytes) |  magic, version, first_lsn, checkpoint_lsn
//! +--------------------------+
//! | WalRecord 0              |  32-byte header + payload
//! | WalRecord 1              |
//! | ...                      |
//! +--------------------------+
//! ```
//!
//! Record header layout (32 bytes):
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  ------------------------------------
//! 0       8     lsn        Log sequence number (monotone)
//! 8       4     length     Total record length including header
//! 12      4     crc32      CRC-32 of the payload
//! 16      1     type       WalRecordType
//! 17      3     reserved
//! 20      4     table_id   Target table
//! 24      4     page_id    Target page
//! 28      2     slot_id    Target slot
//! 30      2     padding
//! ```
//!
//! ## Read Protocol
//!
//! The scan reads a 32-byte header, bounds-checks `length`, reads the
//! payload, and verifies the CRC. Any failure — short read, out-of-range
//! length, checksum mismatch — is treated as end-of-valid-data, not an
//! error. This is how a torn tail after a crash is handled: everything
//! before the tear replays, the tear and everything after it is discarded.
//!
//! A corrupted *file header* is different: that is fatal at open time.
//!
//! ## Concurrency
//!
//! One mutex serializes appends and header updates; `read_all`/`read_from`
//! use a separate positional read handle so scans never disturb the append
//! cursor.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_32_ISO_HDLC};
use eyre::{bail, ensure, Result, WrapErr};
use parking_lot::Mutex;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    MAX_WAL_RECORD_SIZE, WAL_FILE_HEADER_SIZE, WAL_MAGIC, WAL_RECORD_HEADER_SIZE, WAL_VERSION,
};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Offset of `last_checkpoint_lsn` within the file header.
const CHECKPOINT_LSN_OFFSET: u64 = 16;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalRecordType {
    Insert = 1,
    Update = 2,
    Delete = 3,
    CreateTable = 4,
    DropTable = 5,
    Checkpoint = 6,
    Commit = 7,
    Rollback = 8,
}

impl WalRecordType {
    pub fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            1 => WalRecordType::Insert,
            2 => WalRecordType::Update,
            3 => WalRecordType::Delete,
            4 => WalRecordType::CreateTable,
            5 => WalRecordType::DropTable,
            6 => WalRecordType::Checkpoint,
            7 => WalRecordType::Commit,
            8 => WalRecordType::Rollback,
            _ => bail!("unknown WAL record type: {:#04x}", b),
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct WalRecordHeader {
    lsn: U64,
    length: U32,
    crc32: U32,
    record_type: u8,
    reserved: [u8; 3],
    table_id: U32,
    page_id: U32,
    slot_id: U16,
    padding: U16,
}

const _: () = assert!(std::mem::size_of::<WalRecordHeader>() == WAL_RECORD_HEADER_SIZE);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct WalFileHeader {
    magic: U32,
    version: U32,
    first_lsn: U64,
    last_checkpoint_lsn: U64,
}

const _: () = assert!(std::mem::size_of::<WalFileHeader>() == WAL_FILE_HEADER_SIZE);

impl WalFileHeader {
    fn new() -> Self {
        Self {
            magic: U32::new(WAL_MAGIC),
            version: U32::new(WAL_VERSION),
            first_lsn: U64::new(1),
            last_checkpoint_lsn: U64::new(0),
        }
    }

    fn is_valid(&self) -> bool {
        self.magic.get() == WAL_MAGIC && self.version.get() == WAL_VERSION
    }
}

/// A log record: routing fields plus an opaque payload. The LSN, length and
/// CRC are stamped by [`Wal::append`]; values set by the caller are
/// overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub lsn: u64,
    pub record_type: WalRecordType,
    pub table_id: u32,
    pub page_id: u32,
    pub slot_id: u16,
    pub payload: Vec<u8>,
}

impl WalRecord {
    pub fn new(
        record_type: WalRecordType,
        table_id: u32,
        page_id: u32,
        slot_id: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            lsn: 0,
            record_type,
            table_id,
            page_id,
            slot_id,
            payload,
        }
    }

    pub fn insert(table_id: u32, page_id: u32, slot_id: u16, payload: Vec<u8>) -> Self {
        Self::new(WalRecordType::Insert, table_id, page_id, slot_id, payload)
    }

    pub fn update(table_id: u32, page_id: u32, slot_id: u16, payload: Vec<u8>) -> Self {
        Self::new(WalRecordType::Update, table_id, page_id, slot_id, payload)
    }

    pub fn delete(table_id: u32, page_id: u32, slot_id: u16) -> Self {
        Self::new(WalRecordType::Delete, table_id, page_id, slot_id, Vec::new())
    }

    pub fn create_table(table_id: u32, name: &str) -> Self {
        Self::new(
            WalRecordType::CreateTable,
            table_id,
            0,
            0,
            name.as_bytes().to_vec(),
        )
    }

    pub fn drop_table(table_id: u32, name: &str) -> Self {
        Self::new(
            WalRecordType::DropTable,
            table_id,
            0,
            0,
            name.as_bytes().to_vec(),
        )
    }

    pub fn checkpoint() -> Self {
        Self::new(WalRecordType::Checkpoint, 0, 0, 0, Vec::new())
    }

    pub fn commit() -> Self {
        Self::new(WalRecordType::Commit, 0, 0, 0, Vec::new())
    }

    pub fn rollback() -> Self {
        Self::new(WalRecordType::Rollback, 0, 0, 0, Vec::new())
    }

    pub fn serialized_size(&self) -> usize {
        WAL_RECORD_HEADER_SIZE + self.payload.len()
    }
}

struct WalInner {
    file: File,
    next_lsn: u64,
    last_checkpoint_lsn: u64,
}

pub struct Wal {
    path: PathBuf,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Opens an existing WAL (validating the file header and seating the
    /// next-LSN cursor past the highest durable record) or creates a fresh
    /// one. A present-but-corrupt file header is fatal.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let exists = path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open WAL at {:?}", path))?;

        let (next_lsn, last_checkpoint_lsn) = if exists && file_len(&file)? > 0 {
            let header = read_file_header(&mut file)
                .wrap_err_with(|| format!("unreadable WAL file header at {:?}", path))?;
            ensure!(
                header.is_valid(),
                "corrupt WAL file header at {:?} (magic {:#010x}, version {})",
                path,
                header.magic.get(),
                header.version.get()
            );

            let (max_lsn, valid_end) = scan_valid_records(&mut file)?;

            // Discard any torn or corrupt tail so future appends land
            // where the read path can reach them.
            if valid_end < file_len(&file)? {
                file.set_len(valid_end)
                    .wrap_err("failed to truncate torn WAL tail")?;
                file.sync_data()
                    .wrap_err("failed to sync WAL after tail truncation")?;
            }

            (max_lsn + 1, header.last_checkpoint_lsn.get())
        } else {
            let header = WalFileHeader::new();
            file.seek(SeekFrom::Start(0))
                .wrap_err("failed to seek to WAL header")?;
            file.write_all(header.as_bytes())
                .wrap_err("failed to write WAL file header")?;
            file.sync_data().wrap_err("failed to sync new WAL header")?;
            (1, 0)
        };

        Ok(Self {
            path,
            inner: Mutex::new(WalInner {
                file,
                next_lsn,
                last_checkpoint_lsn,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The LSN the next appended record will receive.
    pub fn current_lsn(&self) -> u64 {
        self.inner.lock().next_lsn
    }

    pub fn last_checkpoint_lsn(&self) -> u64 {
        self.inner.lock().last_checkpoint_lsn
    }

    /// Appends `record`, stamping its LSN, length and payload CRC. Returns
    /// the assigned LSN. The write is buffered by the OS until [`Wal::sync`].
    pub fn append(&self, record: &WalRecord) -> Result<u64> {
        ensure!(
            record.serialized_size() <= MAX_WAL_RECORD_SIZE,
            "WAL record of {} bytes exceeds the {} byte limit",
            record.serialized_size(),
            MAX_WAL_RECORD_SIZE
        );

        let mut inner = self.inner.lock();
        let lsn = inner.next_lsn;

        let header = WalRecordHeader {
            lsn: U64::new(lsn),
            length: U32::new(record.serialized_size() as u32),
            crc32: U32::new(CRC32.checksum(&record.payload)),
            record_type: record.record_type as u8,
            reserved: [0; 3],
            table_id: U32::new(record.table_id),
            page_id: U32::new(record.page_id),
            slot_id: U16::new(record.slot_id),
            padding: U16::new(0),
        };

        let mut buf = Vec::with_capacity(record.serialized_size());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&record.payload);

        inner
            .file
            .seek(SeekFrom::End(0))
            .wrap_err("failed to seek to WAL end")?;
        inner
            .file
            .write_all(&buf)
            .wrap_err("failed to append WAL record")?;

        inner.next_lsn = lsn + 1;
        Ok(lsn)
    }

    /// Flushes appended records to stable storage.
    pub fn sync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_data().wrap_err("failed to fsync WAL")
    }

    /// Appends a CHECKPOINT marker and persists its LSN into the file
    /// header. Returns the checkpoint LSN.
    pub fn checkpoint(&self) -> Result<u64> {
        let lsn = self.append(&WalRecord::checkpoint())?;

        let mut inner = self.inner.lock();
        inner.last_checkpoint_lsn = lsn;
        inner
            .file
            .seek(SeekFrom::Start(CHECKPOINT_LSN_OFFSET))
            .wrap_err("failed to seek to WAL checkpoint field")?;
        inner
            .file
            .write_all(&lsn.to_le_bytes())
            .wrap_err("failed to persist checkpoint LSN")?;
        Ok(lsn)
    }

    /// Reads every valid record in order.
    pub fn read_all(&self) -> Result<Vec<WalRecord>> {
        self.read_from(1)
    }

    /// Reads, in order, every valid record with `lsn >= start_lsn`.
    /// Truncated or corrupted tails end the scan cleanly.
    pub fn read_from(&self, start_lsn: u64) -> Result<Vec<WalRecord>> {
        let mut file = File::open(&self.path)
            .wrap_err_with(|| format!("failed to open WAL for reading at {:?}", self.path))?;
        file.seek(SeekFrom::Start(WAL_FILE_HEADER_SIZE as u64))
            .wrap_err("failed to seek past WAL file header")?;

        let mut records = Vec::new();
        let mut header_buf = [0u8; WAL_RECORD_HEADER_SIZE];

        loop {
            if read_exact_or_eof(&mut file, &mut header_buf)?.is_none() {
                break;
            }
            let header = WalRecordHeader::ref_from_bytes(&header_buf)
                .expect("WAL record header layout"); // INVARIANT: buffer is exactly WAL_RECORD_HEADER_SIZE and the struct is Unaligned

            let length = header.length.get() as usize;
            if !(WAL_RECORD_HEADER_SIZE..=MAX_WAL_RECORD_SIZE).contains(&length) {
                break;
            }

            let mut payload = vec![0u8; length - WAL_RECORD_HEADER_SIZE];
            if read_exact_or_eof(&mut file, &mut payload)?.is_none() {
                break;
            }

            if CRC32.checksum(&payload) != header.crc32.get() {
                break;
            }
            let Ok(record_type) = WalRecordType::from_byte(header.record_type) else {
                break;
            };

            if header.lsn.get() >= start_lsn {
                records.push(WalRecord {
                    lsn: header.lsn.get(),
                    record_type,
                    table_id: header.table_id.get(),
                    page_id: header.page_id.get(),
                    slot_id: header.slot_id.get(),
                    payload,
                });
            }
        }

        Ok(records)
    }

    pub fn file_size(&self) -> Result<u64> {
        let inner = self.inner.lock();
        file_len(&inner.file)
    }
}

fn file_len(file: &File) -> Result<u64> {
    Ok(file.metadata().wrap_err("failed to stat WAL file")?.len())
}

fn read_file_header(file: &mut File) -> Result<WalFileHeader> {
    let mut buf = [0u8; WAL_FILE_HEADER_SIZE];
    file.seek(SeekFrom::Start(0))
        .wrap_err("failed to seek to WAL header")?;
    file.read_exact(&mut buf)
        .wrap_err("failed to read WAL file header")?;
    Ok(WalFileHeader::read_from_bytes(&buf)
        .expect("WAL file header layout")) // INVARIANT: buffer is exactly WAL_FILE_HEADER_SIZE and the struct is Unaligned
}

/// Scans records front to back, verifying each one the way the read path
/// does (length bounds, full payload, CRC). Returns the highest valid LSN
/// and the byte offset just past the last valid record.
fn scan_valid_records(file: &mut File) -> Result<(u64, u64)> {
    file.seek(SeekFrom::Start(WAL_FILE_HEADER_SIZE as u64))
        .wrap_err("failed to seek past WAL file header")?;

    let mut max_lsn = 0u64;
    let mut valid_end = WAL_FILE_HEADER_SIZE as u64;
    let mut header_buf = [0u8; WAL_RECORD_HEADER_SIZE];

    loop {
        if read_exact_or_eof(file, &mut header_buf)?.is_none() {
            break;
        }
        let header = WalRecordHeader::ref_from_bytes(&header_buf)
            .expect("WAL record header layout"); // INVARIANT: buffer is exactly WAL_RECORD_HEADER_SIZE and the struct is Unaligned

        let length = header.length.get() as usize;
        if !(WAL_RECORD_HEADER_SIZE..=MAX_WAL_RECORD_SIZE).contains(&length) {
            break;
        }

        let mut payload = vec![0u8; length - WAL_RECORD_HEADER_SIZE];
        if read_exact_or_eof(file, &mut payload)?.is_none() {
            break;
        }
        if CRC32.checksum(&payload) != header.crc32.get() {
            break;
        }

        max_lsn = max_lsn.max(header.lsn.get());
        valid_end += length as u64;
    }

    Ok((max_lsn, valid_end))
}

/// `Ok(Some(()))` on a full read, `Ok(None)` on EOF (including a partial
/// tail), `Err` on a real I/O failure.
fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<Option<()>> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => return Ok(None),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).wrap_err("failed to read WAL"),
        }
    }
    Ok(Some(()))
}
