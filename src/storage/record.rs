//! # Record Wire Format
//!
//! A record is a self-describing row: an 8-byte header followed by one
//! tagged value per column.
//!
//! ```text
//! Offset  Size  Field          Description
//! ------  ----  -------------  -----------------------------------
//! 0       4     size           Total record size including header
//! 4       2     column_count   Number of column values
//! 6       2     flags          Record flags (reserved)
//! 8       ...   columns        Per column: 1-byte type tag + payload
//! ```
//!
//! Payload encodings: INTEGER i64 LE, FLOAT f64 LE, BOOLEAN one byte,
//! TEXT/BLOB u32-LE length prefix then bytes, NULL no payload.

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::types::{DataType, Value};

pub const RECORD_HEADER_SIZE: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RecordHeader {
    size: U32,
    column_count: U16,
    flags: U16,
}

const _: () = assert!(std::mem::size_of::<RecordHeader>() == RECORD_HEADER_SIZE);

/// Identifies a row by its physical position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    pub page_id: u32,
    pub slot_id: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn from_values(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    pub fn serialized_size(&self) -> usize {
        let payload: usize = self
            .values
            .iter()
            .map(|v| {
                1 + match v {
                    Value::Null => 0,
                    Value::Integer(_) | Value::Float(_) => 8,
                    Value::Text(s) => 4 + s.len(),
                    Value::Blob(b) => 4 + b.len(),
                    Value::Boolean(_) => 1,
                }
            })
            .sum();
        RECORD_HEADER_SIZE + payload
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let size = self.serialized_size();
        ensure!(
            u32::try_from(size).is_ok() && u16::try_from(self.values.len()).is_ok(),
            "record too large to serialize: {} bytes, {} columns",
            size,
            self.values.len()
        );

        let mut out = Vec::with_capacity(size);
        let header = RecordHeader {
            size: U32::new(size as u32),
            column_count: U16::new(self.values.len() as u16),
            flags: U16::new(0),
        };
        out.extend_from_slice(header.as_bytes());

        for value in &self.values {
            out.push(value.data_type().as_byte());
            match value {
                Value::Null => {}
                Value::Integer(i) => out.extend_from_slice(&i.to_le_bytes()),
                Value::Float(f) => out.extend_from_slice(&f.to_le_bytes()),
                Value::Text(s) => {
                    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                Value::Blob(b) => {
                    out.extend_from_slice(&(b.len() as u32).to_le_bytes());
                    out.extend_from_slice(b);
                }
                Value::Boolean(b) => out.push(*b as u8),
            }
        }

        debug_assert_eq!(out.len(), size);
        Ok(out)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= RECORD_HEADER_SIZE,
            "record truncated: {} bytes is smaller than the header",
            data.len()
        );
        let header = RecordHeader::ref_from_bytes(&data[..RECORD_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse record header: {:?}", e))?;

        ensure!(
            header.size.get() as usize == data.len(),
            "record size mismatch: header says {}, buffer is {}",
            header.size.get(),
            data.len()
        );

        let column_count = header.column_count.get() as usize;
        let mut values = Vec::with_capacity(column_count);
        let mut pos = RECORD_HEADER_SIZE;

        for column in 0..column_count {
            ensure!(pos < data.len(), "record truncated in column {}", column);
            let tag = DataType::from_byte(data[pos])?;
            pos += 1;

            let value = match tag {
                DataType::Null => Value::Null,
                DataType::Integer => {
                    let bytes = read_array::<8>(data, &mut pos, column)?;
                    Value::Integer(i64::from_le_bytes(bytes))
                }
                DataType::Float => {
                    let bytes = read_array::<8>(data, &mut pos, column)?;
                    Value::Float(f64::from_le_bytes(bytes))
                }
                DataType::Text => {
                    let bytes = read_prefixed(data, &mut pos, column)?;
                    let text = std::str::from_utf8(bytes).map_err(|e| {
                        eyre::eyre!("invalid UTF-8 in TEXT column {}: {}", column, e)
                    })?;
                    Value::Text(text.to_string())
                }
                DataType::Blob => {
                    let bytes = read_prefixed(data, &mut pos, column)?;
                    Value::Blob(bytes.to_vec())
                }
                DataType::Boolean => {
                    let bytes = read_array::<1>(data, &mut pos, column)?;
                    Value::Boolean(bytes[0] != 0)
                }
            };
            values.push(value);
        }

        ensure!(
            pos == data.len(),
            "record has {} trailing bytes after column {}",
            data.len() - pos,
            column_count
        );

        Ok(Self { values })
    }
}

fn read_array<const N: usize>(data: &[u8], pos: &mut usize, column: usize) -> Result<[u8; N]> {
    let Some(slice) = data.get(*pos..*pos + N) else {
        bail!("record truncated in column {}", column);
    };
    *pos += N;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

fn read_prefixed<'d>(data: &'d [u8], pos: &mut usize, column: usize) -> Result<&'d [u8]> {
    let len_bytes = read_array::<4>(data, pos, column)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let Some(slice) = data.get(*pos..*pos + len) else {
        bail!("record truncated in column {} payload", column);
    };
    *pos += len;
    Ok(slice)
}
