//! # Catalog Snapshot Persistence
//!
//! The catalog is persisted as a flat binary dump, rewritten atomically
//! (temp file + rename) on every DDL change:
//!
//! ```text
//! u32  table_count
//! u32  next_table_id
//! per table:
//!   u32  id
//!   u32  name_len, name bytes
//!   u32  column_count
//!   u64  row_count
//!   per column:
//!     u32  name_len, name bytes
//!     u8   data type tag
//!     u8   flags (bit0 = not_null, bit1 = primary_key)
//!     u32  index
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;

use crate::types::DataType;

use super::catalog::{Catalog, ColumnDef, TableDef};

const FLAG_NOT_NULL: u8 = 0x01;
const FLAG_PRIMARY_KEY: u8 = 0x02;

/// Writes the catalog snapshot atomically.
pub fn save(catalog: &Catalog, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(catalog.tables().len() as u32).to_le_bytes());
    buf.extend_from_slice(&catalog.next_table_id().to_le_bytes());

    let mut names: Vec<&String> = catalog.tables().keys().collect();
    names.sort();

    for name in names {
        let table = &catalog.tables()[name];
        buf.extend_from_slice(&table.id.to_le_bytes());
        write_string(&mut buf, &table.name);
        buf.extend_from_slice(&(table.columns.len() as u32).to_le_bytes());
        buf.extend_from_slice(&table.row_count.to_le_bytes());

        for column in &table.columns {
            write_string(&mut buf, &column.name);
            buf.push(column.data_type.as_byte());
            let mut flags = 0u8;
            if column.not_null {
                flags |= FLAG_NOT_NULL;
            }
            if column.primary_key {
                flags |= FLAG_PRIMARY_KEY;
            }
            buf.push(flags);
            buf.extend_from_slice(&column.index.to_le_bytes());
        }
    }

    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)
            .wrap_err_with(|| format!("failed to create catalog snapshot {:?}", tmp))?;
        file.write_all(&buf)
            .wrap_err("failed to write catalog snapshot")?;
        file.sync_data()
            .wrap_err("failed to sync catalog snapshot")?;
    }
    fs::rename(&tmp, path)
        .wrap_err_with(|| format!("failed to install catalog snapshot at {:?}", path))?;
    Ok(())
}

/// Loads a snapshot written by [`save`]. A corrupt snapshot is fatal.
pub fn load(path: &Path) -> Result<Catalog> {
    let mut bytes = Vec::new();
    File::open(path)
        .wrap_err_with(|| format!("failed to open catalog snapshot {:?}", path))?
        .read_to_end(&mut bytes)
        .wrap_err("failed to read catalog snapshot")?;

    let mut pos = 0usize;
    let table_count = read_u32(&bytes, &mut pos)?;
    let next_table_id = read_u32(&bytes, &mut pos)?;
    ensure!(next_table_id >= 1, "corrupt catalog: next_table_id is 0");

    let mut tables = HashMap::new();
    for _ in 0..table_count {
        let id = read_u32(&bytes, &mut pos)?;
        ensure!(id != 0, "corrupt catalog: table id 0 is reserved");
        let name = read_string(&bytes, &mut pos)?;
        let column_count = read_u32(&bytes, &mut pos)?;
        let row_count = read_u64(&bytes, &mut pos)?;

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let col_name = read_string(&bytes, &mut pos)?;
            let tag = read_u8(&bytes, &mut pos)?;
            let flags = read_u8(&bytes, &mut pos)?;
            let index = read_u32(&bytes, &mut pos)?;

            let mut column = ColumnDef::new(col_name, DataType::from_byte(tag)?, index);
            column.not_null = flags & FLAG_NOT_NULL != 0;
            column.primary_key = flags & FLAG_PRIMARY_KEY != 0;
            columns.push(column);
        }

        let mut table = TableDef::new(id, name.clone(), columns);
        table.row_count = row_count;
        tables.insert(name, table);
    }

    ensure!(
        pos == bytes.len(),
        "corrupt catalog: {} trailing bytes",
        bytes.len() - pos
    );
    Ok(Catalog::from_parts(tables, next_table_id))
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    let Some(&b) = bytes.get(*pos) else {
        bail!("corrupt catalog: truncated at byte {}", pos);
    };
    *pos += 1;
    Ok(b)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    let Some(slice) = bytes.get(*pos..*pos + 4) else {
        bail!("corrupt catalog: truncated at byte {}", pos);
    };
    *pos += 4;
    Ok(u32::from_le_bytes(slice.try_into().expect("4-byte slice"))) // INVARIANT: slice is exactly 4 bytes
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let Some(slice) = bytes.get(*pos..*pos + 8) else {
        bail!("corrupt catalog: truncated at byte {}", pos);
    };
    *pos += 8;
    Ok(u64::from_le_bytes(slice.try_into().expect("8-byte slice"))) // INVARIANT: slice is exactly 8 bytes
}

fn read_string(bytes: &[u8], pos: &mut usize) -> Result<String> {
    let len = read_u32(bytes, pos)? as usize;
    let Some(slice) = bytes.get(*pos..*pos + len) else {
        bail!("corrupt catalog: truncated string at byte {}", pos);
    };
    *pos += len;
    String::from_utf8(slice.to_vec()).wrap_err("corrupt catalog: non-UTF-8 name")
}
