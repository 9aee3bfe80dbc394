use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use super::meta::TableMeta;
use crate::error::{Error, Result};

const FLUSH: u8 = 0x01;
const SNAPSHOT: u8 = 0x02;

/// One atomic change to the durable version state.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionEdit {
    /// A memtable batch was materialized as `table`. Write-ahead logs with
    /// ids at or below `log_seq` are obsolete once this edit is durable.
    Flush {
        seq: u64,
        log_seq: u64,
        table: TableMeta,
    },

    /// Full-state checkpoint; edits at or before `seq` are superseded.
    Snapshot {
        seq: u64,
        tables: Vec<TableMeta>,
        next_file_number: u64,
    },
}

impl VersionEdit {
    pub fn seq(&self) -> u64 {
        match self {
            VersionEdit::Flush { seq, .. } | VersionEdit::Snapshot { seq, .. } => *seq,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            VersionEdit::Flush {
                seq,
                log_seq,
                table,
            } => {
                buf.write_u8(FLUSH).unwrap();
                buf.write_u64::<BigEndian>(*seq).unwrap();
                buf.write_u64::<BigEndian>(*log_seq).unwrap();
                table.encode_into(&mut buf);
            }

            VersionEdit::Snapshot {
                seq,
                tables,
                next_file_number,
            } => {
                buf.write_u8(SNAPSHOT).unwrap();
                buf.write_u64::<BigEndian>(*seq).unwrap();
                buf.write_u64::<BigEndian>(*next_file_number).unwrap();

                buf.write_u32::<BigEndian>(tables.len() as u32).unwrap();
                for table in tables {
                    table.encode_into(&mut buf);
                }
            }
        }

        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        let edit_type = cursor.read_u8()?;

        match edit_type {
            FLUSH => {
                let seq = cursor.read_u64::<BigEndian>()?;
                let log_seq = cursor.read_u64::<BigEndian>()?;
                let table = TableMeta::decode_from(&mut cursor)?;
                Ok(VersionEdit::Flush {
                    seq,
                    log_seq,
                    table,
                })
            }

            SNAPSHOT => {
                let seq = cursor.read_u64::<BigEndian>()?;
                let next_file_number = cursor.read_u64::<BigEndian>()?;

                let table_count = cursor.read_u32::<BigEndian>()? as usize;
                let mut tables = Vec::with_capacity(table_count);
                for _ in 0..table_count {
                    tables.push(TableMeta::decode_from(&mut cursor)?);
                }

                Ok(VersionEdit::Snapshot {
                    seq,
                    tables,
                    next_file_number,
                })
            }

            _ => Err(Error::InvalidData(format!(
                "invalid edit type: {}",
                edit_type
            ))),
        }
    }
}
