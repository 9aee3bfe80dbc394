use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::error::Result;

/// Metadata describing one flushed table artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub id: u64,
    pub size: u64,
    pub entry_count: u64,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
}

impl TableMeta {
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_u64::<BigEndian>(self.id).unwrap();
        buf.write_u64::<BigEndian>(self.size).unwrap();
        buf.write_u64::<BigEndian>(self.entry_count).unwrap();

        buf.write_u32::<BigEndian>(self.smallest_key.len() as u32)
            .unwrap();
        buf.extend_from_slice(&self.smallest_key);

        buf.write_u32::<BigEndian>(self.largest_key.len() as u32)
            .unwrap();
        buf.extend_from_slice(&self.largest_key);
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let id = cursor.read_u64::<BigEndian>()?;
        let size = cursor.read_u64::<BigEndian>()?;
        let entry_count = cursor.read_u64::<BigEndian>()?;

        let smallest_key_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut smallest_key = vec![0u8; smallest_key_len];
        cursor.read_exact(&mut smallest_key)?;

        let largest_key_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut largest_key = vec![0u8; largest_key_len];
        cursor.read_exact(&mut largest_key)?;

        Ok(TableMeta {
            id,
            size,
            entry_count,
            smallest_key,
            largest_key,
        })
    }
}
