use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 64;
const MAGIC: &[u8; 8] = b"EMBERDB\0";
const VERSION: u32 = 1;
const DEFAULT_SNAPSHOT_INTERVAL: u32 = 100;

#[derive(Debug, Clone)]
pub struct ManifestHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub current_seq: u64,
    pub next_file_number: u64,
    pub snapshot_interval: u32,
}

impl Default for ManifestHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestHeader {
    pub fn new() -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            current_seq: 0,
            next_file_number: 0,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != *MAGIC {
            return Err(Error::InvalidData(
                "invalid manifest magic number".to_string(),
            ));
        }
        if self.version != VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported manifest version: {}",
                self.version
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        (&mut buf[8..12])
            .write_u32::<BigEndian>(self.version)
            .unwrap();
        (&mut buf[12..20])
            .write_u64::<BigEndian>(self.current_seq)
            .unwrap();
        (&mut buf[20..28])
            .write_u64::<BigEndian>(self.next_file_number)
            .unwrap();
        (&mut buf[28..32])
            .write_u32::<BigEndian>(self.snapshot_interval)
            .unwrap();
        buf
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut cursor = Cursor::new(&buf[..]);

        let mut magic = [0u8; 8];
        cursor.read_exact(&mut magic)?;

        let version = cursor.read_u32::<BigEndian>()?;
        let current_seq = cursor.read_u64::<BigEndian>()?;
        let next_file_number = cursor.read_u64::<BigEndian>()?;
        let snapshot_interval = cursor.read_u32::<BigEndian>()?;

        let header = Self {
            magic,
            version,
            current_seq,
            next_file_number,
            snapshot_interval,
        };
        header.validate()?;
        Ok(header)
    }
}
