// Copyright 2025 vista Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::Read;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use twox_hash::XxHash64;
use vista_common::error::{Error, ErrorKind, Result};

/// Magic bytes leading every entry file.
pub const MAGIC: &[u8; 4] = b"VSTA";
/// Current entry file version.
pub const VERSION: u8 = 1;

const MAX_KEY_LEN: usize = 64 * 1024;

/// magic (4B) | version (1B) | key len (4B)
const PREFIX_LEN: usize = 4 + 1 + 4;
/// payload len (8B) | checksum (8B)
const SUFFIX_LEN: usize = 8 + 8;

#[derive(Debug)]
pub struct Checksummer;

impl Checksummer {
    pub fn checksum64(buf: &[u8]) -> u64 {
        XxHash64::oneshot(0, buf)
    }
}

/// Header of an entry file.
///
/// ```plain
/// | magic | version | key len | key | payload len | checksum | payload |
/// ```
///
/// Integers are little endian. The checksum covers the payload only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub key: String,
    pub payload_len: usize,
    pub checksum: u64,
}

impl EntryHeader {
    pub fn encoded_len(&self) -> usize {
        PREFIX_LEN + self.key.len() + SUFFIX_LEN
    }

    /// Length of the whole entry file described by the header.
    ///
    /// `available` is the number of bytes actually present, a payload length beyond it is rejected.
    pub fn entry_len(&self, available: u64) -> Result<usize> {
        let mismatch = || {
            Error::new(ErrorKind::Codec, "entry length mismatch")
                .with_context("payload_len", self.payload_len)
                .with_context("get", available)
        };
        if self.payload_len as u64 > available {
            return Err(mismatch());
        }
        let len = self.encoded_len().checked_add(self.payload_len).ok_or_else(mismatch)?;
        if len as u64 != available {
            return Err(mismatch());
        }
        Ok(len)
    }

    /// Serialize a whole entry file.
    pub fn serialize(key: &str, payload: &[u8]) -> Bytes {
        let header = EntryHeader {
            key: key.to_string(),
            payload_len: payload.len(),
            checksum: Checksummer::checksum64(payload),
        };
        let mut buf = BytesMut::with_capacity(header.encoded_len() + payload.len());
        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u32_le(header.key.len() as u32);
        buf.put_slice(header.key.as_bytes());
        buf.put_u64_le(header.payload_len as u64);
        buf.put_u64_le(header.checksum);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// Read and validate the header only, leaving the reader at the start of the payload.
    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut prefix = [0u8; PREFIX_LEN];
        reader.read_exact(&mut prefix).map_err(truncated)?;
        let mut buf = &prefix[..];

        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        let version = buf.get_u8();
        if &magic != MAGIC || version != VERSION {
            return Err(Error::new(ErrorKind::MagicMismatch, "not a vista entry file")
                .with_context("magic", format!("{magic:?}"))
                .with_context("version", version));
        }

        let key_len = buf.get_u32_le() as usize;
        if key_len > MAX_KEY_LEN {
            return Err(Error::new(ErrorKind::Codec, "entry key too long").with_context("len", key_len));
        }
        let mut key = vec![0u8; key_len];
        reader.read_exact(&mut key).map_err(truncated)?;
        let key = String::from_utf8(key).map_err(|e| Error::new(ErrorKind::Codec, "entry key is not utf-8").with_source(e))?;

        let mut suffix = [0u8; SUFFIX_LEN];
        reader.read_exact(&mut suffix).map_err(truncated)?;
        let mut buf = &suffix[..];
        let payload_len = buf.get_u64_le();
        let payload_len = usize::try_from(payload_len)
            .map_err(|_| Error::new(ErrorKind::Codec, "entry payload too long").with_context("len", payload_len))?;
        let checksum = buf.get_u64_le();

        Ok(Self {
            key,
            payload_len,
            checksum,
        })
    }

    /// Deserialize a whole entry file, verifying the payload checksum.
    pub fn deserialize(buf: Bytes) -> Result<(Self, Bytes)> {
        let header = Self::read_from(&mut buf.as_ref())?;
        let start = header.encoded_len();
        header.entry_len(buf.len() as u64)?;
        let payload = buf.slice(start..);
        let get = Checksummer::checksum64(&payload);
        if get != header.checksum {
            return Err(Error::new(ErrorKind::ChecksumMismatch, "entry payload corrupted")
                .with_context("expected", header.checksum)
                .with_context("get", get));
        }
        Ok((header, payload))
    }
}

fn truncated(e: std::io::Error) -> Error {
    Error::new(ErrorKind::Codec, "entry truncated").with_source(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serde() {
        let buf = EntryHeader::serialize("https://example.com/a.png", b"pixels");
        let (header, payload) = EntryHeader::deserialize(buf.clone()).unwrap();
        assert_eq!(header.key, "https://example.com/a.png");
        assert_eq!(header.payload_len, 6);
        assert_eq!(&payload[..], b"pixels");

        let mut reader = &buf[..];
        assert_eq!(EntryHeader::read_from(&mut reader).unwrap(), header);
        assert_eq!(reader, b"pixels");
    }

    #[test]
    fn test_entry_corruption() {
        let buf = EntryHeader::serialize("k", b"pixels");

        let mut bad = BytesMut::from(&buf[..]);
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        assert_eq!(
            EntryHeader::deserialize(bad.freeze()).unwrap_err().kind(),
            ErrorKind::ChecksumMismatch
        );

        let mut bad = BytesMut::from(&buf[..]);
        bad[0] = b'X';
        assert_eq!(
            EntryHeader::deserialize(bad.freeze()).unwrap_err().kind(),
            ErrorKind::MagicMismatch
        );

        let short = buf.slice(..buf.len() - 2);
        assert_eq!(EntryHeader::deserialize(short).unwrap_err().kind(), ErrorKind::Codec);
        assert_eq!(
            EntryHeader::deserialize(Bytes::from_static(b"VS")).unwrap_err().kind(),
            ErrorKind::Codec
        );
    }

    #[test]
    fn test_entry_oversized_payload_len() {
        let buf = EntryHeader::serialize("k", b"pixels");
        // payload len sits right after magic, version, key len and key
        let offset = PREFIX_LEN + 1;

        for len in [u64::MAX, u64::MAX - 8, buf.len() as u64] {
            let mut bad = BytesMut::from(&buf[..]);
            bad[offset..offset + 8].copy_from_slice(&len.to_le_bytes());
            let bad = bad.freeze();

            assert_eq!(EntryHeader::deserialize(bad.clone()).unwrap_err().kind(), ErrorKind::Codec);
            let header = EntryHeader::read_from(&mut &bad[..]).unwrap();
            assert_eq!(header.entry_len(bad.len() as u64).unwrap_err().kind(), ErrorKind::Codec);
        }
    }
}
