//! Bitcoin wire framing: magic/command/length/checksum, CompactSize
//! var-int, and var-string.

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;

/// Declared-length cap enforced on every frame before the payload is read.
pub const MAX_PAYLOAD_LEN: u32 = 32 * 1024 * 1024;

pub const COMMAND_LEN: usize = 12;

fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    [second[0], second[1], second[2], second[3]]
}

fn command_bytes(command: &str) -> [u8; COMMAND_LEN] {
    debug_assert!(command.len() <= COMMAND_LEN && command.is_ascii());
    let mut buf = [0u8; COMMAND_LEN];
    buf[..command.len()].copy_from_slice(command.as_bytes());
    buf
}

/// Assemble one framed message ready to write to the wire.
pub fn encode_frame(magic: [u8; 4], command: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + COMMAND_LEN + 4 + 4 + payload.len());
    out.extend_from_slice(&magic);
    out.extend_from_slice(&command_bytes(command));
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum(payload));
    out.extend_from_slice(payload);
    out
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    magic: [u8; 4],
    command: &str,
    payload: &[u8],
) -> Result<(), CodecError> {
    let frame = encode_frame(magic, command, payload);
    stream.write_all(&frame).await?;
    Ok(())
}

/// Read one framed message: command (with trailing NULs trimmed) and the
/// raw payload bytes. Strict: wrong magic, wrong checksum, an over-long
/// declared length, or a non-ASCII command is a fatal framing error.
pub async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
    magic: [u8; 4],
) -> Result<(String, Vec<u8>), CodecError> {
    let mut header = [0u8; 4 + COMMAND_LEN + 4 + 4];
    stream.read_exact(&mut header).await?;

    if header[0..4] != magic {
        return Err(CodecError::BadMagic);
    }

    let command_raw = &header[4..4 + COMMAND_LEN];
    if !command_raw.is_ascii() {
        return Err(CodecError::BadCommand);
    }
    let end = command_raw
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(COMMAND_LEN);
    if command_raw[end..].iter().any(|&b| b != 0) {
        return Err(CodecError::BadCommand);
    }
    let command = String::from_utf8_lossy(&command_raw[..end]).into_owned();

    let len_bytes: [u8; 4] = header[16..20].try_into().unwrap();
    let declared_len = u32::from_le_bytes(len_bytes);
    if declared_len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(declared_len, MAX_PAYLOAD_LEN));
    }
    let expected_checksum: [u8; 4] = header[20..24].try_into().unwrap();

    let mut payload = vec![0u8; declared_len as usize];
    stream.read_exact(&mut payload).await?;

    if checksum(&payload) != expected_checksum {
        return Err(CodecError::BadChecksum);
    }

    Ok((command, payload))
}

/// A cursor over a payload buffer, for the various `read_*` helpers below.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u16_be(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i64_le(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    pub fn read_varint(&mut self) -> Result<u64, CodecError> {
        let tag = self.read_u8()?;
        match tag {
            0..=0xfc => Ok(tag as u64),
            0xfd => Ok(self.read_u16_le()? as u64),
            0xfe => Ok(self.read_u32_le()? as u64),
            0xff => self.read_u64_le(),
        }
    }

    pub fn read_var_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_varint()?;
        let bytes = self.read_bytes(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::BadVarString)
    }
}

pub fn encode_varint(value: u64, out: &mut Vec<u8>) {
    if value < 0xfd {
        out.push(value as u8);
    } else if value <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

pub fn encode_var_string(value: &str, out: &mut Vec<u8>) {
    encode_varint(value.len() as u64, out);
    out.extend_from_slice(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrips_across_size_classes() {
        for value in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf);
            let mut reader = Reader::new(&buf);
            assert_eq!(reader.read_varint().unwrap(), value);
            assert_eq!(reader.remaining(), 0);
        }
    }

    #[test]
    fn var_string_roundtrips() {
        let mut buf = Vec::new();
        encode_var_string("bitcrawl:0.1", &mut buf);
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_var_string().unwrap(), "bitcrawl:0.1");
    }

    #[tokio::test]
    async fn frame_roundtrips_and_checksum_matches() {
        let magic = [0xf9, 0xbe, 0xb4, 0xd9];
        let payload = b"hello-payload".to_vec();
        let frame = encode_frame(magic, "ping", &payload);
        let mut cursor = std::io::Cursor::new(frame);
        let (command, decoded_payload) = read_frame(&mut cursor, magic).await.unwrap();
        assert_eq!(command, "ping");
        assert_eq!(decoded_payload, payload);
    }

    #[tokio::test]
    async fn bad_checksum_is_rejected() {
        let magic = [0xf9, 0xbe, 0xb4, 0xd9];
        let mut frame = encode_frame(magic, "ping", b"data");
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        let mut cursor = std::io::Cursor::new(frame);
        let err = read_frame(&mut cursor, magic).await.unwrap_err();
        assert!(matches!(err, CodecError::BadChecksum));
    }

    #[tokio::test]
    async fn bad_magic_is_rejected() {
        let magic = [0xf9, 0xbe, 0xb4, 0xd9];
        let frame = encode_frame(magic, "ping", b"data");
        let mut cursor = std::io::Cursor::new(frame);
        let err = read_frame(&mut cursor, [0, 0, 0, 0]).await.unwrap_err();
        assert!(matches!(err, CodecError::BadMagic));
    }

    #[tokio::test]
    async fn over_long_declared_length_is_rejected() {
        let magic = [0xf9, 0xbe, 0xb4, 0xd9];
        let mut header = Vec::new();
        header.extend_from_slice(&magic);
        header.extend_from_slice(&command_bytes("ping"));
        header.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        header.extend_from_slice(&[0, 0, 0, 0]);
        let mut cursor = std::io::Cursor::new(header);
        let err = read_frame(&mut cursor, magic).await.unwrap_err();
        assert!(matches!(err, CodecError::PayloadTooLarge(_, _)));
    }
}
