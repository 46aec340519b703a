//! Framing: every message is `[u32 LE length][JSON bytes]`.

use std::io::{self, Read, Write};

use serde_json::Value;

pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub fn read_message(reader: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message of {len} bytes exceeds the 16 MiB limit"),
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_message(writer: &mut impl Write, data: &[u8]) -> io::Result<()> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "response exceeds the 16 MiB limit",
        ));
    }
    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(data)?;
    writer.flush()
}

pub fn write_json(writer: &mut impl Write, value: &Value) -> io::Result<()> {
    write_message(writer, value.to_string().as_bytes())
}
