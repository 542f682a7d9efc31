//! Length-prefixed JSON framing for protocol streams.
//!
//! Each packet is serialized to UTF-8 JSON and written behind an unsigned
//! varint (LEB128) byte-length prefix. Decoding is incremental: a packet is
//! only produced once its full frame has arrived, so chunked delivery at
//! arbitrary byte offsets is tolerated.

use futures::prelude::*;
use futures::stream;

use crate::error::NetworkError;
use crate::packet::Packet;

/// Upper bound on a single serialized packet. Completion chunks are small;
/// anything near this size is a protocol violation.
pub const MAX_FRAME_BYTES: u64 = 10 * 1024 * 1024;

const MAX_VARINT_BYTES: usize = 10;

pub async fn write_packet<W>(io: &mut W, packet: &Packet) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let data = packet.serialize()?;
    if data.len() as u64 > MAX_FRAME_BYTES {
        return Err(NetworkError::Framing(format!(
            "frame too large: {} bytes",
            data.len()
        )));
    }
    let mut prefix = [0u8; MAX_VARINT_BYTES];
    let n = encode_varint(data.len() as u64, &mut prefix);
    io.write_all(&prefix[..n]).await?;
    io.write_all(&data).await?;
    io.flush().await?;
    Ok(())
}

/// Reads one length-prefixed packet. Returns `Ok(None)` on a clean end of
/// stream at a frame boundary.
pub async fn read_packet<R>(io: &mut R) -> Result<Option<Packet>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let len = match read_varint(io).await? {
        Some(len) => len,
        None => return Ok(None),
    };
    if len > MAX_FRAME_BYTES {
        return Err(NetworkError::Framing(format!("frame too large: {len} bytes")));
    }
    let mut data = vec![0u8; len as usize];
    io.read_exact(&mut data).await?;
    Packet::deserialize(&data).map(Some)
}

/// Lazy decode sequence over a byte source. The sequence ends on clean EOF;
/// a framing or i/o error is yielded once and terminates only this
/// stream's sequence.
pub fn packet_stream<R>(io: R) -> impl Stream<Item = Result<Packet, NetworkError>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::try_unfold(io, |mut io| async move {
        match read_packet(&mut io).await? {
            Some(packet) => Ok(Some((packet, io))),
            None => Ok(None),
        }
    })
}

fn encode_varint(mut value: u64, buf: &mut [u8; MAX_VARINT_BYTES]) -> usize {
    let mut i = 0;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf[i] = byte;
            return i + 1;
        }
        buf[i] = byte | 0x80;
        i += 1;
    }
}

/// Returns `Ok(None)` if the stream ended before the first prefix byte.
async fn read_varint<R>(io: &mut R) -> Result<Option<u64>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for i in 0..MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        match io.read(&mut byte).await {
            Ok(0) if i == 0 => return Ok(None),
            Ok(0) => {
                return Err(NetworkError::Framing(
                    "stream ended inside a length prefix".into(),
                ))
            }
            Ok(_) => {}
            Err(e) => return Err(NetworkError::Io(e)),
        }
        let b = byte[0];
        value |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok(Some(value));
        }
        shift += 7;
    }
    Err(NetworkError::Framing("invalid length prefix".into()))
}
