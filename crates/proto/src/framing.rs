//! Length-prefixed framing: a little-endian `u32` byte count followed by a
//! bincode-encoded payload, read and written over any tokio async stream.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProtoError;

/// Frames larger than this are rejected outright rather than trusted to
/// allocate; no single request or reply in this protocol is anywhere near
/// this size.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub async fn write_frame<W, T>(w: &mut W, msg: &T) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(msg)?;
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| ProtoError::FrameTooLarge(bytes.len() as u64))?;
    w.write_all(&len.to_le_bytes()).await?;
    w.write_all(&bytes).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(r: &mut R) -> Result<T, ProtoError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(len as u64));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}

/// Writes [`crate::message::MAGIC`] as the connection preamble.
pub async fn write_magic<W: AsyncWrite + Unpin>(w: &mut W) -> Result<(), ProtoError> {
    w.write_all(&crate::message::MAGIC.to_le_bytes()).await?;
    w.flush().await?;
    Ok(())
}

/// Reads and verifies the connection preamble, failing with
/// [`ProtoError::BadMagic`] on mismatch.
pub async fn read_magic<R: AsyncRead + Unpin>(r: &mut R) -> Result<(), ProtoError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).await?;
    let got = u64::from_le_bytes(buf);
    if got != crate::message::MAGIC {
        return Err(ProtoError::BadMagic(got));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DepWire, RpcReq};

    #[tokio::test]
    async fn roundtrips_a_request_through_a_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let req = RpcReq::Download {
            conn_id: 7,
            job: "build-foo".into(),
            deps: vec![DepWire {
                node: "src/main.rs".into(),
                is_static: false,
                accesses: Default::default(),
                full: true,
                crc: 42,
            }],
        };
        write_frame(&mut a, &req).await.unwrap();
        let got: RpcReq = read_frame(&mut b).await.unwrap();
        match got {
            RpcReq::Download { conn_id, job, deps } => {
                assert_eq!(conn_id, 7);
                assert_eq!(job, "build-foo");
                assert_eq!(deps.len(), 1);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn magic_mismatch_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&0u64.to_le_bytes()).await.unwrap();
        assert!(matches!(read_magic(&mut b).await, Err(ProtoError::BadMagic(0))));
    }
}
