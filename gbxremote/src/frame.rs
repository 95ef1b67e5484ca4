//! The framing layer of the protocol.
//!
//! Every message is length-delimited: a `u32` payload length and a `u32`
//! correlation handle, both little-endian, followed by exactly that many
//! bytes of XML. The connection handshake uses a shorter form without a
//! handle.

use std::io::{ErrorKind, Read};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Failure to receive data from the server.
#[derive(Debug, Error)]
pub enum RecvError {
    /// The peer closed the connection; a read returned zero bytes
    /// before the expected data was complete.
    #[error("connection closed by the server")]
    Closed,

    /// Receiving was abandoned because the connection was shut down
    /// on our side.
    #[error("receive loop was stopped")]
    Stopped,

    /// The received bytes are not a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("failed to read from socket")]
    Io(#[from] std::io::Error),
}

impl RecvError {
    /// True for conditions that indicate the connection itself is gone,
    /// as opposed to an orderly stop.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            RecvError::Closed => true,
            RecvError::Io(err) => matches!(
                err.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Prefix an XML payload with its length and the correlation handle.
pub fn encode_frame(handle: u32, payload: &[u8]) -> Vec<u8> {
    let mut length_bytes = [0; 4];
    LittleEndian::write_u32(&mut length_bytes, payload.len() as u32);

    let mut handle_bytes = [0; 4];
    LittleEndian::write_u32(&mut handle_bytes, handle);

    [&length_bytes[..], &handle_bytes[..], payload].concat()
}

/// Read one frame: `(payload_len_u32_le || handle_u32_le || payload)`.
///
/// `keep_waiting` is polled whenever a read times out; returning `false`
/// abandons the read with `RecvError::Stopped`. Partial reads accumulate
/// until the frame is complete, so a frame may arrive in any number of
/// segments.
pub fn read_frame<R, F>(reader: &mut R, keep_waiting: &F) -> Result<(u32, Vec<u8>), RecvError>
where
    R: Read,
    F: Fn() -> bool,
{
    let mut head = [0; 8];
    read_full(reader, &mut head, keep_waiting)?;

    let payload_length = LittleEndian::read_u32(&head[..4]);
    let handle = LittleEndian::read_u32(&head[4..]);

    let mut payload = vec![0; payload_length as usize];
    read_full(reader, &mut payload, keep_waiting)?;

    Ok((handle, payload))
}

/// Read the protocol header the server sends right after the TCP
/// connection is established: `len_u32_le` followed by `len` bytes
/// of UTF-8.
pub fn read_handshake<R>(reader: &mut R) -> Result<String, RecvError>
where
    R: Read,
{
    // A single read timeout is enough to give up here; there is no
    // concurrent stop signal to wait for yet.
    let impatient = || false;
    let timed_out = |err| match err {
        RecvError::Stopped => RecvError::Io(ErrorKind::TimedOut.into()),
        other => other,
    };

    let mut length_bytes = [0; 4];
    read_full(reader, &mut length_bytes, &impatient).map_err(timed_out)?;
    let header_length = LittleEndian::read_u32(&length_bytes);

    let mut header_bytes = vec![0; header_length as usize];
    read_full(reader, &mut header_bytes, &impatient).map_err(timed_out)?;

    String::from_utf8(header_bytes)
        .map_err(|_| RecvError::Malformed("protocol header is not UTF-8".to_string()))
}

/// Fill `buf` completely, accumulating across however many reads
/// it takes.
fn read_full<R, F>(reader: &mut R, buf: &mut [u8], keep_waiting: &F) -> Result<(), RecvError>
where
    R: Read,
    F: Fn() -> bool,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(RecvError::Closed),
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                if !keep_waiting() {
                    return Err(RecvError::Stopped);
                }
            }
            Err(err) => return Err(RecvError::Io(err)),
        }
    }
    Ok(())
}
