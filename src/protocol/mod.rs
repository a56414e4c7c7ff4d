//! Protocol decoding: vendor frames in, normalized positions out.
//!
//! Each decoder is invoked once per delivered frame and may update the
//! connection session, return acknowledgement bytes, and/or return one
//! decoded position. Decoders never touch the network themselves; the only
//! injected I/O is the device identity cache.

mod bits;
mod gt06;
mod noran;
mod reader;


pub use bits::{bit_range, crc16_ccitt};
pub use gt06::Gt06Decoder;
pub use noran::NoranDecoder;

use tokio::io::AsyncRead;

use crate::error::Result;
use crate::model::Position;

/// Per-connection decoder state.
///
/// Created on accept, dropped on close, never shared across connections.
/// GT06 establishes the device id at login and reuses it for every
/// following frame on the same connection.
#[derive(Debug, Default)]
pub struct Session {
    pub device_id: Option<i64>,
}

/// Outcome of decoding one frame.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Acknowledgement bytes to write back on the same connection.
    pub response: Option<Vec<u8>>,
    /// Zero-or-one position event per frame.
    pub position: Option<Position>,
}

impl Decoded {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn ack(response: Vec<u8>) -> Self {
        Self {
            response: Some(response),
            position: None,
        }
    }

    pub fn position(position: Position) -> Self {
        Self {
            response: None,
            position: Some(position),
        }
    }
}

/// One decoder per protocol family, dispatched by the server per port.
pub enum Decoder {
    Gt06(Gt06Decoder),
    Noran(NoranDecoder),
}

impl Decoder {
    /// Protocol name, used for logging and the extended-info tag.
    pub fn protocol(&self) -> &'static str {
        match self {
            Decoder::Gt06(_) => gt06::PROTOCOL,
            Decoder::Noran(_) => noran::PROTOCOL,
        }
    }

    /// Decode exactly one frame's bytes.
    pub async fn decode(&self, session: &mut Session, frame: &[u8]) -> Result<Decoded> {
        match self {
            Decoder::Gt06(decoder) => decoder.decode(session, frame).await,
            Decoder::Noran(decoder) => decoder.decode(session, frame).await,
        }
    }

    /// Extract the next complete frame from the connection's byte stream.
    ///
    /// `Ok(None)` means the peer closed the connection cleanly.
    pub async fn read_frame<R>(&self, stream: &mut R) -> Result<Option<Vec<u8>>>
    where
        R: AsyncRead + Unpin,
    {
        match self {
            Decoder::Gt06(_) => gt06::read_frame(stream).await,
            Decoder::Noran(_) => noran::read_frame(stream).await,
        }
    }
}
