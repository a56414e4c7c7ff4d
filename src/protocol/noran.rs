//! Noran binary protocol decoder.
//!
//! Frame layout (little-endian): `length(2) | type(2) | payload`, where
//! `length` counts the whole frame including its own field. Devices identify
//! themselves inside every position report with an 11-byte fixed-width id,
//! so there is no login phase and no acknowledgement in this scope.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use super::bits::bit_range;
use super::reader::FrameReader;
use super::{Decoded, Session};
use crate::cache::DeviceCache;
use crate::error::{AppError, Result};
use crate::model::{ExtendedInfo, Position};

pub const PROTOCOL: &str = "noran";

// Message types
pub(crate) const MSG_SHAKE_HAND: u16 = 0x0000;
pub(crate) const MSG_UPLOAD_POSITION: u16 = 0x0008;
pub(crate) const MSG_CONTROL_RESPONSE: u16 = 0x8009;
pub(crate) const MSG_ALARM: u16 = 0x0003;

/// Device id field width in every position report.
const ID_LENGTH: usize = 11;
/// Upper bound on the declared frame length; anything larger is a desync.
const MAX_FRAME_LENGTH: usize = 1024;

pub struct NoranDecoder {
    cache: Arc<DeviceCache>,
}

impl NoranDecoder {
    pub fn new(cache: Arc<DeviceCache>) -> Self {
        Self { cache }
    }

    /// Decode one complete frame.
    pub async fn decode(&self, _session: &mut Session, frame: &[u8]) -> Result<Decoded> {
        let mut reader = FrameReader::new(frame);
        reader.read_u16_le()?; // declared length, already consumed by framing
        let msg_type = reader.read_u16_le()?;

        match msg_type {
            // Device firmware expects no reply to the handshake
            MSG_SHAKE_HAND => Ok(Decoded::none()),
            MSG_UPLOAD_POSITION | MSG_CONTROL_RESPONSE | MSG_ALARM => {
                self.decode_position(&mut reader, msg_type).await
            }
            // Image transfer and other extension types are out of scope
            _ => Ok(Decoded::none()),
        }
    }

    async fn decode_position(&self, reader: &mut FrameReader<'_>, msg_type: u16) -> Result<Decoded> {
        if msg_type == MSG_CONTROL_RESPONSE {
            reader.skip(8)?; // GIS ip + port echo
        }

        let flags = reader.read_u8()?;
        let valid = flags & 0x01 != 0;

        let mut info = ExtendedInfo::new(PROTOCOL);
        info.set("alarm", reader.read_u8()?);

        // Speed is km/h on the wire and stored unconverted
        let speed = reader.read_u8()? as f64;
        let course = reader.read_u16_le()? as f64;
        let longitude = reader.read_f32_le()? as f64;
        let latitude = reader.read_f32_le()? as f64;
        let time = decode_time(reader.read_u32_le()?)?;

        let id_bytes = reader.read_bytes(ID_LENGTH)?;
        let imei = String::from_utf8_lossy(id_bytes)
            .trim_end_matches('\0')
            .to_string();

        // A position without a resolved device id is still decoded; the
        // dispatcher drops it before the sink
        let device_id = match self.cache.resolve(&imei).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Unresolved Noran device {imei}: {e}");
                None
            }
        };

        info.set("io", reader.read_u8()?);
        info.set("fuel", reader.read_u8()?);

        let position = Position {
            device_id,
            time,
            valid,
            latitude,
            longitude,
            speed,
            course,
            altitude: 0.0,
            extended_info: info,
        };

        Ok(Decoded::position(position))
    }
}

/// Unpack the 32-bit time field: bits 31-26 year offset from 2000, 25-22
/// month, 21-17 day, 16-12 hour, 11-6 minute, 5-0 second, all UTC.
pub(crate) fn decode_time(value: u32) -> Result<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(
        2000 + bit_range(value, 26, 6) as i32,
        bit_range(value, 22, 4),
        bit_range(value, 17, 5),
    )
    .and_then(|date| {
        date.and_hms_opt(
            bit_range(value, 12, 5),
            bit_range(value, 6, 6),
            bit_range(value, 0, 6),
        )
    })
    .map(|dt| dt.and_utc())
    .ok_or_else(|| AppError::malformed(format!("invalid Noran time field {value:#010X}")))
}

/// Read one complete length-prefixed frame off the wire.
///
/// Returns `Ok(None)` when the peer closed the connection. A declared
/// length below the header size or above `MAX_FRAME_LENGTH` is a stream
/// desync and surfaces as `MalformedFrame`, closing the connection.
pub(crate) async fn read_frame<R>(stream: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let length = u16::from_le_bytes(header) as usize;
    if length < 4 || length > MAX_FRAME_LENGTH {
        return Err(AppError::malformed(format!(
            "implausible Noran frame length {length}"
        )));
    }

    let mut frame = vec![0u8; length];
    frame[..2].copy_from_slice(&header);
    match stream.read_exact(&mut frame[2..]).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    Ok(Some(frame))
}
