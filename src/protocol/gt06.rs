//! GT06 binary protocol decoder.
//!
//! Frame layout (big-endian):
//! `0x78 0x78 | length(1) | type(1) | payload | index(2) | crc(2) | 0x0D 0x0A`
//! where `length` counts everything from the type byte through the checksum.
//! Every frame, including unknown types, is answered with a fixed 10-byte
//! acknowledgement echoing the message type and frame index.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::bits::crc16_ccitt;
use super::reader::FrameReader;
use super::{Decoded, Session};
use crate::cache::DeviceCache;
use crate::error::{AppError, Result};
use crate::model::{ExtendedInfo, Position};

pub const PROTOCOL: &str = "gt06";

// Message types
pub(crate) const MSG_LOGIN: u8 = 0x01;
pub(crate) const MSG_GPS: u8 = 0x10;
pub(crate) const MSG_GPS_LBS: u8 = 0x12;
pub(crate) const MSG_GPS_LBS_STATUS: u8 = 0x16;
pub(crate) const MSG_GPS_PHONE: u8 = 0x1A;

// Frame markers
const START_MARKER: [u8; 2] = [0x78, 0x78];
const END_MARKER: [u8; 2] = [0x0D, 0x0A];

/// km/h to knots
const SPEED_TO_KNOTS: f64 = 0.539957;
/// Raw coordinate unit: 1/30000 of a minute of arc
const COORD_DIVISOR: f64 = 60.0 * 30000.0;

/// Stateless GT06 decoder; per-connection state lives in `Session`.
pub struct Gt06Decoder {
    cache: Arc<DeviceCache>,
}

impl Gt06Decoder {
    pub fn new(cache: Arc<DeviceCache>) -> Self {
        Self { cache }
    }

    /// Decode one complete frame.
    pub async fn decode(&self, session: &mut Session, frame: &[u8]) -> Result<Decoded> {
        let mut reader = FrameReader::new(frame);
        reader.skip(2)?; // start marker
        let length = reader.read_u8()? as usize;
        let data_length = length.saturating_sub(5);
        let msg_type = reader.read_u8()?;

        match msg_type {
            MSG_LOGIN => self.decode_login(session, &mut reader, data_length).await,
            MSG_GPS | MSG_GPS_LBS | MSG_GPS_LBS_STATUS | MSG_GPS_PHONE => {
                decode_position(session, &mut reader, msg_type)
            }
            other => {
                // Vendor extensions must not kill the connection
                reader.skip(data_length)?;
                let index = reader.read_u16()?;
                Ok(Decoded::ack(build_ack(other, index)))
            }
        }
    }

    async fn decode_login(
        &self,
        session: &mut Session,
        reader: &mut FrameReader<'_>,
        data_length: usize,
    ) -> Result<Decoded> {
        let imei = read_imei(reader)?;
        let device_id = self.cache.ensure_registered(&imei).await?;
        session.device_id = Some(device_id);

        reader.skip(data_length.saturating_sub(8))?;
        let index = reader.read_u16()?;
        Ok(Decoded::ack(build_ack(MSG_LOGIN, index)))
    }
}

fn decode_position(
    session: &mut Session,
    reader: &mut FrameReader<'_>,
    msg_type: u8,
) -> Result<Decoded> {
    let time = decode_time(reader.read_bytes(6)?)?;

    let gps = reader.read_u8()?;
    let gps_length = (gps >> 4) as usize;
    let satellites = gps & 0x0F;

    let mut latitude = reader.read_u32()? as f64 / COORD_DIVISOR;
    let mut longitude = reader.read_u32()? as f64 / COORD_DIVISOR;
    let speed = reader.read_u8()? as f64 * SPEED_TO_KNOTS;

    // Course and flags share one 16-bit field
    let union = reader.read_u16()?;
    let course = (union & 0x03FF) as f64;
    let valid = union & 0x1000 != 0;
    if union & 0x0400 == 0 {
        latitude = -latitude;
    }
    if union & 0x0800 != 0 {
        longitude = -longitude;
    }

    reader.skip(gps_length.saturating_sub(12))?; // reserved GPS bytes

    let mut info = ExtendedInfo::new(PROTOCOL);
    info.set("satellites", satellites);

    if msg_type == MSG_GPS_LBS || msg_type == MSG_GPS_LBS_STATUS {
        let lbs_length = if msg_type == MSG_GPS_LBS_STATUS {
            reader.read_u8()? as usize
        } else {
            0
        };

        info.set("mcc", reader.read_u16()?);
        info.set("mnc", reader.read_u8()?);
        info.set("lac", reader.read_u16()?);
        let cell = ((reader.read_u16()? as u32) << 8) | reader.read_u8()? as u32;
        info.set("cell", cell);
        reader.skip(lbs_length.saturating_sub(9))?;

        if msg_type == MSG_GPS_LBS_STATUS {
            // Alarm bits are not interpreted; the coarse flag is part of
            // the wire-compatible output
            reader.read_u8()?;
            info.set("alarm", true);
            info.set("power", reader.read_u8()?);
            info.set("gsm", reader.read_u8()?);
        }
    }

    // The frame index sits in the final 6 bytes (index, crc, end marker);
    // anything before it is padding
    if reader.remaining() < 6 {
        return Err(AppError::malformed("truncated GT06 trailer"));
    }
    reader.skip(reader.remaining() - 6)?;
    let index = reader.read_u16()?;
    info.set("index", index);

    let position = Position {
        device_id: session.device_id,
        time,
        valid,
        latitude,
        longitude,
        speed,
        course,
        altitude: 0.0, // not transmitted by this protocol
        extended_info: info,
    };

    Ok(Decoded {
        response: Some(build_ack(msg_type, index)),
        position: Some(position),
    })
}

/// Decode the 8-byte BCD IMEI: one digit from the first byte's low nibble,
/// then two digits per byte, 15 digits total.
fn read_imei(reader: &mut FrameReader<'_>) -> Result<String> {
    let bytes = reader.read_bytes(8)?;
    let mut imei = String::with_capacity(15);
    imei.push_str(&(bytes[0] & 0x0F).to_string());
    for &b in &bytes[1..] {
        imei.push_str(&(b >> 4).to_string());
        imei.push_str(&(b & 0x0F).to_string());
    }
    Ok(imei)
}

/// Decode the six-byte date-time block: `2000+year, month, day, hour,
/// minute, second`, all UTC.
pub(crate) fn decode_time(raw: &[u8]) -> Result<DateTime<Utc>> {
    if raw.len() < 6 {
        return Err(AppError::malformed("GT06 date-time shorter than 6 bytes"));
    }
    NaiveDate::from_ymd_opt(2000 + raw[0] as i32, raw[1] as u32, raw[2] as u32)
        .and_then(|date| date.and_hms_opt(raw[3] as u32, raw[4] as u32, raw[5] as u32))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            AppError::malformed(format!(
                "invalid GT06 date-time {:02X?}",
                &raw[..6.min(raw.len())]
            ))
        })
}

/// Build the fixed 10-byte acknowledgement, echoing message type and index.
pub(crate) fn build_ack(msg_type: u8, index: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(10);
    frame.extend_from_slice(&START_MARKER);
    frame.push(0x05); // length: type + index + crc
    frame.push(msg_type);
    frame.extend_from_slice(&index.to_be_bytes());
    let crc = crc16_ccitt(&frame[2..6]);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&END_MARKER);
    frame
}

/// Read one complete frame off the wire, resynchronizing on the start
/// marker so a corrupt stream recovers at the next frame boundary.
///
/// Returns `Ok(None)` when the peer closed the connection.
pub(crate) async fn read_frame<R>(stream: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    // Scan byte-by-byte for 0x78 0x78
    let mut prev = 0u8;
    loop {
        let byte = match read_byte(stream).await? {
            Some(byte) => byte,
            None => return Ok(None),
        };
        if prev == START_MARKER[0] && byte == START_MARKER[1] {
            break;
        }
        prev = byte;
    }

    let length = match read_byte(stream).await? {
        Some(byte) => byte,
        None => return Ok(None),
    };

    // length covers type..crc; the 0x0D 0x0A trailer follows it
    let mut rest = vec![0u8; length as usize + 2];
    match stream.read_exact(&mut rest).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut frame = Vec::with_capacity(rest.len() + 3);
    frame.extend_from_slice(&START_MARKER);
    frame.push(length);
    frame.extend_from_slice(&rest);
    Ok(Some(frame))
}

async fn read_byte<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match stream.read_exact(&mut byte).await {
        Ok(_) => Ok(Some(byte[0])),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}
