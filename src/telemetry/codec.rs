//! Conversion between [`TelemetrySample`] and wire payloads.
//!
//! Three encodings are available:
//!
//! - [`FrameCodec`]: fixed 39-byte frame, a tag byte `0x47`, a body length
//!   byte `37`, then every field big-endian in declaration order. Any
//!   truncation is detected.
//! - [`ProtobufCodec`]: proto3 `gps.Coords`, interoperable with the C and
//!   C++ firmware clients.
//! - [`JsonCodec`]: a JSON object with one member per field.
//!
//! Decoding never panics on hostile input; every failure is a
//! [`DecodeError::Malformed`].

use super::TelemetrySample;
use heapless::Vec;

/// Capacity of an encoded payload. Fits the largest JSON rendition.
pub const PAYLOAD_CAPACITY: usize = 256;

/// An encoded sample.
pub type Payload = Vec<u8, PAYLOAD_CAPACITY>;

/// First byte of every frame.
pub const FRAME_TAG: u8 = 0x47;
/// Body length announced in the second byte of every frame.
pub const FRAME_BODY_LEN: u8 = 37;
/// Total size of a frame.
pub const FRAME_LEN: usize = 2 + FRAME_BODY_LEN as usize;

/// Largest protobuf encoding of a sample: eight one-byte keys, seven
/// ten-byte varints and a two-byte satellite count.
pub const PROTOBUF_MAX_LEN: usize = 8 + 7 * 10 + 2;

/// Why a payload could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MalformedKind {
    /// The payload ends before the record does.
    #[error("truncated")]
    Truncated,
    /// The first byte is not the frame tag.
    #[error("wrong tag")]
    WrongTag,
    /// A length prefix disagrees with the schema or the payload.
    #[error("length mismatch")]
    LengthMismatch,
    /// A wire type that is reserved or wrong for the field.
    #[error("invalid wire type")]
    InvalidWireType,
    /// Field number zero.
    #[error("invalid field number")]
    InvalidField,
    /// A value does not fit the field's type.
    #[error("value out of range")]
    OutOfRange,
    /// Not valid JSON for a sample, or bytes after the object.
    #[error("syntax error")]
    Syntax,
}

/// Decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The payload is not a valid encoding of a sample.
    #[error("malformed payload: {0}")]
    Malformed(MalformedKind),
}

/// Encoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// The encoding does not fit in a [`Payload`].
    #[error("payload buffer too small")]
    BufferTooSmall,
}

/// A payload format for [`TelemetrySample`]s.
pub trait Codec {
    /// Encode `sample`.
    fn encode(&self, sample: &TelemetrySample) -> Result<Payload, EncodeError>;

    /// Decode a payload produced by [`encode`](Codec::encode).
    fn decode(&self, payload: &[u8]) -> Result<TelemetrySample, DecodeError>;
}

impl<T: Codec + ?Sized> Codec for &T {
    fn encode(&self, sample: &TelemetrySample) -> Result<Payload, EncodeError> {
        (**self).encode(sample)
    }

    fn decode(&self, payload: &[u8]) -> Result<TelemetrySample, DecodeError> {
        (**self).decode(payload)
    }
}

const fn malformed(kind: MalformedKind) -> DecodeError {
    DecodeError::Malformed(kind)
}

/// Encode `sample` as a fixed frame.
pub fn encode_frame(sample: &TelemetrySample) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    out[0] = FRAME_TAG;
    out[1] = FRAME_BODY_LEN;
    out[2..10].copy_from_slice(&sample.device.to_be_bytes());
    out[10..14].copy_from_slice(&sample.latitude_e7.to_be_bytes());
    out[14..18].copy_from_slice(&sample.longitude_e7.to_be_bytes());
    out[18..22].copy_from_slice(&sample.altitude_mm.to_be_bytes());
    out[22..26].copy_from_slice(&sample.radius_mm.to_be_bytes());
    out[26..30].copy_from_slice(&sample.speed_mm_s.to_be_bytes());
    out[30] = sample.satellites;
    out[31..39].copy_from_slice(&sample.time_utc.to_be_bytes());
    out
}

/// Decode a fixed frame. No range checks are applied to the values.
pub fn decode_frame(bytes: &[u8]) -> Result<TelemetrySample, DecodeError> {
    let Some(&tag) = bytes.first() else {
        return Err(malformed(MalformedKind::Truncated));
    };
    if tag != FRAME_TAG {
        return Err(malformed(MalformedKind::WrongTag));
    }
    let Some(&body_len) = bytes.get(1) else {
        return Err(malformed(MalformedKind::Truncated));
    };
    if body_len != FRAME_BODY_LEN {
        return Err(malformed(MalformedKind::LengthMismatch));
    }
    if bytes.len() < FRAME_LEN {
        return Err(malformed(MalformedKind::Truncated));
    }
    if bytes.len() > FRAME_LEN {
        return Err(malformed(MalformedKind::LengthMismatch));
    }

    let mut be4 = [0u8; 4];
    let mut be8 = [0u8; 8];
    let mut i32_at = |at: usize| {
        be4.copy_from_slice(&bytes[at..at + 4]);
        i32::from_be_bytes(be4)
    };
    let latitude_e7 = i32_at(10);
    let longitude_e7 = i32_at(14);
    let altitude_mm = i32_at(18);
    let radius_mm = i32_at(22);
    let speed_mm_s = i32_at(26);

    be8.copy_from_slice(&bytes[2..10]);
    let device = u64::from_be_bytes(be8);
    be8.copy_from_slice(&bytes[31..39]);
    let time_utc = i64::from_be_bytes(be8);

    Ok(TelemetrySample {
        device,
        latitude_e7,
        longitude_e7,
        altitude_mm,
        radius_mm,
        speed_mm_s,
        satellites: bytes[30],
        time_utc,
    })
}

/// The fixed binary frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCodec;

impl Codec for FrameCodec {
    fn encode(&self, sample: &TelemetrySample) -> Result<Payload, EncodeError> {
        Vec::from_slice(&encode_frame(sample)).map_err(|_| EncodeError::BufferTooSmall)
    }

    fn decode(&self, payload: &[u8]) -> Result<TelemetrySample, DecodeError> {
        decode_frame(payload)
    }
}

// gps.Coords field numbers
const FIELD_DEVICE: u64 = 1;
const FIELD_LATITUDE: u64 = 2;
const FIELD_LONGITUDE: u64 = 3;
const FIELD_ALTITUDE: u64 = 4;
const FIELD_RADIUS: u64 = 5;
const FIELD_SPEED: u64 = 6;
const FIELD_SATELLITES: u64 = 7;
const FIELD_TIME: u64 = 8;

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

struct ProtoWriter<'a> {
    out: &'a mut [u8; PROTOBUF_MAX_LEN],
    len: usize,
}

impl ProtoWriter<'_> {
    fn varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.out[self.len] = (value as u8) | 0x80;
            self.len += 1;
            value >>= 7;
        }
        self.out[self.len] = value as u8;
        self.len += 1;
    }

    /// proto3 omits fields holding their default value.
    fn field(&mut self, field: u64, value: u64) {
        if value != 0 {
            self.varint(field << 3 | WIRE_VARINT);
            self.varint(value);
        }
    }
}

/// Encode `sample` as a `gps.Coords` message into `out`, returning the
/// number of bytes written.
pub fn encode_protobuf(sample: &TelemetrySample, out: &mut [u8; PROTOBUF_MAX_LEN]) -> usize {
    let mut w = ProtoWriter { out, len: 0 };
    // Negative int32/int64 values are sign-extended to ten bytes.
    w.field(FIELD_DEVICE, sample.device);
    w.field(FIELD_LATITUDE, i64::from(sample.latitude_e7) as u64);
    w.field(FIELD_LONGITUDE, i64::from(sample.longitude_e7) as u64);
    w.field(FIELD_ALTITUDE, i64::from(sample.altitude_mm) as u64);
    w.field(FIELD_RADIUS, i64::from(sample.radius_mm) as u64);
    w.field(FIELD_SPEED, i64::from(sample.speed_mm_s) as u64);
    w.field(FIELD_SATELLITES, u64::from(sample.satellites));
    w.field(FIELD_TIME, sample.time_utc as u64);
    w.len
}

struct ProtoReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl ProtoReader<'_> {
    fn varint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        for i in 0..10 {
            let Some(&byte) = self.bytes.get(self.pos) else {
                return Err(malformed(MalformedKind::Truncated));
            };
            self.pos += 1;
            // The tenth byte may only carry the top bit of a u64.
            if i == 9 && byte > 0x01 {
                return Err(malformed(MalformedKind::OutOfRange));
            }
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(malformed(MalformedKind::OutOfRange))
    }

    fn skip(&mut self, len: u64) -> Result<(), DecodeError> {
        let end = usize::try_from(len)
            .ok()
            .and_then(|len| self.pos.checked_add(len))
            .filter(|end| *end <= self.bytes.len())
            .ok_or(malformed(MalformedKind::Truncated))?;
        self.pos = end;
        Ok(())
    }

    fn skip_field(&mut self, wire_type: u64) -> Result<(), DecodeError> {
        match wire_type {
            WIRE_VARINT => self.varint().map(|_| ()),
            WIRE_FIXED64 => self.skip(8),
            WIRE_LEN => {
                let len = self.varint()?;
                self.skip(len)
            }
            WIRE_FIXED32 => self.skip(4),
            _ => Err(malformed(MalformedKind::InvalidWireType)),
        }
    }
}

fn to_i32(raw: u64) -> Result<i32, DecodeError> {
    i32::try_from(raw as i64).map_err(|_| malformed(MalformedKind::OutOfRange))
}

/// Decode a `gps.Coords` message.
///
/// Unknown fields are skipped. Fields absent from the message keep their
/// default of zero.
pub fn decode_protobuf(bytes: &[u8]) -> Result<TelemetrySample, DecodeError> {
    let mut r = ProtoReader { bytes, pos: 0 };
    let mut sample = TelemetrySample::default();

    while r.pos < bytes.len() {
        let key = r.varint()?;
        let field = key >> 3;
        let wire_type = key & 0x07;
        if field == 0 {
            return Err(malformed(MalformedKind::InvalidField));
        }
        if !(FIELD_DEVICE..=FIELD_TIME).contains(&field) {
            r.skip_field(wire_type)?;
            continue;
        }
        if wire_type != WIRE_VARINT {
            return Err(malformed(MalformedKind::InvalidWireType));
        }

        let raw = r.varint()?;
        match field {
            FIELD_DEVICE => sample.device = raw,
            FIELD_LATITUDE => sample.latitude_e7 = to_i32(raw)?,
            FIELD_LONGITUDE => sample.longitude_e7 = to_i32(raw)?,
            FIELD_ALTITUDE => sample.altitude_mm = to_i32(raw)?,
            FIELD_RADIUS => sample.radius_mm = to_i32(raw)?,
            FIELD_SPEED => sample.speed_mm_s = to_i32(raw)?,
            FIELD_SATELLITES => {
                sample.satellites =
                    u8::try_from(raw).map_err(|_| malformed(MalformedKind::OutOfRange))?;
            }
            _ => sample.time_utc = raw as i64,
        }
    }

    Ok(sample)
}

/// proto3 `gps.Coords`, as spoken by the firmware clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtobufCodec;

impl Codec for ProtobufCodec {
    fn encode(&self, sample: &TelemetrySample) -> Result<Payload, EncodeError> {
        let mut buf = [0u8; PROTOBUF_MAX_LEN];
        let len = encode_protobuf(sample, &mut buf);
        Vec::from_slice(&buf[..len]).map_err(|_| EncodeError::BufferTooSmall)
    }

    fn decode(&self, payload: &[u8]) -> Result<TelemetrySample, DecodeError> {
        decode_protobuf(payload)
    }
}

/// A JSON object, for brokers watched by humans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, sample: &TelemetrySample) -> Result<Payload, EncodeError> {
        let mut buf = [0u8; PAYLOAD_CAPACITY];
        let len =
            serde_json_core::to_slice(sample, &mut buf).map_err(|_| EncodeError::BufferTooSmall)?;
        Vec::from_slice(&buf[..len]).map_err(|_| EncodeError::BufferTooSmall)
    }

    fn decode(&self, payload: &[u8]) -> Result<TelemetrySample, DecodeError> {
        let (sample, used) = serde_json_core::from_slice::<TelemetrySample>(payload)
            .map_err(|_| malformed(MalformedKind::Syntax))?;
        if used != payload.len() {
            return Err(malformed(MalformedKind::Syntax));
        }
        Ok(sample)
    }
}

/// Selects a codec at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum CodecKind {
    /// [`FrameCodec`]
    #[default]
    Frame,
    /// [`ProtobufCodec`]
    Protobuf,
    /// [`JsonCodec`]
    Json,
}

/// A codec chosen by [`CodecKind`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnyCodec {
    kind: CodecKind,
}

impl AnyCodec {
    /// The codec for `kind`.
    pub const fn new(kind: CodecKind) -> Self {
        Self { kind }
    }

    /// Which encoding this codec speaks.
    pub const fn kind(&self) -> CodecKind {
        self.kind
    }
}

impl From<CodecKind> for AnyCodec {
    fn from(kind: CodecKind) -> Self {
        Self::new(kind)
    }
}

impl Codec for AnyCodec {
    fn encode(&self, sample: &TelemetrySample) -> Result<Payload, EncodeError> {
        match self.kind {
            CodecKind::Frame => FrameCodec.encode(sample),
            CodecKind::Protobuf => ProtobufCodec.encode(sample),
            CodecKind::Json => JsonCodec.encode(sample),
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<TelemetrySample, DecodeError> {
        match self.kind {
            CodecKind::Frame => FrameCodec.decode(payload),
            CodecKind::Protobuf => ProtobufCodec.decode(payload),
            CodecKind::Json => JsonCodec.decode(payload),
        }
    }
}
