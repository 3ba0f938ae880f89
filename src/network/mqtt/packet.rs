//! MQTT 3.1.1 control packets.
//!
//! Outbound packets are encoded into fixed-capacity [`PacketBuf`]s. Inbound
//! bytes are collected by a [`FrameReader`], which splits the stream into
//! complete frames, and [`decode`] turns one frame into a borrowed
//! [`Packet`].

use super::MqttError;
use crate::network::Read;
use crate::network::error::Error as NetError;
use heapless::Vec;

// MQTT Control Packet types - these are the fixed header packet type values
const CONNECT: u8 = 0x10;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const SUBSCRIBE: u8 = 0x82;
const UNSUBSCRIBE: u8 = 0xA2;
const PINGREQ: u8 = 0xC0;
const DISCONNECT: u8 = 0xE0;

const TYPE_CONNACK: u8 = 2;
const TYPE_PUBLISH: u8 = 3;
const TYPE_PUBACK: u8 = 4;
const TYPE_SUBACK: u8 = 9;
const TYPE_UNSUBACK: u8 = 11;
const TYPE_PINGRESP: u8 = 13;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

/// Largest value the remaining-length field can carry.
const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Maximum topic length accepted in either direction.
pub const MAX_TOPIC_LEN: usize = 128;
/// Maximum application payload carried by one PUBLISH.
pub const MAX_PAYLOAD_LEN: usize = 512;
/// Maximum size of a whole packet, fixed header included.
pub const MAX_PACKET_LEN: usize = 1024;

/// An encoded outbound packet.
pub type PacketBuf = Vec<u8, MAX_PACKET_LEN>;

/// Quality of Service levels for MQTT messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

impl QoS {
    /// Parse the two-bit wire representation.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// CONNACK return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReturnCode {
    /// The connection was accepted.
    Accepted,
    /// The broker does not support MQTT 3.1.1.
    UnacceptableProtocolVersion,
    /// The client identifier is not allowed.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// A code outside the 3.1.1 table.
    Other(u8),
}

impl ConnectReturnCode {
    /// The raw byte sent by the broker.
    pub fn code(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::UnacceptableProtocolVersion => 1,
            Self::IdentifierRejected => 2,
            Self::ServerUnavailable => 3,
            Self::BadUserNameOrPassword => 4,
            Self::NotAuthorized => 5,
            Self::Other(code) => code,
        }
    }
}

impl From<u8> for ConnectReturnCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// A decoded inbound packet, borrowing from its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet<'a> {
    /// Connection acknowledgement.
    ConnAck {
        /// The broker resumed a stored session.
        session_present: bool,
        /// Outcome of the connection attempt.
        code: ConnectReturnCode,
    },
    /// An application message.
    Publish {
        /// Topic the message was published on.
        topic: &'a str,
        /// Message body.
        payload: &'a [u8],
        /// Delivery level chosen by the broker.
        qos: QoS,
        /// Identifier to acknowledge, present for QoS 1 and 2.
        packet_id: Option<u16>,
        /// Retained-message flag.
        retain: bool,
    },
    /// Acknowledgement of a QoS 1 publish.
    PubAck {
        /// Identifier of the acknowledged publish.
        packet_id: u16,
    },
    /// Subscription acknowledgement.
    SubAck {
        /// Identifier of the acknowledged SUBSCRIBE.
        packet_id: u16,
        /// Granted QoS, `None` when the broker refused the filter.
        granted: Option<QoS>,
    },
    /// Unsubscription acknowledgement.
    UnsubAck {
        /// Identifier of the acknowledged UNSUBSCRIBE.
        packet_id: u16,
    },
    /// Keep-alive response.
    PingResp,
    /// Any other packet type; carried so callers can log it.
    Other(u8),
}

struct PacketWriter {
    buf: PacketBuf,
}

impl PacketWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), MqttError> {
        self.buf
            .extend_from_slice(bytes)
            .map_err(|_| MqttError::TooLarge)
    }

    fn put_u8(&mut self, byte: u8) -> Result<(), MqttError> {
        self.buf.push(byte).map_err(|_| MqttError::TooLarge)
    }

    fn put_u16(&mut self, value: u16) -> Result<(), MqttError> {
        self.put(&value.to_be_bytes())
    }

    fn put_str(&mut self, s: &str) -> Result<(), MqttError> {
        let len = u16::try_from(s.len()).map_err(|_| MqttError::TooLarge)?;
        self.put_u16(len)?;
        self.put(s.as_bytes())
    }

    /// Prefix the collected body with the fixed header.
    fn finish(self, header: u8) -> Result<PacketBuf, MqttError> {
        let mut packet = PacketBuf::new();
        packet.push(header).map_err(|_| MqttError::TooLarge)?;
        encode_remaining_length(&mut packet, self.buf.len())?;
        packet
            .extend_from_slice(&self.buf)
            .map_err(|_| MqttError::TooLarge)?;
        Ok(packet)
    }
}

fn check_topic_name(topic: &str) -> Result<(), MqttError> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(MqttError::InvalidTopic);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(MqttError::TooLarge);
    }
    Ok(())
}

fn check_topic_filter(filter: &str) -> Result<(), MqttError> {
    if filter.is_empty() {
        return Err(MqttError::InvalidTopic);
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(MqttError::TooLarge);
    }
    Ok(())
}

/// Encode a CONNECT packet.
pub fn encode_connect(
    client_id: &str,
    keep_alive_seconds: u16,
    clean_session: bool,
) -> Result<PacketBuf, MqttError> {
    let mut w = PacketWriter::new();
    w.put_str(PROTOCOL_NAME)?;
    w.put_u8(PROTOCOL_LEVEL)?;
    w.put_u8(if clean_session { 0x02 } else { 0x00 })?;
    w.put_u16(keep_alive_seconds)?;
    w.put_str(client_id)?;
    w.finish(CONNECT)
}

/// Encode a PUBLISH packet. `packet_id` is required for QoS 1 and 2.
pub fn encode_publish(
    topic: &str,
    payload: &[u8],
    qos: QoS,
    packet_id: Option<u16>,
    retain: bool,
) -> Result<PacketBuf, MqttError> {
    check_topic_name(topic)?;
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(MqttError::TooLarge);
    }

    let mut w = PacketWriter::new();
    w.put_str(topic)?;
    if qos != QoS::AtMostOnce {
        w.put_u16(packet_id.ok_or(MqttError::Malformed)?)?;
    }
    w.put(payload)?;

    let mut header = PUBLISH | ((qos as u8) << 1);
    if retain {
        header |= 0x01;
    }
    w.finish(header)
}

/// Encode a PUBACK packet.
pub fn encode_puback(packet_id: u16) -> Result<PacketBuf, MqttError> {
    let mut w = PacketWriter::new();
    w.put_u16(packet_id)?;
    w.finish(PUBACK)
}

/// Encode a SUBSCRIBE packet for a single topic filter.
pub fn encode_subscribe(packet_id: u16, filter: &str, qos: QoS) -> Result<PacketBuf, MqttError> {
    check_topic_filter(filter)?;
    let mut w = PacketWriter::new();
    w.put_u16(packet_id)?;
    w.put_str(filter)?;
    w.put_u8(qos as u8)?;
    w.finish(SUBSCRIBE)
}

/// Encode an UNSUBSCRIBE packet for a single topic filter.
pub fn encode_unsubscribe(packet_id: u16, filter: &str) -> Result<PacketBuf, MqttError> {
    check_topic_filter(filter)?;
    let mut w = PacketWriter::new();
    w.put_u16(packet_id)?;
    w.put_str(filter)?;
    w.finish(UNSUBSCRIBE)
}

/// Encode a PINGREQ packet.
pub fn encode_pingreq() -> Result<PacketBuf, MqttError> {
    PacketWriter::new().finish(PINGREQ)
}

/// Encode a DISCONNECT packet.
pub fn encode_disconnect() -> Result<PacketBuf, MqttError> {
    PacketWriter::new().finish(DISCONNECT)
}

/// Encode the remaining length field for an MQTT packet.
///
/// The encoding uses up to 4 bytes where each byte encodes 7 bits of the
/// length value. The most significant bit indicates if another byte follows.
fn encode_remaining_length<const N: usize>(
    buf: &mut Vec<u8, N>,
    mut len: usize,
) -> Result<(), MqttError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(MqttError::TooLarge);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte).map_err(|_| MqttError::TooLarge)?;
        if len == 0 {
            return Ok(());
        }
    }
}

/// Decode a remaining-length field starting at `buf[0]`.
///
/// Returns the value and the number of bytes it occupied, or `None` if the
/// field is not complete yet.
fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, MqttError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(MqttError::Malformed);
        }
        value += (*byte as usize & 127) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(MqttError::Malformed);
    }
    Ok(None)
}

fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, MqttError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(MqttError::Malformed)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_str<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, MqttError> {
    let len = read_u16(cursor, buf)? as usize;
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or(MqttError::Malformed)?;
    *cursor += len;
    core::str::from_utf8(bytes).map_err(|_| MqttError::Malformed)
}

fn read_publish_head<'a>(
    cursor: &mut usize,
    header: u8,
    body: &'a [u8],
) -> Result<(&'a str, QoS, Option<u16>), MqttError> {
    let qos = QoS::from_bits((header >> 1) & 0x03).ok_or(MqttError::Malformed)?;
    let topic = read_str(cursor, body)?;
    let packet_id = if qos == QoS::AtMostOnce {
        None
    } else {
        Some(read_u16(cursor, body)?)
    };
    Ok((topic, qos, packet_id))
}

/// Decode the body of one frame given its first header byte.
pub fn decode(header: u8, body: &[u8]) -> Result<Packet<'_>, MqttError> {
    let mut cursor = 0;
    let packet = match header >> 4 {
        TYPE_CONNACK => {
            if body.len() != 2 {
                return Err(MqttError::Malformed);
            }
            Packet::ConnAck {
                session_present: body[0] & 0x01 != 0,
                code: ConnectReturnCode::from(body[1]),
            }
        }
        TYPE_PUBLISH => {
            let (topic, qos, packet_id) = read_publish_head(&mut cursor, header, body)?;
            Packet::Publish {
                topic,
                payload: &body[cursor..],
                qos,
                packet_id,
                retain: header & 0x01 != 0,
            }
        }
        TYPE_PUBACK => {
            if body.len() != 2 {
                return Err(MqttError::Malformed);
            }
            Packet::PubAck {
                packet_id: read_u16(&mut cursor, body)?,
            }
        }
        TYPE_SUBACK => {
            let packet_id = read_u16(&mut cursor, body)?;
            let code = *body.get(cursor).ok_or(MqttError::Malformed)?;
            let granted = if code == 0x80 {
                None
            } else {
                Some(QoS::from_bits(code).ok_or(MqttError::Malformed)?)
            };
            Packet::SubAck { packet_id, granted }
        }
        TYPE_UNSUBACK => {
            if body.len() != 2 {
                return Err(MqttError::Malformed);
            }
            Packet::UnsubAck {
                packet_id: read_u16(&mut cursor, body)?,
            }
        }
        TYPE_PINGRESP => {
            if !body.is_empty() {
                return Err(MqttError::Malformed);
            }
            Packet::PingResp
        }
        other => Packet::Other(other),
    };
    Ok(packet)
}

/// One frame split off the inbound stream.
#[derive(Debug, Clone)]
pub struct Frame<const N: usize> {
    /// First byte of the fixed header: packet type and flags.
    pub header: u8,
    /// Everything after the remaining-length field, or as much of it as fit
    /// in the reader when the frame is oversized.
    pub body: Vec<u8, N>,
    /// Declared size of a frame too large for the reader. Only its first
    /// `N` bytes were kept; the rest is discarded as it arrives.
    pub oversized: Option<usize>,
}

impl<const N: usize> Frame<N> {
    /// Decode the frame into a [`Packet`]. Oversized frames fail with
    /// [`MqttError::TooLarge`].
    pub fn packet(&self) -> Result<Packet<'_>, MqttError> {
        if self.oversized.is_some() {
            return Err(MqttError::TooLarge);
        }
        decode(self.header, &self.body)
    }

    /// Topic, QoS and packet id of a PUBLISH frame.
    ///
    /// Only needs the variable header, so it also works on an oversized
    /// frame whose payload was cut off. `None` for other packet types or
    /// when the header itself did not fit.
    pub fn publish_head(&self) -> Option<(&str, QoS, Option<u16>)> {
        if self.header >> 4 != TYPE_PUBLISH {
            return None;
        }
        read_publish_head(&mut 0, self.header, &self.body).ok()
    }
}

/// Accumulates bytes from a non-blocking transport and yields whole frames.
///
/// A frame larger than `N` is not an error: once the buffer is full its
/// prefix is handed out with [`Frame::oversized`] set, and the remainder is
/// skipped as later reads bring it in.
#[derive(Debug, Default)]
pub struct FrameReader<const N: usize> {
    buf: Vec<u8, N>,
    skip: usize,
}

impl<const N: usize> FrameReader<N> {
    /// An empty reader.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            skip: 0,
        }
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Read whatever the transport has pending into the free space.
    ///
    /// Returns the number of bytes added; `Ok(0)` when nothing was pending or
    /// the buffer is full. End of stream is reported as
    /// [`NetError::ConnectionClosed`].
    pub fn fill<R: Read>(&mut self, source: &mut R) -> Result<usize, MqttError> {
        let start = self.buf.len();
        if start == N {
            return Ok(0);
        }
        self.buf.resize(N, 0).map_err(|_| MqttError::TooLarge)?;
        let result = source.read(&mut self.buf[start..]);
        match result {
            Ok(0) => {
                self.buf.truncate(start);
                Err(MqttError::Transport(NetError::ConnectionClosed))
            }
            Ok(n) => {
                self.buf.truncate(start + n);
                Ok(n)
            }
            Err(err) => {
                self.buf.truncate(start);
                match err.into() {
                    NetError::WouldBlock => Ok(0),
                    other => Err(MqttError::Transport(other)),
                }
            }
        }
    }

    /// Split the next frame off the buffer, if a complete one (or the full
    /// prefix of an oversized one) is there.
    pub fn next_frame(&mut self) -> Result<Option<Frame<N>>, MqttError> {
        if self.skip > 0 {
            let n = self.skip.min(self.buf.len());
            self.consume(n);
            self.skip -= n;
            if self.skip > 0 {
                return Ok(None);
            }
        }
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let Some((remaining, len_bytes)) = decode_remaining_length(&self.buf[1..])? else {
            return Ok(None);
        };
        let body_start = 1 + len_bytes;
        let total = body_start + remaining;
        if total > N {
            if self.buf.len() < N {
                return Ok(None);
            }
            let frame = Frame {
                header: self.buf[0],
                body: Vec::from_slice(&self.buf[body_start..]).map_err(|_| MqttError::TooLarge)?,
                oversized: Some(total),
            };
            self.consume(N);
            self.skip = total - N;
            return Ok(Some(frame));
        }
        if self.buf.len() < total {
            return Ok(None);
        }

        let frame = Frame {
            header: self.buf[0],
            body: Vec::from_slice(&self.buf[body_start..total]).map_err(|_| MqttError::TooLarge)?,
            oversized: None,
        };
        self.consume(total);
        Ok(Some(frame))
    }

    fn consume(&mut self, n: usize) {
        let len = self.buf.len();
        self.buf.copy_within(n..len, 0);
        self.buf.truncate(len - n);
    }
}
