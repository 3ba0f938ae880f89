#![allow(dead_code)]

use gpslink::link::{InboundEvent, POLL_BATCH, PublishError, Session};
use gpslink::network::error::Error;
use gpslink::network::mqtt::packet;
use gpslink::network::mqtt::QoS;
use gpslink::network::*;
use gpslink::time::{Clock, ManualClock};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// How the scripted broker behind [`MockConnector`] answers.
#[derive(Debug)]
pub struct Broker {
    pub refuse: bool,
    /// Refuse this many upcoming connects, then accept.
    pub refusals: usize,
    pub silent: bool,
    pub connack_code: u8,
    pub suback_code: u8,
    pub answer_pings: bool,
    pub ack_publishes: bool,
    pub remotes: Vec<String>,
    pub wires: Vec<SharedWire>,
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            refuse: false,
            refusals: 0,
            silent: false,
            connack_code: 0,
            suback_code: 1,
            answer_pings: true,
            ack_publishes: true,
            remotes: Vec::new(),
            wires: Vec::new(),
        }
    }
}

pub type SharedBroker = Rc<RefCell<Broker>>;

/// One connection's traffic, as seen from the broker.
#[derive(Debug, Default)]
pub struct Wire {
    pub inbound: VecDeque<u8>,
    pub sent: Vec<Vec<u8>>,
    pub open: bool,
    pub peer_closed: bool,
    pub fail_writes: bool,
    /// Writes report `WouldBlock`, as with a full send buffer.
    pub stall_writes: bool,
    pub closes: usize,
}

pub type SharedWire = Rc<RefCell<Wire>>;

impl Wire {
    pub fn inject(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// First header byte of every packet the client sent.
    pub fn packet_types(&self) -> Vec<u8> {
        self.sent.iter().map(|p| p[0]).collect()
    }

    /// Topic and payload of every PUBLISH the client sent.
    pub fn publishes(&self) -> Vec<(String, Vec<u8>)> {
        self.sent
            .iter()
            .filter(|p| p[0] & 0xF0 == 0x30)
            .map(|p| {
                let (_, body) = split_frame(p);
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
                let mut rest = &body[2 + topic_len..];
                if (p[0] >> 1) & 0x03 != 0 {
                    rest = &rest[2..];
                }
                (topic, rest.to_vec())
            })
            .collect()
    }
}

/// Split a whole frame into its header byte and body.
pub fn split_frame(frame: &[u8]) -> (u8, &[u8]) {
    let mut len = 0usize;
    let mut shift = 0;
    let mut i = 1;
    loop {
        let byte = frame[i];
        len |= ((byte & 0x7F) as usize) << shift;
        i += 1;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    assert_eq!(frame.len(), i + len, "frame length mismatch");
    (frame[0], &frame[i..])
}

/// A PUBLISH frame as the broker would deliver it.
pub fn publish_frame(topic: &str, payload: &[u8], qos: QoS, packet_id: Option<u16>) -> Vec<u8> {
    packet::encode_publish(topic, payload, qos, packet_id, false)
        .unwrap()
        .to_vec()
}

/// A PUBLISH frame built by hand, so it can be larger than anything the
/// client would encode.
pub fn large_publish_frame(topic: &str, payload_len: usize, packet_id: Option<u16>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    if let Some(id) = packet_id {
        body.extend_from_slice(&id.to_be_bytes());
    }
    body.resize(body.len() + payload_len, 0x5A);

    let mut frame = vec![if packet_id.is_some() { 0x32 } else { 0x30 }];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        frame.push(byte);
        if len == 0 {
            break;
        }
    }
    frame.extend_from_slice(&body);
    frame
}

#[derive(Debug)]
pub struct MockConnection {
    wire: SharedWire,
    broker: SharedBroker,
}

impl MockConnection {
    fn respond(&self, frame: &[u8]) {
        let broker = self.broker.borrow();
        if broker.silent {
            return;
        }
        let mut wire = self.wire.borrow_mut();
        let (header, body) = split_frame(frame);
        match header {
            0x10 => wire.inject(&[0x20, 0x02, 0x00, broker.connack_code]),
            0x82 => wire.inject(&[0x90, 0x03, body[0], body[1], broker.suback_code]),
            0xA2 => wire.inject(&[0xB0, 0x02, body[0], body[1]]),
            0xC0 if broker.answer_pings => wire.inject(&[0xD0, 0x00]),
            h if h & 0xF0 == 0x30 && (h >> 1) & 0x03 == 1 && broker.ack_publishes => {
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let id = &body[2 + topic_len..4 + topic_len];
                wire.inject(&[0x40, 0x02, id[0], id[1]]);
            }
            _ => {}
        }
    }
}

impl Read for MockConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut wire = self.wire.borrow_mut();
        if !wire.open {
            return Err(Error::NotOpen);
        }
        if wire.inbound.is_empty() {
            return if wire.peer_closed {
                Ok(0)
            } else {
                Err(Error::WouldBlock)
            };
        }
        let len = buf.len().min(wire.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(wire.inbound.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }

    fn wait_readable(&mut self, _timeout: Duration) -> Result<bool, Self::Error> {
        let wire = self.wire.borrow();
        Ok(!wire.inbound.is_empty() || wire.peer_closed)
    }
}

impl Write for MockConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        {
            let mut wire = self.wire.borrow_mut();
            if !wire.open {
                return Err(Error::NotOpen);
            }
            if wire.stall_writes {
                return Err(Error::WouldBlock);
            }
            if wire.fail_writes {
                return Err(Error::WriteError);
            }
            wire.sent.push(buf.to_vec());
        }
        self.respond(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Close for MockConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        let mut wire = self.wire.borrow_mut();
        wire.open = false;
        wire.closes += 1;
        Ok(())
    }
}

impl Connection for MockConnection {}

/// Hands out connections to the scripted broker.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    pub broker: SharedBroker,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent connection.
    pub fn wire(&self) -> SharedWire {
        self.broker.borrow().wires.last().cloned().expect("no connection yet")
    }

    pub fn attempts(&self) -> usize {
        self.broker.borrow().remotes.len()
    }

    /// PUBLISH packets across every connection so far.
    pub fn all_publishes(&self) -> Vec<(String, Vec<u8>)> {
        self.broker
            .borrow()
            .wires
            .iter()
            .flat_map(|w| w.borrow().publishes())
            .collect()
    }
}

impl Connect for MockConnector {
    type Connection = MockConnection;
    type Error = Error;

    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error> {
        let mut broker = self.broker.borrow_mut();
        broker.remotes.push(remote.to_string());
        if broker.refusals > 0 {
            broker.refusals -= 1;
            return Err(Error::ConnectionRefused);
        }
        if broker.refuse {
            return Err(Error::ConnectionRefused);
        }
        let wire = Rc::new(RefCell::new(Wire {
            open: true,
            ..Wire::default()
        }));
        broker.wires.push(wire.clone());
        Ok(MockConnection {
            wire,
            broker: self.broker.clone(),
        })
    }
}

/// A session stand-in that records what the scheduler asks of it.
#[derive(Debug)]
pub struct FakeSession<'a> {
    pub clock: &'a ManualClock,
    pub connected: bool,
    pub inbound: VecDeque<InboundEvent>,
    /// Topic, payload and publish time in milliseconds.
    pub published: Vec<(String, Vec<u8>, u64)>,
    pub disconnects: usize,
}

impl<'a> FakeSession<'a> {
    pub fn new(clock: &'a ManualClock) -> Self {
        Self {
            clock,
            connected: true,
            inbound: VecDeque::new(),
            published: Vec::new(),
            disconnects: 0,
        }
    }

    pub fn deliver(&mut self, topic: &str, payload: &[u8]) {
        self.inbound.push_back(InboundEvent::Message {
            topic: topic.try_into().unwrap(),
            payload: heapless::Vec::from_slice(payload).unwrap(),
        });
    }

    pub fn publish_times(&self) -> Vec<u64> {
        self.published.iter().map(|(_, _, at)| *at).collect()
    }
}

impl Session for FakeSession<'_> {
    fn poll(&mut self) -> heapless::Vec<InboundEvent, POLL_BATCH> {
        let mut out = heapless::Vec::new();
        while !out.is_full() {
            match self.inbound.pop_front() {
                Some(event) => out.push(event).unwrap(),
                None => break,
            }
        }
        out
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if !self.connected {
            return Err(PublishError::NotConnected);
        }
        self.published
            .push((topic.to_string(), payload.to_vec(), self.clock.now().as_millis()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.connected = false;
    }
}

/// A delay that moves a [`ManualClock`] instead of sleeping, and cancels
/// once the clock reaches `stop_at_ms`.
pub struct ClockDelay<'a> {
    pub clock: &'a ManualClock,
    pub token: &'a gpslink::link::CancellationToken,
    pub stop_at_ms: u64,
    pub sleeps: Cell<usize>,
}

impl embedded_hal::delay::DelayNs for ClockDelay<'_> {
    fn delay_ns(&mut self, ns: u32) {
        self.delay_ms(ns.div_ceil(1_000_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.sleeps.set(self.sleeps.get() + 1);
        self.clock.advance(Duration::from_millis(u64::from(ms)));
        if self.clock.now().as_millis() >= self.stop_at_ms {
            self.token.cancel();
        }
    }
}
