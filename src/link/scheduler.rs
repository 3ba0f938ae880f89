//! The Publish Scheduler.
//!
//! Each [`Scheduler::tick`] first drains the session's inbound events, then
//! publishes at most one sample if the session is connected and the
//! deadline has been reached. Deadlines live on the monotonic [`Clock`] and
//! advance by exactly one period per publish attempt, so processing jitter
//! never accumulates into drift. Slots missed entirely (a tick arriving
//! more than a full period late) are dropped, never replayed as a burst.
//!
//! While the session is down the deadline stays where it was, so the first
//! tick after reconnecting publishes straight away. Slots that fell inside
//! the outage are passed over without being counted as missed; they are
//! already accounted for in [`LinkStats::skipped_ticks`].

use super::{CancellationToken, InboundEvent, Session};
use crate::config::Topics;
use crate::network::mqtt::MAX_TOPIC_LEN;
use crate::telemetry::{Codec, SampleSource, TelemetrySample};
use crate::time::{Clock, Instant};
use core::fmt;
use core::time::Duration;
use embedded_hal::delay::DelayNs;
use heapless::String;
use log::{debug, error, info, warn};

/// Longest single sleep in [`Scheduler::run`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Receives every sample decoded from the inbound topic.
pub trait SampleHandler {
    /// Called once per decoded sample.
    fn on_sample(&mut self, topic: &str, sample: &TelemetrySample);
}

impl<F> SampleHandler for F
where
    F: FnMut(&str, &TelemetrySample),
{
    fn on_sample(&mut self, topic: &str, sample: &TelemetrySample) {
        self(topic, sample)
    }
}

/// What a tick did about publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickOutcome {
    /// A sample was published.
    Published,
    /// A sample was due but encoding or publishing failed; it is dropped.
    PublishFailed,
    /// A publish was due but the source had no sample.
    NoSample,
    /// Connected, but the deadline has not been reached.
    NotDue,
    /// Not connected; nothing was attempted.
    Disconnected,
}

/// Counters kept across ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    /// Samples handed to the session successfully.
    pub published: u32,
    /// Due samples lost to encode or publish errors.
    pub publish_failures: u32,
    /// Ticks skipped because the session was down.
    pub skipped_ticks: u32,
    /// Due ticks on which the source had nothing.
    pub empty_ticks: u32,
    /// Publish slots dropped after a stall.
    pub missed_slots: u32,
    /// QoS 1 acknowledgements from the broker.
    pub delivered: u32,
    /// Inbound samples decoded and handed to the handler.
    pub received: u32,
    /// Inbound payloads that failed to decode.
    pub malformed: u32,
    /// Inbound messages on a topic other than the subscribed one.
    pub unexpected_topic: u32,
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "published={} publish_failures={} skipped_ticks={} empty_ticks={} missed_slots={} delivered={} received={} malformed={} unexpected_topic={}",
            self.published,
            self.publish_failures,
            self.skipped_ticks,
            self.empty_ticks,
            self.missed_slots,
            self.delivered,
            self.received,
            self.malformed,
            self.unexpected_topic
        )
    }
}

/// Fixed-period publisher. `S` produces samples, `D` encodes them and `C`
/// supplies monotonic time.
#[derive(Debug)]
pub struct Scheduler<S, D, C> {
    source: S,
    codec: D,
    clock: C,
    period: Duration,
    poll_interval: Duration,
    publish_topic: String<MAX_TOPIC_LEN>,
    inbound_topic: String<MAX_TOPIC_LEN>,
    deadline: Option<Instant>,
    outage: bool,
    stats: LinkStats,
}

impl<S: SampleSource, D: Codec, C: Clock> Scheduler<S, D, C> {
    /// A scheduler publishing on `topics.publish` every `period` and
    /// decoding messages from `topics.subscribe`.
    pub fn new(source: S, codec: D, clock: C, topics: &Topics, period: Duration) -> Self {
        Self {
            source,
            codec,
            clock,
            period,
            poll_interval: DEFAULT_POLL_INTERVAL.min(period),
            publish_topic: topics.publish.clone(),
            inbound_topic: topics.subscribe.clone(),
            deadline: None,
            outage: false,
            stats: LinkStats::default(),
        }
    }

    /// Cap each sleep of [`run`](Self::run) at `interval`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// The next publish deadline, once the first connected tick set it.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Counters so far.
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// The sample source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run one tick. See the [module documentation](self).
    pub fn tick<L, H>(&mut self, session: &mut L, handler: &mut H) -> TickOutcome
    where
        L: Session,
        H: SampleHandler,
    {
        for event in session.poll() {
            self.handle_event(event, handler);
        }

        if !session.is_connected() {
            self.stats.skipped_ticks += 1;
            self.outage = true;
            return TickOutcome::Disconnected;
        }

        let resumed = core::mem::take(&mut self.outage);
        let now = self.clock.now();
        let deadline = *self.deadline.get_or_insert(now);
        if now < deadline {
            return TickOutcome::NotDue;
        }
        self.deadline = Some(self.next_deadline(deadline, now, resumed));

        let Some(sample) = self.source.next_sample() else {
            debug!("no sample available");
            self.stats.empty_ticks += 1;
            return TickOutcome::NoSample;
        };
        info!("generated {sample}");

        let payload = match self.codec.encode(&sample) {
            Ok(payload) => payload,
            Err(err) => {
                error!("cannot encode sample: {err}");
                self.stats.publish_failures += 1;
                return TickOutcome::PublishFailed;
            }
        };
        match session.publish(&self.publish_topic, &payload) {
            Ok(()) => {
                debug!("published {} bytes to {}", payload.len(), self.publish_topic);
                self.stats.published += 1;
                TickOutcome::Published
            }
            Err(err) => {
                warn!("sample dropped: {err}");
                self.stats.publish_failures += 1;
                TickOutcome::PublishFailed
            }
        }
    }

    /// Tick until `token` is cancelled, then disconnect the session once.
    ///
    /// Between ticks the loop redials the session when it reports
    /// [`Session::reconnect_due`], then sleeps on `delay` until the next
    /// deadline, but never longer than the poll interval, so inbound traffic
    /// is serviced and cancellation is noticed promptly.
    pub fn run<L, H, Y>(
        &mut self,
        session: &mut L,
        handler: &mut H,
        delay: &mut Y,
        token: &CancellationToken,
    ) -> LinkStats
    where
        L: Session,
        H: SampleHandler,
        Y: DelayNs,
    {
        while !token.is_cancelled() {
            self.tick(session, handler);
            if token.is_cancelled() {
                break;
            }
            if session.reconnect_due() {
                match session.reconnect() {
                    Ok(()) => continue,
                    Err(err) => warn!("reconnect failed: {err}"),
                }
            }

            let pause = match self.deadline {
                Some(deadline) if session.is_connected() => deadline
                    .saturating_duration_since(self.clock.now())
                    .min(self.poll_interval),
                _ => self.poll_interval,
            };
            let pause_ms = u32::try_from(pause.as_millis()).unwrap_or(u32::MAX);
            if pause_ms > 0 {
                delay.delay_ms(pause_ms);
            }
        }

        info!("shutting down");
        session.disconnect();
        info!("link statistics: {}", self.stats);
        self.stats
    }

    fn next_deadline(&mut self, deadline: Instant, now: Instant, resumed: bool) -> Instant {
        let next = deadline + self.period;
        if next > now {
            return next;
        }
        let period_ms = self.period.as_millis().max(1);
        let behind_ms = now.saturating_duration_since(next).as_millis();
        let missed = behind_ms / period_ms + 1;
        if resumed {
            debug!("resuming after outage; passing over {missed} slot(s)");
        } else {
            warn!("publish loop stalled; dropping {missed} slot(s)");
            self.stats.missed_slots = self
                .stats
                .missed_slots
                .saturating_add(u32::try_from(missed).unwrap_or(u32::MAX));
        }
        let skip = u64::try_from(missed.saturating_mul(period_ms)).unwrap_or(u64::MAX);
        next + Duration::from_millis(skip)
    }

    fn handle_event<H: SampleHandler>(&mut self, event: InboundEvent, handler: &mut H) {
        match event {
            InboundEvent::Connected => info!("link connected"),
            InboundEvent::Disconnected => warn!("link disconnected"),
            InboundEvent::Delivered(packet_id) => {
                debug!("broker acknowledged publish {packet_id}");
                self.stats.delivered += 1;
            }
            InboundEvent::Message { topic, payload } => {
                if topic != self.inbound_topic {
                    warn!("unexpected topic {topic} ({} bytes)", payload.len());
                    self.stats.unexpected_topic += 1;
                    return;
                }
                match self.codec.decode(&payload) {
                    Ok(sample) => {
                        info!("received {sample}");
                        self.stats.received += 1;
                        handler.on_sample(&topic, &sample);
                    }
                    Err(err) => {
                        warn!("{err} on {topic} ({} bytes)", payload.len());
                        self.stats.malformed += 1;
                    }
                }
            }
        }
    }
}
