use crate::config::PingConfig;
use crate::error::Result;
use crate::messages::PingEvent;
use crate::session::{Probe, ProbeOutcome, ProbeSession};
use crate::socket::ProbeSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// How often an inter-probe pause checks for an interrupt.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Counters for a ping run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStatistics {
    pub transmitted: u32,
    pub received: u32,
    pub total_round_trip: Duration,
    pub min_round_trip: Option<Duration>,
    pub max_round_trip: Option<Duration>,
}

impl RunStatistics {
    /// Percentage of transmitted probes that went unanswered, 0 when nothing was transmitted.
    #[must_use]
    pub fn loss_percent(&self) -> f64 {
        if self.transmitted == 0 {
            return 0.0;
        }
        f64::from(self.transmitted - self.received) / f64::from(self.transmitted) * 100.0
    }

    #[must_use]
    pub fn average_round_trip(&self) -> Option<Duration> {
        (self.received > 0).then(|| self.total_round_trip / self.received)
    }

    fn record_reply(&mut self, rtt: Duration) {
        self.received += 1;
        self.total_round_trip += rtt;
        self.min_round_trip = Some(self.min_round_trip.map_or(rtt, |min| min.min(rtt)));
        self.max_round_trip = Some(self.max_round_trip.map_or(rtt, |max| max.max(rtt)));
    }
}

/// Sends echo probes to one destination at a fixed cadence.
pub struct Pinger<S> {
    config: PingConfig,
    session: ProbeSession<S>,
    events: Sender<PingEvent>,
}

impl<S: ProbeSocket> Pinger<S> {
    pub fn new(config: PingConfig, socket: S, events: Sender<PingEvent>) -> Result<Self> {
        config.validate()?;
        let session = ProbeSession::new(socket, config.destination);
        Ok(Self {
            config,
            session,
            events,
        })
    }

    /// Probe until `count` probes have resolved, a probe cannot be sent, or `interrupted` is set.
    ///
    /// An interrupt never abandons the in-flight probe: it is observed between
    /// probes and during the pause that follows each one.
    #[instrument(skip_all, level = "trace")]
    pub fn run(&mut self, interrupted: &AtomicBool) -> RunStatistics {
        let mut stats = RunStatistics::default();
        let mut sequence: u16 = 0;
        self.emit(PingEvent::Started {
            destination: self.config.destination,
            payload_size: self.config.payload_size,
        });
        while !interrupted.load(Ordering::SeqCst) && !self.is_complete(&stats) {
            sequence = sequence.wrapping_add(1);
            if !self.probe(sequence, &mut stats) {
                break;
            }
            if self.is_complete(&stats) || pause(self.config.wait, interrupted) {
                break;
            }
        }
        debug!(?stats, "ping run finished");
        stats
    }

    /// Send one probe and record its outcome, returning false if the run must end.
    fn probe(&mut self, sequence: u16, stats: &mut RunStatistics) -> bool {
        let probe = Probe::echo(
            self.config.identification,
            sequence,
            self.config.payload_size,
        );
        let outcome = match probe {
            Ok(probe) => self.session.send_and_wait(&probe, self.config.timeout),
            Err(err) => ProbeOutcome::SendFailed(err),
        };
        match outcome {
            ProbeOutcome::Reply(reply) => {
                stats.transmitted += 1;
                stats.record_reply(reply.round_trip());
                self.emit(PingEvent::Reply {
                    bytes: reply.bytes,
                    from: reply.responder(),
                    sequence: reply.icmp.sequence,
                    ttl: reply.ip.ttl,
                    rtt: reply.round_trip(),
                });
                true
            }
            ProbeOutcome::Timeout => {
                stats.transmitted += 1;
                self.emit(PingEvent::Timeout { sequence });
                true
            }
            ProbeOutcome::SendFailed(err) => {
                warn!(%err, sequence, "ending run");
                self.emit(PingEvent::Unreachable {
                    sequence,
                    reason: err.to_string(),
                });
                false
            }
        }
    }

    fn is_complete(&self, stats: &RunStatistics) -> bool {
        self.config
            .count
            .is_some_and(|count| stats.transmitted >= count)
    }

    fn emit(&self, event: PingEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// Sleep for `wait`, returning early with true if `interrupted` becomes set.
fn pause(wait: Duration, interrupted: &AtomicBool) -> bool {
    let until = Instant::now() + wait;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return true;
        }
        let remaining = until.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        thread::sleep(remaining.min(INTERRUPT_POLL));
    }
}
