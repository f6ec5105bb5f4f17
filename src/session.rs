use crate::error::{Error, Result};
use crate::packet::{self, IPV4_HEADER_LEN, IcmpHeader, IpHeader};
use crate::socket::ProbeSocket;
use pnet::packet::icmp::IcmpTypes;
use pnet::packet::ip::IpNextHeaderProtocols;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};
use tracing::{instrument, trace, warn};

/// Size of the buffer a received datagram is copied into; longer datagrams are truncated.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// How a probe is sent and how its reply is recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// An ICMP echo request, answered by an echo reply carrying the same identification and
    /// sequence.
    Echo,
    /// A UDP datagram to port `sequence`, answered by an ICMP error quoting it with the
    /// socket's local port as source.
    Udp,
}

/// A single probe.
#[derive(Debug, Clone)]
pub struct Probe {
    pub identification: u16,
    pub sequence: u16,
    pub kind: ProbeKind,
    packet: Vec<u8>,
}

impl Probe {
    /// An ICMP echo request probe.
    pub fn echo(identification: u16, sequence: u16, payload_size: usize) -> Result<Self> {
        Ok(Self {
            identification,
            sequence,
            kind: ProbeKind::Echo,
            packet: packet::encode_icmp_echo(identification, sequence, payload_size)?,
        })
    }

    /// A UDP probe targeting `port`, which doubles as its sequence.
    #[must_use]
    pub fn udp(identification: u16, port: u16, payload_size: usize) -> Self {
        Self {
            identification,
            sequence: port,
            kind: ProbeKind::Udp,
            packet: packet::encode_udp_probe(payload_size),
        }
    }

    /// The bytes handed to the socket.
    #[must_use]
    pub fn packet(&self) -> &[u8] {
        &self.packet
    }

    fn target(&self, destination: Ipv4Addr) -> SocketAddrV4 {
        match self.kind {
            ProbeKind::Echo => SocketAddrV4::new(destination, 0),
            ProbeKind::Udp => SocketAddrV4::new(destination, self.sequence),
        }
    }
}

/// A reply matched to a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReply {
    pub sent_at: Instant,
    pub received_at: Instant,
    /// Length of the ICMP message, as announced by the IP header.
    pub bytes: usize,
    pub ip: IpHeader,
    pub icmp: IcmpHeader,
}

impl ProbeReply {
    #[must_use]
    pub fn round_trip(&self) -> Duration {
        self.received_at.saturating_duration_since(self.sent_at)
    }

    /// The host that sent the reply.
    #[must_use]
    pub const fn responder(&self) -> Ipv4Addr {
        self.ip.source
    }
}

/// The single resolution of a probe.
#[derive(Debug)]
pub enum ProbeOutcome {
    Reply(ProbeReply),
    Timeout,
    SendFailed(Error),
}

/// Where a session is in the exchange of its most recent probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sent,
    Replied,
    TimedOut,
    SendFailed,
}

/// Sends probes to one destination over a [`ProbeSocket`] and waits for the matching replies.
///
/// One probe is in flight at a time. Datagrams that do not answer the
/// in-flight probe are discarded and the wait resumes with whatever time is
/// left, so replies meant for another process sharing the host never end a
/// wait early.
pub struct ProbeSession<S> {
    socket: S,
    destination: Ipv4Addr,
    state: SessionState,
    buf: Vec<u8>,
}

impl<S: ProbeSocket> ProbeSession<S> {
    pub fn new(socket: S, destination: Ipv4Addr) -> Self {
        Self {
            socket,
            destination,
            state: SessionState::Idle,
            buf: vec![0; RECV_BUFFER_SIZE],
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_ttl(&mut self, ttl: u8) -> Result<()> {
        Ok(self.socket.set_ttl(ttl)?)
    }

    /// Send `probe` and wait up to `deadline` for its reply.
    #[instrument(skip(self, probe), fields(sequence = probe.sequence), level = "trace")]
    pub fn send_and_wait(&mut self, probe: &Probe, deadline: Duration) -> ProbeOutcome {
        self.state = SessionState::Idle;
        let outcome = self.exchange(probe, deadline);
        self.state = match &outcome {
            ProbeOutcome::Reply(_) => SessionState::Replied,
            ProbeOutcome::Timeout => SessionState::TimedOut,
            ProbeOutcome::SendFailed(_) => SessionState::SendFailed,
        };
        trace!(state = ?self.state);
        outcome
    }

    fn exchange(&mut self, probe: &Probe, deadline: Duration) -> ProbeOutcome {
        if let Err(err) = self
            .socket
            .send_to(probe.packet(), probe.target(self.destination))
        {
            return ProbeOutcome::SendFailed(Error::SendFailure(err));
        }
        let sent_at = Instant::now();
        let source_port = match probe.kind {
            ProbeKind::Echo => None,
            ProbeKind::Udp => self.socket.local_port(),
        };
        let expires_at = sent_at + deadline;
        self.state = SessionState::Sent;
        loop {
            let remaining = expires_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ProbeOutcome::Timeout;
            }
            match self.socket.recv_timeout(&mut self.buf, remaining) {
                Ok(Some(len)) => {
                    let received_at = Instant::now();
                    match self.accept(probe, source_port, &self.buf[..len]) {
                        Ok(Some((ip, icmp))) => {
                            return ProbeOutcome::Reply(ProbeReply {
                                sent_at,
                                received_at,
                                bytes: usize::from(ip.total_length)
                                    .saturating_sub(IPV4_HEADER_LEN),
                                ip,
                                icmp,
                            });
                        }
                        Ok(None) => trace!("discarding datagram for another probe"),
                        Err(err) => trace!(%err, "discarding undecodable datagram"),
                    }
                }
                Ok(None) => return ProbeOutcome::Timeout,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(%err, "receive failed, abandoning probe");
                    return ProbeOutcome::Timeout;
                }
            }
        }
    }

    fn accept(
        &self,
        probe: &Probe,
        source_port: Option<u16>,
        datagram: &[u8],
    ) -> Result<Option<(IpHeader, IcmpHeader)>> {
        let (ip, icmp, payload) = packet::decode_ip_and_icmp(datagram)?;
        let matched = match probe.kind {
            ProbeKind::Echo => is_echo_reply(probe, &icmp),
            ProbeKind::Udp => {
                let Some(source_port) = source_port else {
                    return Ok(None);
                };
                is_udp_response(probe, self.destination, source_port, &icmp, payload)?
            }
        };
        Ok(matched.then_some((ip, icmp)))
    }
}

fn is_echo_reply(probe: &Probe, icmp: &IcmpHeader) -> bool {
    icmp.icmp_type == IcmpTypes::EchoReply
        && icmp.identification == probe.identification
        && icmp.sequence == probe.sequence
}

fn is_udp_response(
    probe: &Probe,
    destination: Ipv4Addr,
    source_port: u16,
    icmp: &IcmpHeader,
    payload: &[u8],
) -> Result<bool> {
    if icmp.icmp_type != IcmpTypes::TimeExceeded
        && icmp.icmp_type != IcmpTypes::DestinationUnreachable
    {
        return Ok(false);
    }
    let quoted = packet::decode_quoted_udp(payload)?;
    Ok(quoted.ip.protocol == IpNextHeaderProtocols::Udp
        && quoted.ip.destination == destination
        && quoted.source_port == source_port
        && quoted.destination_port == probe.sequence)
}
