use crate::tracer::HopResult;
use std::net::Ipv4Addr;
use std::time::Duration;

/// A record emitted by [`Pinger`](crate::pinger::Pinger) for the output side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingEvent {
    Started {
        destination: Ipv4Addr,
        payload_size: usize,
    },
    Reply {
        bytes: usize,
        from: Ipv4Addr,
        sequence: u16,
        ttl: u8,
        rtt: Duration,
    },
    Timeout {
        sequence: u16,
    },
    /// The probe could not be sent; the run ends after this record.
    Unreachable {
        sequence: u16,
        reason: String,
    },
}

/// A record emitted by [`Tracer`](crate::tracer::Tracer) for the output side.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Started {
        destination: Ipv4Addr,
        max_ttl: u8,
        packet_size: usize,
    },
    Hop {
        hop: HopResult,
        show_summary: bool,
    },
}
