//! ICMP echo (ping) and UDP/ICMP hop discovery (traceroute) over IPv4 raw sockets.
//!
//! [`pinger::Pinger`] and [`tracer::Tracer`] drive a [`session::ProbeSession`],
//! which sends one probe at a time over a [`socket::ProbeSocket`] and waits for
//! the reply that answers it. Results are streamed as [`messages`] records.

pub mod checksum;
pub mod config;
pub mod dns_resolver;
pub mod error;
pub mod messages;
pub mod packet;
pub mod pinger;
pub mod session;
pub mod socket;
pub mod tracer;

pub use error::{Error, Result};
