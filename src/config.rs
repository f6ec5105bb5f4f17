use crate::error::{Error, Result};
use crate::packet::MAX_PAYLOAD_LEN;
use std::net::Ipv4Addr;
use std::process;
use std::time::Duration;

pub const DEFAULT_PING_PAYLOAD_SIZE: usize = 56;
pub const DEFAULT_PING_WAIT: Duration = Duration::from_secs(1);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(1);

pub const DEFAULT_TRACE_FIRST_TTL: u8 = 1;
pub const DEFAULT_TRACE_MAX_TTL: u8 = 30;
pub const DEFAULT_TRACE_QUERIES: u8 = 3;
pub const DEFAULT_TRACE_PAYLOAD_SIZE: usize = 60;
pub const DEFAULT_TRACE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TRACE_BASE_PORT: u16 = 33434;

/// An identification unique among the processes currently running on this host, modulo 2^16.
#[must_use]
pub fn process_identification() -> u16 {
    (process::id() & 0xFFFF) as u16
}

/// Ping run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingConfig {
    pub destination: Ipv4Addr,
    /// Number of probes to send, or `None` to probe until interrupted.
    pub count: Option<u32>,
    /// Pause between the resolution of one probe and the sending of the next.
    pub wait: Duration,
    pub payload_size: usize,
    /// How long to wait for each reply.
    pub timeout: Duration,
    pub identification: u16,
}

impl PingConfig {
    #[must_use]
    pub const fn new(destination: Ipv4Addr, identification: u16) -> Self {
        Self {
            destination,
            count: None,
            wait: DEFAULT_PING_WAIT,
            payload_size: DEFAULT_PING_PAYLOAD_SIZE,
            timeout: DEFAULT_PING_TIMEOUT,
            identification,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_payload_size(self.payload_size)?;
        validate_timeout(self.timeout)
    }
}

/// Traceroute run settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    pub destination: Ipv4Addr,
    pub first_ttl: u8,
    pub max_ttl: u8,
    /// Probes sent per TTL.
    pub nqueries: u8,
    pub payload_size: usize,
    pub timeout: Duration,
    /// Target port of the first probe; each following probe targets the next port.
    pub base_port: u16,
    /// Skip reverse lookups of responders.
    pub numeric: bool,
    pub show_summary: bool,
    pub identification: u16,
}

impl TraceConfig {
    #[must_use]
    pub const fn new(destination: Ipv4Addr, identification: u16) -> Self {
        Self {
            destination,
            first_ttl: DEFAULT_TRACE_FIRST_TTL,
            max_ttl: DEFAULT_TRACE_MAX_TTL,
            nqueries: DEFAULT_TRACE_QUERIES,
            payload_size: DEFAULT_TRACE_PAYLOAD_SIZE,
            timeout: DEFAULT_TRACE_TIMEOUT,
            base_port: DEFAULT_TRACE_BASE_PORT,
            numeric: false,
            show_summary: false,
            identification,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.nqueries == 0 {
            return Err(Error::BadConfig("nqueries must be at least 1".to_string()));
        }
        if self.max_ttl == 0 {
            return Err(Error::BadConfig("max ttl must be at least 1".to_string()));
        }
        if self.first_ttl == 0 || self.first_ttl > self.max_ttl {
            return Err(Error::BadConfig(format!(
                "first ttl ({}) must be between 1 and max ttl ({})",
                self.first_ttl, self.max_ttl
            )));
        }
        validate_payload_size(self.payload_size)?;
        validate_timeout(self.timeout)
    }
}

fn validate_payload_size(payload_size: usize) -> Result<()> {
    if payload_size > MAX_PAYLOAD_LEN {
        return Err(Error::BadConfig(format!(
            "packet size {payload_size} exceeds the maximum of {MAX_PAYLOAD_LEN}"
        )));
    }
    Ok(())
}

fn validate_timeout(timeout: Duration) -> Result<()> {
    if timeout.is_zero() {
        return Err(Error::BadConfig(
            "timeout must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const DEST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);

    #[test]
    fn test_default_ping_config() {
        let cfg = PingConfig::new(DEST, 7);
        assert_eq!(None, cfg.count);
        assert_eq!(56, cfg.payload_size);
        assert_eq!(Duration::from_secs(1), cfg.wait);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_ping_payload_too_large() {
        let mut cfg = PingConfig::new(DEST, 7);
        cfg.payload_size = 65_508;
        assert!(matches!(cfg.validate(), Err(Error::BadConfig(_))));
        cfg.payload_size = 65_507;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_ping_zero_timeout() {
        let mut cfg = PingConfig::new(DEST, 7);
        cfg.timeout = Duration::ZERO;
        assert!(matches!(cfg.validate(), Err(Error::BadConfig(_))));
    }

    #[test_case(1, 30, 3 => true; "defaults")]
    #[test_case(1, 1, 1 => true; "single hop single query")]
    #[test_case(5, 5, 3 => true; "first equals max")]
    #[test_case(1, 30, 0 => false; "zero queries")]
    #[test_case(1, 0, 3 => false; "zero max ttl")]
    #[test_case(0, 30, 3 => false; "zero first ttl")]
    #[test_case(6, 5, 3 => false; "first above max")]
    fn test_trace_config_validate(first_ttl: u8, max_ttl: u8, nqueries: u8) -> bool {
        let mut cfg = TraceConfig::new(DEST, 7);
        cfg.first_ttl = first_ttl;
        cfg.max_ttl = max_ttl;
        cfg.nqueries = nqueries;
        cfg.validate().is_ok()
    }

    #[test]
    fn test_process_identification_is_stable() {
        assert_eq!(process_identification(), process_identification());
    }
}
