use crate::config::TraceConfig;
use crate::dns_resolver::ReverseResolver;
use crate::error::Result;
use crate::messages::TraceEvent;
use crate::session::{Probe, ProbeOutcome, ProbeSession};
use crate::socket::SocketFactory;
use std::net::Ipv4Addr;
use std::sync::mpsc::Sender;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// The result of one query sent at a given TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Responded {
        addr: Ipv4Addr,
        /// Reverse-resolved name of `addr`, when symbolic output was requested and a name exists.
        hostname: Option<String>,
        rtt: Duration,
    },
    Lost,
}

impl QueryResult {
    #[must_use]
    pub const fn addr(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Responded { addr, .. } => Some(*addr),
            Self::Lost => None,
        }
    }
}

/// The queries sent at one TTL, in the order they were sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopResult {
    pub ttl: u8,
    pub queries: Vec<QueryResult>,
}

impl HopResult {
    /// True if every answered query was answered by the same host.
    ///
    /// Lost queries do not break uniformity, and a hop with no answers is uniform.
    #[must_use]
    pub fn is_uniform(&self) -> bool {
        let mut addrs = self.queries.iter().filter_map(QueryResult::addr);
        addrs
            .next()
            .is_none_or(|first| addrs.all(|addr| addr == first))
    }

    /// The single host answering this hop, if the hop is uniform and answered at all.
    #[must_use]
    pub fn responder(&self) -> Option<Ipv4Addr> {
        if self.is_uniform() {
            self.queries.iter().find_map(QueryResult::addr)
        } else {
            None
        }
    }

    #[must_use]
    pub fn loss_count(&self) -> usize {
        self.queries
            .iter()
            .filter(|q| **q == QueryResult::Lost)
            .count()
    }

    /// Percentage of queries at this hop that went unanswered.
    #[must_use]
    pub fn loss_percent(&self) -> f64 {
        if self.queries.is_empty() {
            return 0.0;
        }
        self.loss_count() as f64 / self.queries.len() as f64 * 100.0
    }

    /// True if any query was answered by `destination`.
    #[must_use]
    pub fn reached(&self, destination: Ipv4Addr) -> bool {
        self.queries.iter().any(|q| q.addr() == Some(destination))
    }
}

/// Discovers the hops to a destination by sweeping the TTL of UDP probes.
pub struct Tracer<F, R> {
    config: TraceConfig,
    sockets: F,
    resolver: R,
    events: Sender<TraceEvent>,
    next_port: u16,
}

impl<F: SocketFactory, R: ReverseResolver> Tracer<F, R> {
    pub fn new(
        config: TraceConfig,
        sockets: F,
        resolver: R,
        events: Sender<TraceEvent>,
    ) -> Result<Self> {
        config.validate()?;
        let next_port = config.base_port;
        Ok(Self {
            config,
            sockets,
            resolver,
            events,
            next_port,
        })
    }

    /// Probe each TTL from `first_ttl` to `max_ttl`, stopping after the hop where the
    /// destination answers.
    ///
    /// Failing to open the sockets for a TTL ends the sweep with an error.
    #[instrument(skip_all, level = "trace")]
    pub fn run(&mut self) -> Result<Vec<HopResult>> {
        self.emit(TraceEvent::Started {
            destination: self.config.destination,
            max_ttl: self.config.max_ttl,
            packet_size: self.config.payload_size,
        });
        let mut hops = Vec::new();
        for ttl in self.config.first_ttl..=self.config.max_ttl {
            let hop = self.probe_hop(ttl)?;
            let reached = hop.reached(self.config.destination);
            self.emit(TraceEvent::Hop {
                hop: hop.clone(),
                show_summary: self.config.show_summary,
            });
            hops.push(hop);
            if reached {
                debug!(ttl, "destination reached");
                break;
            }
        }
        Ok(hops)
    }

    fn probe_hop(&mut self, ttl: u8) -> Result<HopResult> {
        let queries = {
            let socket = self.sockets.open()?;
            let mut session = ProbeSession::new(socket, self.config.destination);
            (0..self.config.nqueries)
                .map(|_| self.query(&mut session, ttl))
                .collect::<Vec<_>>()
        };
        let mut hop = HopResult { ttl, queries };
        if !self.config.numeric {
            self.resolve_names(&mut hop);
        }
        Ok(hop)
    }

    fn query(&mut self, session: &mut ProbeSession<F::Socket>, ttl: u8) -> QueryResult {
        let probe = Probe::udp(
            self.config.identification,
            self.next_port,
            self.config.payload_size,
        );
        self.next_port = self.next_port.wrapping_add(1);
        if let Err(err) = session.set_ttl(ttl) {
            warn!(%err, ttl, "unable to set ttl");
            return QueryResult::Lost;
        }
        match session.send_and_wait(&probe, self.config.timeout) {
            ProbeOutcome::Reply(reply) => QueryResult::Responded {
                addr: reply.responder(),
                hostname: None,
                rtt: reply.round_trip(),
            },
            ProbeOutcome::Timeout => QueryResult::Lost,
            ProbeOutcome::SendFailed(err) => {
                warn!(%err, ttl, "probe not sent");
                QueryResult::Lost
            }
        }
    }

    /// Resolve the hop's responder once if the hop is uniform, otherwise each responder separately.
    fn resolve_names(&self, hop: &mut HopResult) {
        let uniform_name = hop.responder().map(|addr| self.resolver.reverse(addr));
        for query in &mut hop.queries {
            if let QueryResult::Responded { addr, hostname, .. } = query {
                *hostname = match &uniform_name {
                    Some(name) => name.clone(),
                    None => self.resolver.reverse(*addr),
                };
            }
        }
    }

    fn emit(&self, event: TraceEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::socket::MockProbeSocket;
    use std::cell::Cell;
    use std::io;
    use std::sync::mpsc;
    use test_case::test_case;

    const DEST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);
    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn responded(addr: Ipv4Addr) -> QueryResult {
        QueryResult::Responded {
            addr,
            hostname: None,
            rtt: Duration::from_millis(1),
        }
    }

    fn hop(queries: &[Option<Ipv4Addr>]) -> HopResult {
        HopResult {
            ttl: 1,
            queries: queries
                .iter()
                .map(|q| q.map_or(QueryResult::Lost, responded))
                .collect(),
        }
    }

    #[test_case(&[Some(A), Some(A), Some(A)] => (true, Some(A)); "all same")]
    #[test_case(&[Some(A), None, Some(A)] => (true, Some(A)); "timeouts do not break uniformity")]
    #[test_case(&[None, Some(A), None] => (true, Some(A)); "single responder among timeouts")]
    #[test_case(&[None, None, None] => (true, None); "all lost")]
    #[test_case(&[Some(A), Some(B), Some(A)] => (false, None); "mixed responders")]
    #[test_case(&[None, Some(A), Some(B)] => (false, None); "mixed responders with timeout")]
    fn test_uniformity(queries: &[Option<Ipv4Addr>]) -> (bool, Option<Ipv4Addr>) {
        let hop = hop(queries);
        (hop.is_uniform(), hop.responder())
    }

    #[test_case(&[Some(A), Some(A), Some(A)] => 0; "none lost")]
    #[test_case(&[None, Some(A), None] => 2; "two lost")]
    #[test_case(&[None, None, None] => 3; "all lost")]
    fn test_loss_count(queries: &[Option<Ipv4Addr>]) -> usize {
        hop(queries).loss_count()
    }

    #[test]
    fn test_loss_percent() {
        let loss = hop(&[None, Some(A), None]).loss_percent();
        assert!((loss - 66.666_666).abs() < 0.001);
        assert_eq!(0.0, hop(&[]).loss_percent());
        assert_eq!(100.0, hop(&[None]).loss_percent());
    }

    #[test]
    fn test_reached() {
        assert!(hop(&[None, Some(DEST)]).reached(DEST));
        assert!(!hop(&[Some(A), None]).reached(DEST));
    }

    struct Names;

    impl ReverseResolver for Names {
        fn reverse(&self, addr: Ipv4Addr) -> Option<String> {
            (addr == A).then(|| "router-a.example".to_string())
        }
    }

    struct CountingNames<'a>(&'a Cell<usize>);

    impl ReverseResolver for CountingNames<'_> {
        fn reverse(&self, addr: Ipv4Addr) -> Option<String> {
            self.0.set(self.0.get() + 1);
            Some(addr.to_string())
        }
    }

    struct NoSockets;

    impl SocketFactory for NoSockets {
        type Socket = MockProbeSocket;

        fn open(&mut self) -> io::Result<MockProbeSocket> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    struct SilentSockets;

    impl SocketFactory for SilentSockets {
        type Socket = MockProbeSocket;

        fn open(&mut self) -> io::Result<MockProbeSocket> {
            let mut mocket = MockProbeSocket::new();
            mocket.expect_set_ttl().returning(|_| Ok(()));
            mocket.expect_send_to().returning(|_, _| Ok(()));
            mocket.expect_local_port().return_const(Some(40000_u16));
            mocket.expect_recv_timeout().returning(|_, _| Ok(None));
            Ok(mocket)
        }
    }

    fn config() -> TraceConfig {
        let mut cfg = TraceConfig::new(DEST, 0x1234);
        cfg.max_ttl = 4;
        cfg.timeout = Duration::from_millis(5);
        cfg.numeric = true;
        cfg
    }

    #[test]
    fn test_resolve_names_uniform_hop_resolves_once() {
        let lookups = Cell::new(0);
        let (tx, _rx) = mpsc::channel();
        let tracer = Tracer::new(config(), SilentSockets, CountingNames(&lookups), tx).unwrap();
        let mut uniform = hop(&[Some(A), None, Some(A)]);
        tracer.resolve_names(&mut uniform);
        assert_eq!(1, lookups.get());
        assert_eq!(
            QueryResult::Responded {
                addr: A,
                hostname: Some(A.to_string()),
                rtt: Duration::from_millis(1)
            },
            uniform.queries[2]
        );
    }

    #[test]
    fn test_resolve_names_mixed_hop_resolves_each() {
        let (tx, _rx) = mpsc::channel();
        let tracer = Tracer::new(config(), SilentSockets, Names, tx).unwrap();
        let mut mixed = hop(&[Some(A), Some(B), None]);
        tracer.resolve_names(&mut mixed);
        let names = mixed
            .queries
            .iter()
            .map(|q| match q {
                QueryResult::Responded { hostname, .. } => hostname.clone(),
                QueryResult::Lost => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            vec![Some("router-a.example".to_string()), None, None],
            names
        );
    }

    #[test]
    fn test_unanswered_sweep_runs_to_max_ttl() {
        let (tx, rx) = mpsc::channel();
        let mut tracer = Tracer::new(config(), SilentSockets, Names, tx).unwrap();
        let hops = tracer.run().unwrap();
        let ttls = hops.iter().map(|h| h.ttl).collect::<Vec<_>>();
        assert_eq!(vec![1, 2, 3, 4], ttls);
        assert!(hops.iter().all(|h| h.loss_count() == 3));
        assert_eq!(5, rx.try_iter().count());
    }

    #[test]
    fn test_socket_open_failure_is_fatal() {
        let (tx, _rx) = mpsc::channel();
        let mut tracer = Tracer::new(config(), NoSockets, Names, tx).unwrap();
        assert!(matches!(tracer.run(), Err(Error::Io(_))));
    }

    #[test]
    fn test_ports_advance_per_query() {
        struct PortCheck(u16);

        impl SocketFactory for PortCheck {
            type Socket = MockProbeSocket;

            fn open(&mut self) -> io::Result<MockProbeSocket> {
                let mut mocket = MockProbeSocket::new();
                mocket.expect_set_ttl().returning(|_| Ok(()));
                let mut seq = mockall::Sequence::new();
                for _ in 0..3 {
                    let port = self.0;
                    mocket
                        .expect_send_to()
                        .withf(move |_, target| target.port() == port)
                        .times(1)
                        .in_sequence(&mut seq)
                        .returning(|_, _| Ok(()));
                    self.0 += 1;
                }
                mocket.expect_local_port().return_const(Some(40000_u16));
                mocket.expect_recv_timeout().returning(|_, _| Ok(None));
                Ok(mocket)
            }
        }

        let (tx, _rx) = mpsc::channel();
        let mut cfg = config();
        cfg.max_ttl = 2;
        let mut tracer = Tracer::new(cfg, PortCheck(33434), Names, tx).unwrap();
        assert_eq!(2, tracer.run().unwrap().len());
    }

    #[test]
    fn test_first_ttl_respected() {
        let (tx, _rx) = mpsc::channel();
        let mut cfg = config();
        cfg.first_ttl = 3;
        let mut tracer = Tracer::new(cfg, SilentSockets, Names, tx).unwrap();
        let hops = tracer.run().unwrap();
        let ttls = hops.iter().map(|h| h.ttl).collect::<Vec<_>>();
        assert_eq!(vec![3, 4], ttls);
    }
}
