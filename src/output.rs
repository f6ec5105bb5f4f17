use crossterm::ExecutableCommand;
use crossterm::style::Print;
use pingtrace::messages::{PingEvent, TraceEvent};
use pingtrace::pinger::RunStatistics;
use pingtrace::tracer::{HopResult, QueryResult};
use std::io;
use std::net::Ipv4Addr;
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub fn start_ping_printer(host: String, rx: Receiver<PingEvent>) -> JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            print_line(&render_ping_event(&host, &event))?;
        }
        Ok(())
    })
}

pub fn start_trace_printer(host: String, rx: Receiver<TraceEvent>) -> JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            let line = match event {
                TraceEvent::Started {
                    destination,
                    max_ttl,
                    packet_size,
                } => format!(
                    "traceroute to {host} ({destination}), {max_ttl} hops max, \
                     {packet_size} byte packets"
                ),
                TraceEvent::Hop { hop, show_summary } => render_hop(&hop, show_summary),
            };
            print_line(&line)?;
        }
        Ok(())
    })
}

pub fn print_ping_statistics(host: &str, stats: &RunStatistics) -> io::Result<()> {
    print_line(&format!("--- {host} ping statistics ---"))?;
    print_line(&format!(
        "{} packets transmitted, {} packets received, {:.1}% packet loss",
        stats.transmitted,
        stats.received,
        stats.loss_percent()
    ))?;
    if let (Some(min), Some(avg), Some(max)) = (
        stats.min_round_trip,
        stats.average_round_trip(),
        stats.max_round_trip,
    ) {
        print_line(&format!(
            "round-trip min/avg/max = {:.3}/{:.3}/{:.3} ms",
            millis(min),
            millis(avg),
            millis(max)
        ))?;
    }
    Ok(())
}

fn print_line(line: &str) -> io::Result<()> {
    io::stdout().execute(Print(format!("{line}\n")))?;
    Ok(())
}

fn render_ping_event(host: &str, event: &PingEvent) -> String {
    match event {
        PingEvent::Started {
            destination,
            payload_size,
        } => format!("PING {host} ({destination}): {payload_size} data bytes"),
        PingEvent::Reply {
            bytes,
            from,
            sequence,
            ttl,
            rtt,
        } => format!(
            "{bytes} bytes from {from}: icmp_seq={sequence} ttl={ttl} time={:.3} ms",
            millis(*rtt)
        ),
        PingEvent::Timeout { sequence } => format!("Request timeout for icmp_seq {sequence}"),
        PingEvent::Unreachable { sequence, reason } => {
            format!("ping: icmp_seq {sequence}: {reason}")
        }
    }
}

/// One line per hop: a uniform hop names its responder once, a mixed hop names the responder
/// of every query.
fn render_hop(hop: &HopResult, show_summary: bool) -> String {
    let mut parts = vec![format!("{:2}", hop.ttl)];
    let uniform = hop.responder().is_some();
    if uniform {
        let named = hop.queries.iter().find_map(|query| match query {
            QueryResult::Responded { addr, hostname, .. } => {
                Some(render_addr(*addr, hostname.as_deref()))
            }
            QueryResult::Lost => None,
        });
        parts.extend(named);
    }
    for query in &hop.queries {
        match query {
            QueryResult::Lost => parts.push("*".to_string()),
            QueryResult::Responded { addr, hostname, rtt } => {
                if !uniform {
                    parts.push(render_addr(*addr, hostname.as_deref()));
                }
                parts.push(format!("{:.3} ms", millis(*rtt)));
            }
        }
    }
    if show_summary {
        let loss = (hop.loss_percent() * 100.0).round() / 100.0;
        parts.push(format!("({loss}% loss)"));
    }
    parts.join(" ")
}

fn render_addr(addr: Ipv4Addr, hostname: Option<&str>) -> String {
    match hostname {
        Some(name) => format!("{name} ({addr})"),
        None => addr.to_string(),
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn responded(addr: Ipv4Addr, hostname: Option<&str>, ms: u64) -> QueryResult {
        QueryResult::Responded {
            addr,
            hostname: hostname.map(str::to_string),
            rtt: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_render_uniform_hop() {
        let hop = HopResult {
            ttl: 3,
            queries: vec![
                responded(A, Some("gw.example"), 1),
                QueryResult::Lost,
                responded(A, Some("gw.example"), 2),
            ],
        };
        assert_eq!(
            " 3 gw.example (10.0.0.1) 1.000 ms * 2.000 ms",
            render_hop(&hop, false)
        );
    }

    #[test]
    fn test_render_mixed_hop() {
        let hop = HopResult {
            ttl: 12,
            queries: vec![responded(A, None, 1), responded(B, None, 3), QueryResult::Lost],
        };
        assert_eq!(
            "12 10.0.0.1 1.000 ms 10.0.0.2 3.000 ms *",
            render_hop(&hop, false)
        );
    }

    #[test]
    fn test_render_unanswered_hop_with_summary() {
        let hop = HopResult {
            ttl: 4,
            queries: vec![QueryResult::Lost; 3],
        };
        assert_eq!(" 4 * * * (100% loss)", render_hop(&hop, true));
    }

    #[test]
    fn test_render_partial_loss_summary() {
        let hop = HopResult {
            ttl: 5,
            queries: vec![QueryResult::Lost, responded(A, None, 7), QueryResult::Lost],
        };
        assert_eq!(
            " 5 10.0.0.1 * 7.000 ms * (66.67% loss)",
            render_hop(&hop, true)
        );
    }

    #[test]
    fn test_render_ping_events() {
        let reply = PingEvent::Reply {
            bytes: 64,
            from: A,
            sequence: 2,
            ttl: 57,
            rtt: Duration::from_micros(12_345),
        };
        assert_eq!(
            "64 bytes from 10.0.0.1: icmp_seq=2 ttl=57 time=12.345 ms",
            render_ping_event("gw", &reply)
        );
        assert_eq!(
            "Request timeout for icmp_seq 9",
            render_ping_event("gw", &PingEvent::Timeout { sequence: 9 })
        );
    }
}
