use pnet::packet::Packet;
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::transport::TransportChannelType::{Layer3, Layer4};
use pnet::transport::TransportProtocol::Ipv4;
use pnet::transport::{TransportReceiver, TransportSender, ipv4_packet_iter, transport_channel};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;
use tracing::instrument;

/// Size of the kernel-facing receive buffer of each raw channel.
pub const CHANNEL_BUFFER_SIZE: usize = 4096;

/// The transport a [`ProbeSession`](crate::session::ProbeSession) sends probes and receives
/// replies on.
#[cfg_attr(test, mockall::automock)]
pub trait ProbeSocket {
    /// Set the TTL of subsequently sent probes.
    fn set_ttl(&mut self, ttl: u8) -> io::Result<()>;
    /// Send an encoded probe.
    fn send_to(&mut self, packet: &[u8], target: SocketAddrV4) -> io::Result<()>;
    /// The local port UDP probes leave from, `None` if this socket sends no UDP.
    fn local_port(&self) -> Option<u16>;
    /// Copy the next received IPv4 datagram, IP header included, into `buf`.
    ///
    /// Returns `None` if nothing arrives within `timeout`.
    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}

/// A raw ICMP socket pair used for echo probes.
///
/// The kernel adds the IP header on send; the receive side sees whole datagrams.
pub struct IcmpSocket {
    sender: TransportSender,
    receiver: TransportReceiver,
}

impl IcmpSocket {
    #[instrument(level = "trace")]
    pub fn open() -> io::Result<Self> {
        let (sender, _) = transport_channel(
            CHANNEL_BUFFER_SIZE,
            Layer4(Ipv4(IpNextHeaderProtocols::Icmp)),
        )?;
        let (_, receiver) =
            transport_channel(CHANNEL_BUFFER_SIZE, Layer3(IpNextHeaderProtocols::Icmp))?;
        Ok(Self { sender, receiver })
    }
}

impl ProbeSocket for IcmpSocket {
    fn set_ttl(&mut self, ttl: u8) -> io::Result<()> {
        self.sender.set_ttl(ttl)
    }

    fn send_to(&mut self, packet: &[u8], target: SocketAddrV4) -> io::Result<()> {
        let icmp = IcmpPacket::new(packet).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "truncated icmp packet")
        })?;
        self.sender.send_to(icmp, IpAddr::V4(*target.ip()))?;
        Ok(())
    }

    fn local_port(&self) -> Option<u16> {
        None
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        recv_datagram(&mut self.receiver, buf, timeout)
    }
}

/// A datagram socket for UDP probes paired with a raw ICMP socket for the replies.
///
/// The datagram socket's ephemeral port identifies this socket's probes in the
/// ICMP errors they provoke. Both sockets are closed when this value is dropped.
pub struct UdpProbeSocket {
    socket: UdpSocket,
    receiver: TransportReceiver,
}

impl UdpProbeSocket {
    #[instrument(level = "trace")]
    pub fn open() -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        let (_, receiver) =
            transport_channel(CHANNEL_BUFFER_SIZE, Layer3(IpNextHeaderProtocols::Icmp))?;
        Ok(Self { socket, receiver })
    }
}

impl ProbeSocket for UdpProbeSocket {
    fn set_ttl(&mut self, ttl: u8) -> io::Result<()> {
        self.socket.set_ttl(u32::from(ttl))
    }

    fn send_to(&mut self, packet: &[u8], target: SocketAddrV4) -> io::Result<()> {
        self.socket.send_to(packet, target)?;
        Ok(())
    }

    fn local_port(&self) -> Option<u16> {
        self.socket.local_addr().ok().map(|addr| addr.port())
    }

    fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        recv_datagram(&mut self.receiver, buf, timeout)
    }
}

/// Opens a fresh socket for each TTL of a traceroute sweep.
pub trait SocketFactory {
    type Socket: ProbeSocket;

    fn open(&mut self) -> io::Result<Self::Socket>;
}

/// Opens a [`UdpProbeSocket`] per TTL.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpSockets;

impl SocketFactory for UdpSockets {
    type Socket = UdpProbeSocket;

    fn open(&mut self) -> io::Result<UdpProbeSocket> {
        UdpProbeSocket::open()
    }
}

fn recv_datagram(
    receiver: &mut TransportReceiver,
    buf: &mut [u8],
    timeout: Duration,
) -> io::Result<Option<usize>> {
    let mut iter = ipv4_packet_iter(receiver);
    match iter.next_with_timeout(timeout)? {
        Some((packet, _)) => {
            let bytes = packet.packet();
            let len = bytes.len().min(buf.len());
            buf[..len].copy_from_slice(&bytes[..len]);
            Ok(Some(len))
        }
        None => Ok(None),
    }
}
