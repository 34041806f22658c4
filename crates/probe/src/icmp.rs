//! ICMP echo packets and raw sockets.
//!
//! Echo request/reply format (RFC 792, RFC 4443):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |     Code      |          Checksum             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Identifier          |        Sequence Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Data ...
//! +-+-+-+-+-
//! ```
//!
//! Raw sockets require CAP_NET_RAW.

use bytes::{BufMut, Bytes, BytesMut};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV4_DEST_UNREACHABLE: u8 = 3;
const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_TIME_EXCEEDED: u8 = 11;

const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

const ICMP_HEADER_LEN: usize = 8;
const IPV6_HEADER_LEN: usize = 40;

/// Filler repeated to build echo payloads.
const PAYLOAD_PATTERN: &[u8] = b"The very model of a modern Major General. ";

static NEXT_IDENT: AtomicU16 = AtomicU16::new(0);

/// Allocate an echo identifier unique to this process and call.
///
/// Raw sockets see every ICMP packet on the host, so concurrent probes
/// tell their replies apart by identifier.
pub fn next_ident() -> u16 {
    let pid = nix::unistd::getpid().as_raw() as u16;
    pid.wrapping_add(NEXT_IDENT.fetch_add(1, Ordering::Relaxed).wrapping_mul(0x9e37))
}

/// Build a payload of exactly `size` bytes.
pub fn payload(size: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(size);
    while buf.len() < size {
        let take = (size - buf.len()).min(PAYLOAD_PATTERN.len());
        buf.put_slice(&PAYLOAD_PATTERN[..take]);
    }
    buf.freeze()
}

/// Echo request ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoRequest {
    pub ident: u16,
    pub sequence: u16,
    pub payload: Bytes,
}

impl EchoRequest {
    pub fn new(ident: u16, sequence: u16, payload: Bytes) -> Self {
        Self {
            ident,
            sequence,
            payload,
        }
    }

    /// Serialize the request.
    ///
    /// IPv4 packets carry their checksum; for ICMPv6 the kernel fills it in
    /// because it covers the IPv6 pseudo-header.
    pub fn to_bytes(&self, ipv6: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(ICMP_HEADER_LEN + self.payload.len());

        buf.put_u8(if ipv6 {
            ICMPV6_ECHO_REQUEST
        } else {
            ICMPV4_ECHO_REQUEST
        });
        buf.put_u8(0);
        buf.put_u16(0);
        buf.put_u16(self.ident);
        buf.put_u16(self.sequence);
        buf.put_slice(&self.payload);

        if !ipv6 {
            let checksum = checksum(&buf);
            buf[2..4].copy_from_slice(&checksum.to_be_bytes());
        }

        buf.freeze()
    }
}

/// RFC 1071 internet checksum
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    for chunk in data.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum += word as u32;
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Kind of ICMP message received in answer to an echo request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// The destination answered
    EchoReply,
    /// A router dropped the request because its TTL ran out
    TimeExceeded,
    /// A router or the destination refused the request
    Unreachable,
}

/// An ICMP message matched back to the request that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub ident: u16,
    pub sequence: u16,
}

/// Parse a datagram read from a raw ICMP socket.
///
/// IPv4 raw sockets deliver the IP header; ICMPv6 sockets do not. Error
/// messages are matched through the echo header quoted inside them.
pub fn parse_reply(data: &[u8], ipv6: bool) -> Option<Reply> {
    let icmp = if ipv6 { data } else { strip_ipv4_header(data)? };
    if icmp.len() < ICMP_HEADER_LEN {
        return None;
    }

    let kind = match (ipv6, icmp[0]) {
        (false, ICMPV4_ECHO_REPLY) | (true, ICMPV6_ECHO_REPLY) => ReplyKind::EchoReply,
        (false, ICMPV4_TIME_EXCEEDED) | (true, ICMPV6_TIME_EXCEEDED) => ReplyKind::TimeExceeded,
        (false, ICMPV4_DEST_UNREACHABLE) | (true, ICMPV6_DEST_UNREACHABLE) => {
            ReplyKind::Unreachable
        }
        _ => return None,
    };

    let echo = match kind {
        ReplyKind::EchoReply => icmp,
        ReplyKind::TimeExceeded | ReplyKind::Unreachable => {
            let quoted = &icmp[ICMP_HEADER_LEN..];
            let quoted = if ipv6 {
                quoted.get(IPV6_HEADER_LEN..)?
            } else {
                strip_ipv4_header(quoted)?
            };
            let request_type = if ipv6 {
                ICMPV6_ECHO_REQUEST
            } else {
                ICMPV4_ECHO_REQUEST
            };
            if quoted.len() < ICMP_HEADER_LEN || quoted[0] != request_type {
                return None;
            }
            quoted
        }
    };

    Some(Reply {
        kind,
        ident: u16::from_be_bytes([echo[4], echo[5]]),
        sequence: u16::from_be_bytes([echo[6], echo[7]]),
    })
}

fn strip_ipv4_header(data: &[u8]) -> Option<&[u8]> {
    let ihl = (*data.first()? & 0x0F) as usize * 4;
    if ihl < 20 {
        return None;
    }
    data.get(ihl..)
}

/// Blocking raw ICMP socket bound to one destination family
pub struct IcmpSocket {
    socket: UdpSocket,
    ipv6: bool,
}

impl IcmpSocket {
    /// Open a raw ICMP socket for the family of `target`
    pub fn open(target: IpAddr) -> io::Result<Self> {
        let ipv6 = target.is_ipv6();
        let (domain, protocol) = if ipv6 {
            (Domain::IPV6, Protocol::ICMPV6)
        } else {
            (Domain::IPV4, Protocol::ICMPV4)
        };

        let socket = Socket::new(domain, Type::RAW, Some(protocol))?;

        Ok(Self {
            socket: socket.into(),
            ipv6,
        })
    }

    /// Set the TTL (hop limit) of outgoing requests
    pub fn set_ttl(&self, ttl: u32) -> io::Result<()> {
        if self.ipv6 {
            SockRef::from(&self.socket).set_unicast_hops_v6(ttl)
        } else {
            self.socket.set_ttl(ttl)
        }
    }

    /// Send an echo request to `target`
    pub fn send(&self, request: &EchoRequest, target: IpAddr) -> io::Result<Instant> {
        let packet = request.to_bytes(self.ipv6);
        self.socket.send_to(&packet, SocketAddr::new(target, 0))?;
        Ok(Instant::now())
    }

    /// Wait until `deadline` for an ICMP message answering one of our requests.
    ///
    /// Returns `Ok(None)` once the deadline passes.
    pub fn recv_until(
        &self,
        ident: u16,
        deadline: Instant,
    ) -> io::Result<Option<(Reply, IpAddr, Instant)>> {
        let mut buf = [0u8; 1500];

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.socket
                .set_read_timeout(Some((deadline - now).max(Duration::from_millis(1))))?;

            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    let received_at = Instant::now();
                    if let Some(reply) = parse_reply(&buf[..len], self.ipv6) {
                        if reply.ident == ident {
                            return Ok(Some((reply, from.ip(), received_at)));
                        }
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
