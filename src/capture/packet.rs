use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// TCP flags tracked by the flow record, in feature-column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpFlag { Fin, Syn, Rst, Psh, Ack, Urg, Cwr, Ece }

impl TcpFlag {
    pub const ALL: [TcpFlag; 8] = [
        TcpFlag::Fin, TcpFlag::Syn, TcpFlag::Rst, TcpFlag::Psh,
        TcpFlag::Ack, TcpFlag::Urg, TcpFlag::Cwr, TcpFlag::Ece,
    ];

    #[inline]
    pub const fn bit(self) -> u8 {
        match self {
            TcpFlag::Fin => 0x01,
            TcpFlag::Syn => 0x02,
            TcpFlag::Rst => 0x04,
            TcpFlag::Psh => 0x08,
            TcpFlag::Ack => 0x10,
            TcpFlag::Urg => 0x20,
            TcpFlag::Ece => 0x40,
            TcpFlag::Cwr => 0x80,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            TcpFlag::Fin => "FIN",
            TcpFlag::Syn => "SYN",
            TcpFlag::Rst => "RST",
            TcpFlag::Psh => "PSH",
            TcpFlag::Ack => "ACK",
            TcpFlag::Urg => "URG",
            TcpFlag::Cwr => "CWR",
            TcpFlag::Ece => "ECE",
        }
    }
}

/// Wire-layout flag byte (CWR is bit 7, FIN bit 0).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const fn empty() -> Self { Self(0) }

    pub const fn from_bits(bits: u8) -> Self { Self(bits) }

    pub const fn bits(self) -> u8 { self.0 }

    #[inline]
    pub const fn contains(self, flag: TcpFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn with(self, flag: TcpFlag) -> Self {
        Self(self.0 | flag.bit())
    }

    /// Flags set on this packet, in feature-column order.
    pub fn iter(self) -> impl Iterator<Item = TcpFlag> {
        TcpFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl FromIterator<TcpFlag> for TcpFlags {
    fn from_iter<I: IntoIterator<Item = TcpFlag>>(iter: I) -> Self {
        iter.into_iter().fold(TcpFlags::empty(), TcpFlags::with)
    }
}

/// One parsed packet, as handed over by the capture/parsing layer.
#[derive(Debug, Clone)]
pub struct PacketInfo {
    pub id: u64,
    pub timestamp: u64,             // microseconds
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub payload_bytes: u32,
    pub header_bytes: u32,
    pub tcp_window: i32,            // -1 when not TCP
    pub flags: TcpFlags,
}

impl PacketInfo {
    pub fn new(id: u64, timestamp: u64, src: IpAddr, src_port: u16, dst: IpAddr, dst_port: u16, protocol: u8) -> Self {
        Self {
            id,
            timestamp,
            src,
            dst,
            src_port,
            dst_port,
            protocol,
            payload_bytes: 0,
            header_bytes: 0,
            tcp_window: -1,
            flags: TcpFlags::empty(),
        }
    }

    pub fn with_payload(mut self, payload_bytes: u32) -> Self {
        self.payload_bytes = payload_bytes;
        self
    }

    pub fn with_header(mut self, header_bytes: u32) -> Self {
        self.header_bytes = header_bytes;
        self
    }

    pub fn with_window(mut self, tcp_window: i32) -> Self {
        self.tcp_window = tcp_window;
        self
    }

    pub fn with_flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }

    #[inline]
    pub fn has_flag(&self, flag: TcpFlag) -> bool {
        self.flags.contains(flag)
    }

    /// Key as seen from this packet's sender.
    pub fn forward_key(&self) -> String {
        flow_key(self.src, self.dst, self.src_port, self.dst_port, self.protocol)
    }

    /// Key the opposite direction of the same conversation produces as its forward key.
    pub fn backward_key(&self) -> String {
        flow_key(self.dst, self.src, self.dst_port, self.src_port, self.protocol)
    }

    /// Unordered 5-tuple hash input, identical for both directions.
    pub fn endpoint_pair(&self) -> ((IpAddr, u16), (IpAddr, u16), u8) {
        let a = (self.src, self.src_port);
        let b = (self.dst, self.dst_port);
        if a <= b { (a, b, self.protocol) } else { (b, a, self.protocol) }
    }
}

pub fn flow_key(src: IpAddr, dst: IpAddr, src_port: u16, dst_port: u16, protocol: u8) -> String {
    format!("{src}-{dst}-{src_port}-{dst_port}-{protocol}")
}

pub fn protocol_name(protocol: u8) -> &'static str {
    match protocol {
        PROTO_TCP => "TCP",
        PROTO_UDP => "UDP",
        _ => "UNKNOWN",
    }
}

/// Monotonic packet-id source shared by parser threads. First id is 1.
#[derive(Debug, Default)]
pub struct PacketIdGenerator {
    last: AtomicU64,
}

impl PacketIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next call to `next_id` returns `start + 1`.
    pub fn starting_at(start: u64) -> Self {
        Self { last: AtomicU64::new(start) }
    }

    #[inline]
    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(TcpFlag::name).collect();
        write!(f, "{}", names.join("|"))
    }
}
