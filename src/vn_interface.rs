use std::cell::RefCell;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use crate::vn_error::DropReason;

// virtual time in nanoseconds
pub type SimTime = u64;
// signed so that a negative delay can be rejected instead of wrapping
pub type SimDelay = i64;

// all topology handles are dense indices into the owning Topology
pub type NodeId = usize;
pub type LinkId = usize;
pub type InterfaceId = usize;
pub type AppId = usize;

pub type Spi = u32;
pub type SeqNo = u64;
pub type PacketUid = u64;

pub const NANOS_PER_SECOND: SimTime = 1_000_000_000;
pub const NANOS_PER_MILLI: SimTime = 1_000_000;

pub const DEFAULT_TTL: u8 = 64;

pub const IPV4_HEADER_SIZE: usize = 20;
pub const UDP_HEADER_SIZE: usize = 8;
/// SPI (4 bytes) + extended sequence number (8 bytes)
pub const WRAPPER_HEADER_SIZE: usize = 12;

/// Largest payload a single datagram may carry (IPv4 total length limit)
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

/// Convert seconds to virtual time. Negative and NaN inputs map to zero.
pub fn seconds(s: f64) -> SimTime {
    if s.is_nan() || s <= 0.0 {
        return 0;
    }
    (s * NANOS_PER_SECOND as f64).round() as SimTime
}

pub fn millis(ms: u64) -> SimTime {
    ms.saturating_mul(NANOS_PER_MILLI)
}

pub fn as_seconds(time: SimTime) -> f64 {
    time as f64 / NANOS_PER_SECOND as f64
}

/// Direction of protected traffic relative to the gateway holding the SA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}

// ============================================================================
// Trace System
// ============================================================================

/// What a passive observer on a link can read from a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadView {
    /// Unprotected datagram: ports and payload bytes are readable
    Plain {
        src_port: u16,
        dst_port: u16,
        payload: Vec<u8>,
    },
    /// Tunnel wrapper: only the SA identifier and sequence number are readable
    Wrapped {
        spi: Spi,
        seq: SeqNo,
        ciphertext: Vec<u8>,
    },
}

/// Capture record of one frame, equivalent to a packet-capture entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameView {
    pub packet: PacketUid,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ttl: u8,
    pub size: usize,
    pub content: PayloadView,
}

impl FrameView {
    pub fn is_wrapped(&self) -> bool {
        matches!(self.content, PayloadView::Wrapped { .. })
    }

    /// Bytes after the outer header, as a sniffer would record them
    pub fn body_bytes(&self) -> &[u8] {
        match &self.content {
            PayloadView::Plain { payload, .. } => payload,
            PayloadView::Wrapped { ciphertext, .. } => ciphertext,
        }
    }
}

/// Events emitted by the simulation for capture and analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Frame handed to a link by `interface`
    FrameSent {
        link: LinkId,
        interface: InterfaceId,
        node: NodeId,
        frame: FrameView,
    },
    /// Frame arrived at `interface`. `accepted` is false when the interface
    /// only observed a frame addressed to another station on the segment.
    FrameDelivered {
        link: LinkId,
        interface: InterfaceId,
        node: NodeId,
        accepted: bool,
        frame: FrameView,
    },
    /// Packet discarded; the simulation carries on
    Dropped {
        node: NodeId,
        packet: PacketUid,
        reason: DropReason,
    },
    Encapsulated {
        node: NodeId,
        peer: NodeId,
        spi: Spi,
        seq: SeqNo,
    },
    Decapsulated {
        node: NodeId,
        peer: NodeId,
        spi: Spi,
        seq: SeqNo,
    },
    AppSent {
        app: AppId,
        node: NodeId,
        destination: SocketAddrV4,
        size: usize,
    },
    AppReceived {
        node: NodeId,
        port: u16,
        from: SocketAddrV4,
        size: usize,
    },
}

impl TraceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TraceEvent::FrameSent { .. } => "FrameSent",
            TraceEvent::FrameDelivered { .. } => "FrameDelivered",
            TraceEvent::Dropped { .. } => "Dropped",
            TraceEvent::Encapsulated { .. } => "Encapsulated",
            TraceEvent::Decapsulated { .. } => "Decapsulated",
            TraceEvent::AppSent { .. } => "AppSent",
            TraceEvent::AppReceived { .. } => "AppReceived",
        }
    }
}

/// Trait for consuming trace events from the simulation
pub trait TraceSink {
    fn record(&mut self, time: SimTime, event: TraceEvent);
}

/// No-op trace sink (zero overhead)
pub struct NoOpSink;

impl TraceSink for NoOpSink {
    #[inline(always)]
    fn record(&mut self, _time: SimTime, _event: TraceEvent) {}
}

// lets a caller keep a handle on a sink it gave to the network
impl<T: TraceSink> TraceSink for Rc<RefCell<T>> {
    fn record(&mut self, time: SimTime, event: TraceEvent) {
        self.borrow_mut().record(time, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_conversions() {
        assert_eq!(seconds(2.0), 2 * NANOS_PER_SECOND);
        assert_eq!(seconds(0.5), 500 * NANOS_PER_MILLI);
        assert_eq!(seconds(-1.0), 0);
        assert_eq!(millis(2), 2_000_000);
        assert!((as_seconds(seconds(1.25)) - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_shared_sink_forwards() {
        struct Counter(usize);
        impl TraceSink for Counter {
            fn record(&mut self, _time: SimTime, _event: TraceEvent) {
                self.0 += 1;
            }
        }

        let shared = Rc::new(RefCell::new(Counter(0)));
        let mut handle = shared.clone();
        handle.record(
            0,
            TraceEvent::Dropped {
                node: 0,
                packet: 1,
                reason: DropReason::TtlExpired,
            },
        );
        assert_eq!(shared.borrow().0, 1);
    }
}
