//! Error types for the simulator.
//!
//! Configuration-time errors (`TopologyError`, `SaError` during installation,
//! `ScheduleError`) surface as `ConfigurationError` and abort a run before any
//! virtual time passes. Runtime per-packet failures are expressed as a
//! `DropReason`: the packet is discarded, the drop is traced and counted, and
//! the scheduler loop keeps going.

use std::fmt;
use std::net::Ipv4Addr;

use crate::vn_address::Subnet;
use crate::vn_interface::{Direction, LinkId, NodeId, SeqNo, SimTime, Spi};

/// Misuse of the event scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// A relative delay below zero
    NegativeDelay(i64),

    /// An absolute time earlier than the current virtual time
    InPast { at: SimTime, now: SimTime },
}

/// Errors raised while building the topology graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    UnknownNode(String),
    UnknownNodeId(NodeId),
    UnknownLink(LinkId),
    DuplicateNodeName(String),

    /// Link construction violates a structural rule
    InvalidLink(String),

    /// Mask is not contiguous or the base has host bits set
    InvalidSubnet { base: Ipv4Addr, mask: Ipv4Addr },

    /// The subnet has no room for the interfaces being addressed
    AddressExhausted { subnet: Subnet, capacity: u32 },

    /// Interfaces on this link already carry addresses
    AlreadyAddressed(LinkId),
}

/// Security association failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaError {
    /// An SA for this (peer, direction) exists; use `replace` to rekey
    AlreadyInstalled { peer: NodeId, direction: Direction },

    /// No active SA matches the lookup
    NoAssociation {
        peer: Option<NodeId>,
        spi: Option<Spi>,
    },

    /// Sequence number not strictly above the highest accepted one
    Replay { spi: Spi, seq: SeqNo, highest: SeqNo },

    /// Another peer's inbound SA already uses this SPI
    DuplicateSpi(Spi),

    /// Outbound counter cannot advance without reuse
    SequenceExhausted { spi: Spi },

    /// The transform rejected the wrapper contents
    Integrity { spi: Spi },

    /// SA operations requested on a node that is not a gateway
    NotAGateway(NodeId),
}

/// Fatal errors detected before the simulation starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    Topology(TopologyError),
    Association(SaError),
    Schedule(ScheduleError),

    /// A producer targets an address that static routing cannot reach
    UnreachableDestination {
        from: String,
        destination: Ipv4Addr,
        reason: DropReason,
    },

    InvalidKey(String),
    InvalidScenario(String),

    /// Scenario text or file could not be read or parsed
    Parse(String),
}

/// Why a packet was discarded at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    NoRoute { destination: Ipv4Addr },
    NoAssociation { spi: Option<Spi> },
    Replay { spi: Spi, seq: SeqNo, highest: SeqNo },
    Integrity { spi: Spi },
    TtlExpired,
    PortUnreachable { port: u16 },
    Malformed,
    LinkLoss,
    SequenceExhausted { spi: Spi },
}

impl DropReason {
    /// Stable label used for counters and CSV output
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::NoRoute { .. } => "no-route",
            DropReason::NoAssociation { .. } => "no-association",
            DropReason::Replay { .. } => "replay",
            DropReason::Integrity { .. } => "integrity",
            DropReason::TtlExpired => "ttl-expired",
            DropReason::PortUnreachable { .. } => "port-unreachable",
            DropReason::Malformed => "malformed",
            DropReason::LinkLoss => "link-loss",
            DropReason::SequenceExhausted { .. } => "sequence-exhausted",
        }
    }
}

impl From<SaError> for DropReason {
    fn from(e: SaError) -> Self {
        match e {
            SaError::Replay { spi, seq, highest } => DropReason::Replay { spi, seq, highest },
            SaError::Integrity { spi } => DropReason::Integrity { spi },
            SaError::SequenceExhausted { spi } => DropReason::SequenceExhausted { spi },
            SaError::NoAssociation { spi, .. } => DropReason::NoAssociation { spi },
            SaError::DuplicateSpi(spi) => DropReason::NoAssociation { spi: Some(spi) },
            SaError::AlreadyInstalled { .. } | SaError::NotAGateway(_) => {
                DropReason::NoAssociation { spi: None }
            }
        }
    }
}

impl From<TopologyError> for ConfigurationError {
    fn from(e: TopologyError) -> Self {
        ConfigurationError::Topology(e)
    }
}

impl From<SaError> for ConfigurationError {
    fn from(e: SaError) -> Self {
        ConfigurationError::Association(e)
    }
}

impl From<ScheduleError> for ConfigurationError {
    fn from(e: ScheduleError) -> Self {
        ConfigurationError::Schedule(e)
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::NegativeDelay(d) => write!(f, "negative scheduling delay: {}ns", d),
            ScheduleError::InPast { at, now } => {
                write!(f, "cannot schedule at {}ns, current time is {}ns", at, now)
            }
        }
    }
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::UnknownNode(name) => write!(f, "unknown node '{}'", name),
            TopologyError::UnknownNodeId(id) => write!(f, "unknown node id {}", id),
            TopologyError::UnknownLink(id) => write!(f, "unknown link id {}", id),
            TopologyError::DuplicateNodeName(name) => write!(f, "duplicate node name '{}'", name),
            TopologyError::InvalidLink(msg) => write!(f, "invalid link: {}", msg),
            TopologyError::InvalidSubnet { base, mask } => {
                write!(f, "invalid subnet {} mask {}", base, mask)
            }
            TopologyError::AddressExhausted { subnet, capacity } => write!(
                f,
                "address space of {} exhausted ({} host addresses)",
                subnet, capacity
            ),
            TopologyError::AlreadyAddressed(link) => {
                write!(f, "link {} already has addresses assigned", link)
            }
        }
    }
}

impl fmt::Display for SaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaError::AlreadyInstalled { peer, direction } => {
                write!(f, "{} SA for peer {} already installed", direction, peer)
            }
            SaError::NoAssociation { peer, spi } => match (peer, spi) {
                (Some(p), _) => write!(f, "no security association for peer {}", p),
                (None, Some(s)) => write!(f, "no security association for spi {:#x}", s),
                (None, None) => write!(f, "no security association"),
            },
            SaError::Replay { spi, seq, highest } => write!(
                f,
                "replayed sequence {} on spi {:#x} (highest accepted {})",
                seq, spi, highest
            ),
            SaError::DuplicateSpi(spi) => write!(f, "spi {:#x} already in use", spi),
            SaError::SequenceExhausted { spi } => {
                write!(f, "sequence space exhausted on spi {:#x}", spi)
            }
            SaError::Integrity { spi } => write!(f, "integrity check failed on spi {:#x}", spi),
            SaError::NotAGateway(node) => write!(f, "node {} is not a gateway", node),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::Topology(e) => write!(f, "topology: {}", e),
            ConfigurationError::Association(e) => write!(f, "security association: {}", e),
            ConfigurationError::Schedule(e) => write!(f, "schedule: {}", e),
            ConfigurationError::UnreachableDestination {
                from,
                destination,
                reason,
            } => write!(
                f,
                "{} cannot reach {} ({})",
                from,
                destination,
                reason.label()
            ),
            ConfigurationError::InvalidKey(msg) => write!(f, "invalid key: {}", msg),
            ConfigurationError::InvalidScenario(msg) => write!(f, "invalid scenario: {}", msg),
            ConfigurationError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NoRoute { destination } => write!(f, "no route to {}", destination),
            DropReason::NoAssociation { spi: Some(spi) } => {
                write!(f, "no association for spi {:#x}", spi)
            }
            DropReason::NoAssociation { spi: None } => write!(f, "no association"),
            DropReason::Replay { spi, seq, highest } => {
                write!(f, "replay spi {:#x} seq {} <= {}", spi, seq, highest)
            }
            DropReason::Integrity { spi } => write!(f, "integrity failure spi {:#x}", spi),
            DropReason::TtlExpired => write!(f, "ttl expired"),
            DropReason::PortUnreachable { port } => write!(f, "port {} unreachable", port),
            DropReason::Malformed => write!(f, "malformed packet"),
            DropReason::LinkLoss => write!(f, "lost on link"),
            DropReason::SequenceExhausted { spi } => {
                write!(f, "sequence exhausted spi {:#x}", spi)
            }
        }
    }
}

impl std::error::Error for ScheduleError {}
impl std::error::Error for TopologyError {}
impl std::error::Error for SaError {}
impl std::error::Error for ConfigurationError {}
impl std::error::Error for DropReason {}
