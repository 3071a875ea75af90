// Link / channel transmission model

use hashbrown::HashMap;
use rand::Rng;

use crate::vn_error::TopologyError;
use crate::vn_interface::{InterfaceId, LinkId, SimTime, NANOS_PER_SECOND};
use crate::vn_topology::{LinkKind, Topology};

/// Time to clock `size_bytes` onto a link of `bandwidth_bps`, rounded up to
/// the next nanosecond
pub fn serialization_delay(size_bytes: usize, bandwidth_bps: u64) -> SimTime {
    if bandwidth_bps == 0 {
        return SimTime::MAX;
    }
    let bits = size_bytes as u128 * 8;
    let bw = bandwidth_bps as u128;
    let nanos = (bits * NANOS_PER_SECOND as u128 + bw - 1) / bw;
    nanos.min(SimTime::MAX as u128) as SimTime
}

/// Arrival of a frame at one receiving interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub interface: InterfaceId,
    pub at: SimTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitPlan {
    pub link: LinkId,
    /// When the first bit goes on the wire
    pub start: SimTime,
    /// When the transmitter frees up
    pub finish: SimTime,
    pub lost: bool,
    pub deliveries: Vec<Delivery>,
}

// A segment is one collision domain; a point-to-point link is full duplex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TxSlot {
    Medium(LinkId),
    Transmitter(InterfaceId),
}

/// Tracks transmitter occupancy so back-to-back frames queue behind each other
#[derive(Default)]
pub struct ChannelModel {
    busy_until: HashMap<TxSlot, SimTime>,
}

impl ChannelModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan the transmission of `size` bytes from `from`, enqueued at `now`.
    ///
    /// Each receiver gets the frame at
    /// `max(now, transmitter_free) + serialization_delay + propagation_delay`.
    /// Segments deliver to every other attached interface; point-to-point
    /// links to the single peer. A lossy link draws once per frame, and a lost
    /// frame still occupies the transmitter.
    pub fn transmit<R: Rng>(
        &mut self,
        topology: &Topology,
        from: InterfaceId,
        size: usize,
        now: SimTime,
        rng: &mut R,
    ) -> Result<TransmitPlan, TopologyError> {
        let iface = topology
            .interface(from)
            .ok_or(TopologyError::InvalidLink(format!("unknown interface {}", from)))?;
        let link = topology
            .link(iface.link)
            .ok_or(TopologyError::UnknownLink(iface.link))?;

        let slot = match link.kind {
            LinkKind::Segment => TxSlot::Medium(link.id),
            LinkKind::PointToPoint => TxSlot::Transmitter(from),
        };

        let free_at = self.busy_until.get(&slot).copied().unwrap_or(0);
        let start = now.max(free_at);
        let finish = start.saturating_add(serialization_delay(size, link.params.bandwidth_bps));
        self.busy_until.insert(slot, finish);

        let lost = link.params.loss_rate > 0.0 && rng.gen_bool(link.params.loss_rate);
        let arrival = finish.saturating_add(link.params.delay);
        let deliveries = if lost {
            Vec::new()
        } else {
            topology
                .link_peers(from)
                .into_iter()
                .map(|interface| Delivery {
                    interface,
                    at: arrival,
                })
                .collect()
        };

        Ok(TransmitPlan {
            link: link.id,
            start,
            finish,
            lost,
            deliveries,
        })
    }
}
