//! VPN gateway: tunnel policy on top of an SA store.
//!
//! A gateway protects traffic between its local prefixes and the prefixes
//! behind each peer gateway. Outbound, a plain datagram whose destination
//! falls behind a peer is serialised whole (tunnel mode), sealed under the
//! outbound SA for that peer and re-addressed from this gateway's tunnel
//! endpoint to the peer's. Inbound, a wrapper addressed to the gateway is
//! opened with the inbound SA named by its SPI and the recovered datagram goes
//! back into normal forwarding.

use std::net::Ipv4Addr;

use log::debug;

use crate::vn_address::Subnet;
use crate::vn_error::{DropReason, SaError};
use crate::vn_interface::{Direction, NodeId, Spi};
use crate::vn_packet::{Packet, PacketBody};
use crate::vn_security::SaStore;
use crate::vn_transform::{KeyMaterial, PayloadTransform};

/// Tunnel setup between two gateways `a` and `b`
#[derive(Debug, Clone, Default)]
pub struct TunnelConfig {
    /// SPIs for a->b and b->a traffic; allocated by the network when None
    pub spis: Option<(Spi, Spi)>,
    /// Prefixes protected behind `a`; empty means every segment `a` sits on
    pub a_prefixes: Vec<Subnet>,
    pub b_prefixes: Vec<Subnet>,
}

/// A remote gateway and the prefixes reachable through it
#[derive(Debug, Clone)]
pub struct TunnelPeer {
    pub gateway: NodeId,
    /// Outer destination address for wrappers sent to this peer
    pub endpoint: Ipv4Addr,
    pub remote_prefixes: Vec<Subnet>,
}

pub struct Gateway {
    node: NodeId,
    local_endpoint: Ipv4Addr,
    peers: Vec<TunnelPeer>,
    store: SaStore,
    transform: Box<dyn PayloadTransform>,
}

impl Gateway {
    pub fn new(node: NodeId, local_endpoint: Ipv4Addr, transform: Box<dyn PayloadTransform>) -> Self {
        Self {
            node,
            local_endpoint,
            peers: Vec::new(),
            store: SaStore::new(node),
            transform,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn local_endpoint(&self) -> Ipv4Addr {
        self.local_endpoint
    }

    pub fn peers(&self) -> &[TunnelPeer] {
        &self.peers
    }

    pub fn store(&self) -> &SaStore {
        &self.store
    }

    pub fn transform_name(&self) -> &'static str {
        self.transform.name()
    }

    /// Register (or update) the tunnel policy for a peer gateway
    pub fn add_peer(&mut self, peer: TunnelPeer) {
        match self.peers.iter_mut().find(|p| p.gateway == peer.gateway) {
            Some(existing) => *existing = peer,
            None => self.peers.push(peer),
        }
    }

    pub fn install_sa(
        &mut self,
        peer: NodeId,
        direction: Direction,
        spi: Spi,
        key: KeyMaterial,
    ) -> Result<(), SaError> {
        self.store.install(peer, direction, spi, key).map(|_| ())
    }

    pub fn check_sa(&self, peer: NodeId, direction: Direction, spi: Spi) -> Result<(), SaError> {
        self.store.check_install(peer, direction, spi)
    }

    pub fn replace_sa(
        &mut self,
        peer: NodeId,
        direction: Direction,
        spi: Spi,
        key: KeyMaterial,
    ) -> Result<(), SaError> {
        self.store.replace(peer, direction, spi, key).map(|_| ())
    }

    /// Peer whose remote prefixes cover `destination`, longest prefix first
    pub fn select_peer(&self, destination: Ipv4Addr) -> Option<&TunnelPeer> {
        self.peers
            .iter()
            .filter_map(|p| {
                p.remote_prefixes
                    .iter()
                    .filter(|s| s.contains(destination))
                    .map(|s| s.prefix_len())
                    .max()
                    .map(|len| (len, p))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, p)| p)
    }

    /// Apply tunnel policy to a packet this gateway is about to forward.
    ///
    /// Returns `Ok(None)` when the packet does not cross a tunnel (wrappers are
    /// never wrapped again), otherwise the peer and the outer packet.
    pub fn encapsulate(&mut self, packet: &Packet) -> Result<Option<(NodeId, Packet)>, SaError> {
        if !matches!(packet.body, PacketBody::Datagram(_)) {
            return Ok(None);
        }
        let (peer, endpoint) = match self.select_peer(packet.dst) {
            Some(p) => (p.gateway, p.endpoint),
            None => return Ok(None),
        };

        let inner = packet.encode();
        let wrapper = self.store.encapsulate(peer, &inner, self.transform.as_ref())?;
        debug!(
            "gateway {}: seal packet {} for peer {} spi={:#x} seq={}",
            self.node, packet.uid, peer, wrapper.spi, wrapper.seq
        );
        Ok(Some((
            peer,
            Packet::wrapper(packet.uid, self.local_endpoint, endpoint, wrapper),
        )))
    }

    /// Open a wrapper addressed to this gateway and recover the inner packet
    pub fn decapsulate(&mut self, packet: &Packet) -> Result<(NodeId, Packet), DropReason> {
        let wrapper = packet.as_wrapper().ok_or(DropReason::Malformed)?;
        let (peer, bytes) = self
            .store
            .decapsulate(wrapper, self.transform.as_ref())
            .map_err(DropReason::from)?;
        let inner = Packet::decode(&bytes).ok_or(DropReason::Malformed)?;
        debug!(
            "gateway {}: opened packet {} from peer {} spi={:#x} seq={}",
            self.node, inner.uid, peer, wrapper.spi, wrapper.seq
        );
        Ok((peer, inner))
    }
}
