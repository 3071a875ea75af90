//! Security Association store.
//!
//! One store per gateway. For every peer gateway it holds at most one
//! outbound and one inbound SA. An SA that was never installed is simply
//! absent; every operation on it reports `SaError::NoAssociation`.
//!
//! Sequence numbers start at 1. The outbound SA remembers the last number it
//! used and refuses to wrap; the inbound SA remembers the highest number it
//! accepted (0 before the first wrapper) and accepts only strictly larger
//! ones. Gaps are fine, repeats and reordering are replays.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use log::debug;

use crate::vn_error::SaError;
use crate::vn_interface::{Direction, NodeId, SeqNo, Spi};
use crate::vn_packet::EncapsulatedPacket;
use crate::vn_transform::{KeyMaterial, PayloadTransform};

#[derive(Debug, Clone)]
pub struct SecurityAssociation {
    spi: Spi,
    peer: NodeId,
    direction: Direction,
    key: KeyMaterial,
    // outbound: last sequence used; inbound: highest accepted
    sequence: SeqNo,
}

impl SecurityAssociation {
    pub fn spi(&self) -> Spi {
        self.spi
    }

    pub fn peer(&self) -> NodeId {
        self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn sequence(&self) -> SeqNo {
        self.sequence
    }
}

pub struct SaStore {
    owner: NodeId,
    outbound: BTreeMap<NodeId, SecurityAssociation>,
    inbound: BTreeMap<NodeId, SecurityAssociation>,
    inbound_spi: HashMap<Spi, NodeId>,
}

impl SaStore {
    pub fn new(owner: NodeId) -> Self {
        Self {
            owner,
            outbound: BTreeMap::new(),
            inbound: BTreeMap::new(),
            inbound_spi: HashMap::new(),
        }
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    fn table(&self, direction: Direction) -> &BTreeMap<NodeId, SecurityAssociation> {
        match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        }
    }

    /// Whether `install` would accept this SA, without touching the store
    pub fn check_install(&self, peer: NodeId, direction: Direction, spi: Spi) -> Result<(), SaError> {
        if self.table(direction).contains_key(&peer) {
            return Err(SaError::AlreadyInstalled { peer, direction });
        }
        if direction == Direction::Inbound && self.inbound_spi.contains_key(&spi) {
            return Err(SaError::DuplicateSpi(spi));
        }
        Ok(())
    }

    /// Install a fresh SA. Fails if one already exists for (peer, direction).
    pub fn install(
        &mut self,
        peer: NodeId,
        direction: Direction,
        spi: Spi,
        key: KeyMaterial,
    ) -> Result<&SecurityAssociation, SaError> {
        self.check_install(peer, direction, spi)?;

        debug!(
            "node {}: install {} SA spi={:#x} peer={}",
            self.owner, direction, spi, peer
        );

        let sa = SecurityAssociation {
            spi,
            peer,
            direction,
            key,
            sequence: 0,
        };
        let table = match direction {
            Direction::Outbound => &mut self.outbound,
            Direction::Inbound => {
                self.inbound_spi.insert(spi, peer);
                &mut self.inbound
            }
        };
        Ok(table.entry(peer).or_insert(sa))
    }

    /// Rekey: drop any existing SA for (peer, direction) and install a new one
    /// with a reset sequence counter
    pub fn replace(
        &mut self,
        peer: NodeId,
        direction: Direction,
        spi: Spi,
        key: KeyMaterial,
    ) -> Result<&SecurityAssociation, SaError> {
        if direction == Direction::Inbound {
            if let Some(owner) = self.inbound_spi.get(&spi) {
                if *owner != peer {
                    return Err(SaError::DuplicateSpi(spi));
                }
            }
            if let Some(old) = self.inbound.remove(&peer) {
                self.inbound_spi.remove(&old.spi);
            }
        } else {
            self.outbound.remove(&peer);
        }
        self.install(peer, direction, spi, key)
    }

    pub fn lookup(&self, peer: NodeId, direction: Direction) -> Result<&SecurityAssociation, SaError> {
        self.table(direction).get(&peer).ok_or(SaError::NoAssociation {
            peer: Some(peer),
            spi: None,
        })
    }

    pub fn inbound_by_spi(&self, spi: Spi) -> Option<&SecurityAssociation> {
        self.inbound_spi.get(&spi).and_then(|peer| self.inbound.get(peer))
    }

    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.outbound.keys().copied()
    }

    /// Seal `plaintext` under the outbound SA for `peer`, stamping the next
    /// sequence number
    pub fn encapsulate(
        &mut self,
        peer: NodeId,
        plaintext: &[u8],
        transform: &dyn PayloadTransform,
    ) -> Result<EncapsulatedPacket, SaError> {
        let sa = self.outbound.get_mut(&peer).ok_or(SaError::NoAssociation {
            peer: Some(peer),
            spi: None,
        })?;
        let seq = sa
            .sequence
            .checked_add(1)
            .ok_or(SaError::SequenceExhausted { spi: sa.spi })?;
        sa.sequence = seq;

        Ok(EncapsulatedPacket {
            spi: sa.spi,
            seq,
            ciphertext: transform.seal(&sa.key, sa.spi, seq, plaintext),
        })
    }

    /// Open a wrapper with the inbound SA named by its SPI.
    ///
    /// Returns the peer gateway and the recovered bytes. The replay state only
    /// advances once the transform has accepted the contents.
    pub fn decapsulate(
        &mut self,
        wrapper: &EncapsulatedPacket,
        transform: &dyn PayloadTransform,
    ) -> Result<(NodeId, Vec<u8>), SaError> {
        let peer = *self.inbound_spi.get(&wrapper.spi).ok_or(SaError::NoAssociation {
            peer: None,
            spi: Some(wrapper.spi),
        })?;
        let sa = self.inbound.get_mut(&peer).ok_or(SaError::NoAssociation {
            peer: Some(peer),
            spi: Some(wrapper.spi),
        })?;

        if wrapper.seq <= sa.sequence {
            return Err(SaError::Replay {
                spi: sa.spi,
                seq: wrapper.seq,
                highest: sa.sequence,
            });
        }

        let plaintext = transform
            .open(&sa.key, sa.spi, wrapper.seq, &wrapper.ciphertext)
            .ok_or(SaError::Integrity { spi: sa.spi })?;
        sa.sequence = wrapper.seq;
        Ok((peer, plaintext))
    }
}
