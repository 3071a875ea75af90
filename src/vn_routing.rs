//! Static global routing.
//!
//! Routes are computed once from the finished topology: every addressed link
//! contributes its prefix, and each node picks the attached forwarder with the
//! fewest hops (ties go to the lower node id, then the earlier interface).
//! There is no recomputation and no reaction to link state.

use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;

use log::debug;

use crate::vn_address::Subnet;
use crate::vn_interface::{InterfaceId, NodeId};
use crate::vn_packet::Packet;
use crate::vn_topology::Topology;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEntry {
    pub prefix: Subnet,
    /// Outgoing interface
    pub interface: InterfaceId,
    /// Next router on the path; None when the prefix is on-link
    pub gateway: Option<Ipv4Addr>,
    /// Hop count to the prefix
    pub metric: u32,
}

/// Outcome of a forwarding lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardDecision {
    DeliverLocally,
    NextHop {
        interface: InterfaceId,
        next_hop: Ipv4Addr,
    },
    NoRoute {
        destination: Ipv4Addr,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    // longest prefix first
    entries: Vec<RoutingEntry>,
}

impl RoutingTable {
    pub fn entries(&self) -> &[RoutingEntry] {
        &self.entries
    }

    /// Longest-prefix match
    pub fn lookup(&self, destination: Ipv4Addr) -> Option<&RoutingEntry> {
        self.entries.iter().find(|e| e.prefix.contains(destination))
    }
}

/// Per-node routing tables, indexed by `NodeId`
#[derive(Debug, Clone, Default)]
pub struct RoutingTables {
    tables: Vec<RoutingTable>,
}

/// Compute static routes for every node in the topology
pub fn compute_routes(topology: &Topology) -> RoutingTables {
    let tables = (0..topology.num_nodes())
        .map(|node| compute_table(topology, node))
        .collect::<Vec<_>>();

    debug!(
        "computed routes for {} nodes ({} entries)",
        tables.len(),
        tables.iter().map(|t| t.entries.len()).sum::<usize>()
    );

    RoutingTables { tables }
}

// BFS over nodes; endpoints other than the source are never expanded
fn compute_table(topology: &Topology, source: NodeId) -> RoutingTable {
    let n = topology.num_nodes();
    let mut dist: Vec<Option<u32>> = vec![None; n];
    let mut first_hop: Vec<Option<(InterfaceId, Ipv4Addr)>> = vec![None; n];
    let mut queue = VecDeque::new();

    dist[source] = Some(0);
    queue.push_back(source);

    while let Some(u) = queue.pop_front() {
        let node = &topology.nodes()[u];
        if u != source && !node.role.forwards() {
            continue;
        }
        let du = dist[u].unwrap_or(0);

        for iface in &node.interfaces {
            for peer in topology.link_peers(*iface) {
                let peer_iface = match topology.interface(peer) {
                    Some(p) => p,
                    None => continue,
                };
                // unaddressed links carry no IP traffic
                let peer_addr = match peer_iface.address {
                    Some(a) => a,
                    None => continue,
                };
                let v = peer_iface.node;
                if dist[v].is_some() {
                    continue;
                }
                dist[v] = Some(du + 1);
                first_hop[v] = if u == source {
                    Some((*iface, peer_addr))
                } else {
                    first_hop[u]
                };
                queue.push_back(v);
            }
        }
    }

    let mut best: BTreeMap<Subnet, RoutingEntry> = BTreeMap::new();
    for link in topology.links() {
        let prefix = match link.subnet {
            Some(p) => p,
            None => continue,
        };

        let candidate = if let Some(iface) = topology.interface_on_link(source, link.id) {
            Some(RoutingEntry {
                prefix,
                interface: iface,
                gateway: None,
                metric: 0,
            })
        } else {
            // nearest forwarder attached to the link
            link.interfaces
                .iter()
                .filter_map(|i| topology.interface(*i))
                .filter(|i| {
                    topology
                        .node(i.node)
                        .map(|n| n.role.forwards())
                        .unwrap_or(false)
                })
                .filter_map(|i| dist[i.node].map(|d| (d, i.node)))
                .min()
                .and_then(|(d, v)| {
                    first_hop[v].map(|(iface, gw)| RoutingEntry {
                        prefix,
                        interface: iface,
                        gateway: Some(gw),
                        metric: d + 1,
                    })
                })
        };

        if let Some(entry) = candidate {
            let replace = best
                .get(&prefix)
                .map(|existing| entry.metric < existing.metric)
                .unwrap_or(true);
            if replace {
                best.insert(prefix, entry);
            }
        }
    }

    let mut entries: Vec<RoutingEntry> = best.into_values().collect();
    entries.sort_by(|a, b| {
        b.prefix
            .prefix_len()
            .cmp(&a.prefix.prefix_len())
            .then(a.prefix.cmp(&b.prefix))
    });
    RoutingTable { entries }
}

impl RoutingTables {
    pub fn table(&self, node: NodeId) -> Option<&RoutingTable> {
        self.tables.get(node)
    }

    /// Forwarding decision for a destination address at `node`
    pub fn lookup(&self, topology: &Topology, node: NodeId, destination: Ipv4Addr) -> ForwardDecision {
        if topology.owns_address(node, destination) {
            return ForwardDecision::DeliverLocally;
        }
        match self.tables.get(node).and_then(|t| t.lookup(destination)) {
            Some(entry) => ForwardDecision::NextHop {
                interface: entry.interface,
                next_hop: entry.gateway.unwrap_or(destination),
            },
            None => ForwardDecision::NoRoute { destination },
        }
    }

    /// Forwarding decision for a packet. Only the outer destination address is
    /// consulted; the body is never inspected.
    pub fn forward(&self, topology: &Topology, node: NodeId, packet: &Packet) -> ForwardDecision {
        self.lookup(topology, node, packet.dst)
    }
}
