//! The simulation world.
//!
//! `Network` owns every component (topology, routing tables, channel model,
//! gateways, applications) together with the single scheduler that drives
//! them. Nothing outside the network touches component state while a run is
//! in progress; callers interact by posting `SimAction`s.
//!
//! Packet path through a node:
//!
//! 1. a frame arrives; on a segment only the interface owning the frame's
//!    next hop accepts it, the others merely observe it
//! 2. a packet addressed to the node is either opened by the node's gateway
//!    (wrappers) or handed to the listening consumer (datagrams)
//! 3. otherwise the node forwards it: TTL is decremented, a gateway applies
//!    tunnel policy, and the routing table picks the outgoing interface
//! 4. the channel model turns the transmission into future deliver events
//!
//! Per-packet failures become a `DropReason`: traced, counted, logged with
//! `warn!`, and the run continues.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::vn_address::Subnet;
use crate::vn_application::{
    Consumer, ConsumerConfig, Listener, PatternPayload, PayloadFill, PayloadSource, Producer,
    ProducerConfig, RandomPayload,
};
use crate::vn_error::{ConfigurationError, DropReason, SaError, ScheduleError, TopologyError};
use crate::vn_gateway::{Gateway, TunnelConfig, TunnelPeer};
use crate::vn_interface::{
    AppId, Direction, InterfaceId, NodeId, PacketUid, SimDelay, SimTime, Spi, TraceEvent,
    TraceSink, DEFAULT_TTL, MAX_DATAGRAM_PAYLOAD,
};
use crate::vn_link::ChannelModel;
use crate::vn_packet::{Datagram, Frame, Packet, PacketBody};
use crate::vn_routing::{compute_routes, ForwardDecision, RoutingTables};
use crate::vn_scheduler::{EventHandle, Scheduler};
use crate::vn_stats::{RunReport, SimStatistics};
use crate::vn_topology::{LinkKind, NodeRole, Topology};
use crate::vn_transform::{KeyMaterial, PayloadTransform};

/// First SPI handed out when a tunnel does not name its own
pub const FIRST_AUTO_SPI: Spi = 0x100;

/// Actions the scheduler can fire
#[derive(Debug, Clone)]
pub enum SimAction {
    /// A frame reaches a receiving interface
    Deliver { interface: InterfaceId, frame: Frame },
    /// Hand a packet to a node as if it originated there
    Inject { node: NodeId, packet: Packet },
    AppStart(AppId),
    AppSend(AppId),
    AppStop(AppId),
    ListenerStart { node: NodeId, port: u16 },
    ListenerStop { node: NodeId, port: u16 },
}

pub struct Network {
    scheduler: Scheduler<SimAction>,
    topology: Topology,
    routes: RoutingTables,
    channels: ChannelModel,
    gateways: BTreeMap<NodeId, Gateway>,
    producers: Vec<Producer>,
    listeners: BTreeMap<(NodeId, u16), Listener>,
    rng: StdRng,
    seed: [u8; 32],
    next_uid: PacketUid,
    next_spi: Spi,
    stats: SimStatistics,
    sink: Box<dyn TraceSink>,
}

impl Network {
    /// Take ownership of a fully addressed topology and compute its routes
    pub fn new(topology: Topology, seed: [u8; 32], sink: Box<dyn TraceSink>) -> Self {
        let routes = compute_routes(&topology);
        info!(
            "network ready: {} nodes, {} links",
            topology.num_nodes(),
            topology.links().len()
        );

        Self {
            scheduler: Scheduler::new(),
            topology,
            routes,
            channels: ChannelModel::new(),
            gateways: BTreeMap::new(),
            producers: Vec::new(),
            listeners: BTreeMap::new(),
            rng: StdRng::from_seed(seed),
            seed,
            next_uid: 1,
            next_spi: FIRST_AUTO_SPI,
            stats: SimStatistics::default(),
            sink,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn seed(&self) -> [u8; 32] {
        self.seed
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn routes(&self) -> &RoutingTables {
        &self.routes
    }

    pub fn statistics(&self) -> &SimStatistics {
        &self.stats
    }

    pub fn gateway(&self, node: NodeId) -> Option<&Gateway> {
        self.gateways.get(&node)
    }

    pub fn producer(&self, app: AppId) -> Option<&Producer> {
        self.producers.get(app)
    }

    pub fn listener(&self, node: NodeId, port: u16) -> Option<&Listener> {
        self.listeners.get(&(node, port))
    }

    pub fn pending_events(&self) -> usize {
        self.scheduler.pending_count()
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Turn a gateway-role node into a VPN gateway using `transform`
    pub fn install_gateway(
        &mut self,
        node: NodeId,
        transform: Box<dyn PayloadTransform>,
    ) -> Result<(), ConfigurationError> {
        let n = self
            .topology
            .node(node)
            .ok_or(TopologyError::UnknownNodeId(node))?;
        if n.role != NodeRole::Gateway {
            return Err(SaError::NotAGateway(node).into());
        }
        let name = n.name.clone();
        if self.gateways.contains_key(&node) {
            return Err(ConfigurationError::InvalidScenario(format!(
                "gateway '{}' installed twice",
                name
            )));
        }
        let endpoint = self.tunnel_endpoint(node).ok_or_else(|| {
            ConfigurationError::InvalidScenario(format!("gateway '{}' has no address", name))
        })?;

        info!(
            "gateway '{}' ready: endpoint {} transform {}",
            name,
            endpoint,
            transform.name()
        );
        self.gateways
            .insert(node, Gateway::new(node, endpoint, transform));
        Ok(())
    }

    /// Address wrappers leave from: the first point-to-point address, else the
    /// first address of any kind
    fn tunnel_endpoint(&self, node: NodeId) -> Option<Ipv4Addr> {
        let n = self.topology.node(node)?;
        let on_p2p = n.interfaces.iter().find_map(|i| {
            let iface = self.topology.interface(*i)?;
            let link = self.topology.link(iface.link)?;
            match link.kind {
                LinkKind::PointToPoint => iface.address,
                LinkKind::Segment => None,
            }
        });
        on_p2p.or_else(|| self.topology.node_addresses(node).first().copied())
    }

    /// Subnets of every segment the node is attached to
    fn segment_prefixes(&self, node: NodeId) -> Vec<Subnet> {
        let Some(n) = self.topology.node(node) else {
            return Vec::new();
        };
        n.interfaces
            .iter()
            .filter_map(|i| self.topology.interface(*i))
            .filter_map(|i| self.topology.link(i.link))
            .filter(|l| l.kind == LinkKind::Segment)
            .filter_map(|l| l.subnet)
            .collect()
    }

    fn allocate_spi(&mut self) -> Spi {
        let spi = self.next_spi;
        self.next_spi = self.next_spi.wrapping_add(1);
        spi
    }

    pub fn random_key(&mut self) -> KeyMaterial {
        KeyMaterial::random(&mut self.rng)
    }

    /// Register a tunnel policy entry on an installed gateway
    pub fn add_tunnel_peer(&mut self, node: NodeId, peer: TunnelPeer) -> Result<(), ConfigurationError> {
        let gw = self
            .gateways
            .get_mut(&node)
            .ok_or(SaError::NotAGateway(node))?;
        gw.add_peer(peer);
        Ok(())
    }

    /// Install one SA on one gateway
    pub fn install_sa(
        &mut self,
        node: NodeId,
        peer: NodeId,
        direction: Direction,
        spi: Spi,
        key: KeyMaterial,
    ) -> Result<(), ConfigurationError> {
        let gw = self
            .gateways
            .get_mut(&node)
            .ok_or(SaError::NotAGateway(node))?;
        gw.install_sa(peer, direction, spi, key)?;
        Ok(())
    }

    /// Connect two installed gateways: tunnel policy on both sides plus the
    /// four SAs (outbound and inbound at each end). Each SA key is derived
    /// from `master` and its SPI. Returns the (a->b, b->a) SPIs.
    pub fn install_sa_pair(
        &mut self,
        a: NodeId,
        b: NodeId,
        master: &KeyMaterial,
        config: &TunnelConfig,
    ) -> Result<(Spi, Spi), ConfigurationError> {
        if a == b {
            return Err(ConfigurationError::InvalidScenario(
                "a tunnel needs two distinct gateways".to_string(),
            ));
        }
        let a_endpoint = self
            .gateways
            .get(&a)
            .map(|g| g.local_endpoint())
            .ok_or(SaError::NotAGateway(a))?;
        let b_endpoint = self
            .gateways
            .get(&b)
            .map(|g| g.local_endpoint())
            .ok_or(SaError::NotAGateway(b))?;

        let (ab, ba) = match config.spis {
            Some(pair) => pair,
            None => (self.allocate_spi(), self.allocate_spi()),
        };
        if ab == ba {
            return Err(SaError::DuplicateSpi(ab).into());
        }

        // nothing is installed unless all four SAs fit
        let planned = [
            (a, b, Direction::Outbound, ab),
            (b, a, Direction::Inbound, ab),
            (b, a, Direction::Outbound, ba),
            (a, b, Direction::Inbound, ba),
        ];
        for (node, peer, direction, spi) in planned {
            if let Some(gw) = self.gateways.get(&node) {
                gw.check_sa(peer, direction, spi)?;
            }
        }

        let a_prefixes = if config.a_prefixes.is_empty() {
            self.segment_prefixes(a)
        } else {
            config.a_prefixes.clone()
        };
        let b_prefixes = if config.b_prefixes.is_empty() {
            self.segment_prefixes(b)
        } else {
            config.b_prefixes.clone()
        };

        self.add_tunnel_peer(
            a,
            TunnelPeer {
                gateway: b,
                endpoint: b_endpoint,
                remote_prefixes: b_prefixes,
            },
        )?;
        self.add_tunnel_peer(
            b,
            TunnelPeer {
                gateway: a,
                endpoint: a_endpoint,
                remote_prefixes: a_prefixes,
            },
        )?;

        self.install_sa(a, b, Direction::Outbound, ab, master.derive_for_spi(ab))?;
        self.install_sa(b, a, Direction::Inbound, ab, master.derive_for_spi(ab))?;
        self.install_sa(b, a, Direction::Outbound, ba, master.derive_for_spi(ba))?;
        self.install_sa(a, b, Direction::Inbound, ba, master.derive_for_spi(ba))?;

        info!(
            "tunnel {} <-> {}: spi {:#x} / {:#x}",
            self.topology.node_name(a),
            self.topology.node_name(b),
            ab,
            ba
        );
        Ok((ab, ba))
    }

    /// Attach a producer to `node`; its start and stop are scheduled at once
    pub fn add_producer(&mut self, node: NodeId, config: ProducerConfig) -> Result<AppId, ConfigurationError> {
        if self.topology.node(node).is_none() {
            return Err(TopologyError::UnknownNodeId(node).into());
        }
        if self.topology.node_addresses(node).is_empty() {
            return Err(ConfigurationError::InvalidScenario(format!(
                "producer node '{}' has no address",
                self.topology.node_name(node)
            )));
        }
        if config.payload_size > MAX_DATAGRAM_PAYLOAD {
            return Err(ConfigurationError::InvalidScenario(format!(
                "payload of {} bytes exceeds {}",
                config.payload_size, MAX_DATAGRAM_PAYLOAD
            )));
        }

        let source: Box<dyn PayloadSource> = match config.fill {
            PayloadFill::Pattern => Box::new(PatternPayload),
            PayloadFill::Random => Box::new(RandomPayload::new(self.rng.gen())),
        };

        let id = self.producers.len();
        self.scheduler.schedule_at(config.start, SimAction::AppStart(id))?;
        self.scheduler.schedule_at(config.stop, SimAction::AppStop(id))?;
        debug!(
            "producer {} on '{}' -> {}:{}",
            id,
            self.topology.node_name(node),
            config.destination,
            config.port
        );
        self.producers.push(Producer::new(id, node, config, source));
        Ok(id)
    }

    /// Bind a consumer to (node, port) for its configured listening window
    pub fn add_consumer(
        &mut self,
        node: NodeId,
        config: ConsumerConfig,
        consumer: Box<dyn Consumer>,
    ) -> Result<(), ConfigurationError> {
        if self.topology.node(node).is_none() {
            return Err(TopologyError::UnknownNodeId(node).into());
        }
        let port = config.port;
        if self.listeners.contains_key(&(node, port)) {
            return Err(ConfigurationError::InvalidScenario(format!(
                "port {} on '{}' already has a consumer",
                port,
                self.topology.node_name(node)
            )));
        }
        self.scheduler
            .schedule_at(config.start, SimAction::ListenerStart { node, port })?;
        self.scheduler
            .schedule_at(config.stop, SimAction::ListenerStop { node, port })?;
        self.listeners
            .insert((node, port), Listener::new(node, config, consumer));
        Ok(())
    }

    // ========================================================================
    // External control
    // ========================================================================

    pub fn allocate_uid(&mut self) -> PacketUid {
        let uid = self.next_uid;
        self.next_uid += 1;
        uid
    }

    /// Post an action `delay` nanoseconds from now
    pub fn post(&mut self, delay: SimDelay, action: SimAction) -> Result<EventHandle, ScheduleError> {
        self.scheduler.schedule(delay, action)
    }

    pub fn inject(&mut self, node: NodeId, packet: Packet, delay: SimDelay) -> Result<EventHandle, ScheduleError> {
        self.post(delay, SimAction::Inject { node, packet })
    }

    /// Returns false if the event already fired or was cancelled
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.scheduler.cancel(handle)
    }

    /// Fire every event due before `limit`, then rest the clock at `limit`.
    /// Returns the number of events fired.
    pub fn run_until(&mut self, limit: SimTime) -> u64 {
        let start = self.scheduler.executed();
        while let Some((_, action)) = self.scheduler.next_event(limit) {
            self.dispatch(action);
        }
        self.scheduler.advance_to(limit);
        self.scheduler.executed() - start
    }

    pub fn report(&self) -> RunReport {
        let link_labels = self
            .topology
            .links()
            .iter()
            .map(|l| {
                let names: Vec<&str> = l
                    .interfaces
                    .iter()
                    .filter_map(|i| self.topology.interface(*i))
                    .map(|i| self.topology.node_name(i.node))
                    .collect();
                match l.kind {
                    LinkKind::Segment => format!("lan[{}]", names.join(",")),
                    LinkKind::PointToPoint => names.join("-"),
                }
            })
            .collect();

        RunReport {
            seed_used: self.seed,
            final_time: self.scheduler.now(),
            events_executed: self.scheduler.executed(),
            events_pending: self.scheduler.pending_count(),
            statistics: self.stats.clone(),
            link_labels,
        }
    }

    /// Walk the static routes from `from` towards `destination`, following
    /// tunnels, and return the nodes visited. Fails with the reason the first
    /// packet would be dropped.
    pub fn trace_route(&self, from: NodeId, destination: Ipv4Addr) -> Result<Vec<NodeId>, DropReason> {
        let mut path = vec![from];
        let mut node = from;
        let mut target = destination;
        // inner destination and SPI while inside a tunnel
        let mut tunnel: Option<(Ipv4Addr, Spi)> = None;

        for _ in 0..(DEFAULT_TTL as usize) * 2 {
            if self.topology.owns_address(node, target) {
                match tunnel.take() {
                    None => return Ok(path),
                    Some((inner, spi)) => {
                        self.gateways
                            .get(&node)
                            .and_then(|g| g.store().inbound_by_spi(spi))
                            .ok_or(DropReason::NoAssociation { spi: Some(spi) })?;
                        target = inner;
                        continue;
                    }
                }
            }

            if tunnel.is_none() {
                if let Some(gw) = self.gateways.get(&node) {
                    if let Some(peer) = gw.select_peer(target) {
                        let sa = gw
                            .store()
                            .lookup(peer.gateway, Direction::Outbound)
                            .map_err(DropReason::from)?;
                        tunnel = Some((target, sa.spi()));
                        target = peer.endpoint;
                        continue;
                    }
                }
            }

            match self.routes.lookup(&self.topology, node, target) {
                ForwardDecision::DeliverLocally => return Ok(path),
                ForwardDecision::NoRoute { destination } => {
                    return Err(DropReason::NoRoute { destination })
                }
                ForwardDecision::NextHop { next_hop, .. } => {
                    let next = self
                        .topology
                        .interface_for_address(next_hop)
                        .map(|i| i.node)
                        .ok_or(DropReason::NoRoute { destination: target })?;
                    path.push(next);
                    node = next;
                }
            }
        }
        Err(DropReason::TtlExpired)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn dispatch(&mut self, action: SimAction) {
        match action {
            SimAction::Deliver { interface, frame } => self.on_frame(interface, frame),
            SimAction::Inject { node, packet } => self.process(node, packet, true),
            SimAction::AppStart(app) => self.on_app_start(app),
            SimAction::AppSend(app) => self.on_app_send(app),
            SimAction::AppStop(app) => self.on_app_stop(app),
            SimAction::ListenerStart { node, port } => self.set_listening(node, port, true),
            SimAction::ListenerStop { node, port } => self.set_listening(node, port, false),
        }
    }

    fn emit(&mut self, event: TraceEvent) {
        let now = self.scheduler.now();
        self.sink.record(now, event);
    }

    fn drop_packet(&mut self, node: NodeId, packet: PacketUid, reason: DropReason) {
        warn!(
            "t={}ns node '{}': dropped packet {}: {}",
            self.scheduler.now(),
            self.topology.node_name(node),
            packet,
            reason
        );
        self.stats.record_drop(&reason);
        self.emit(TraceEvent::Dropped {
            node,
            packet,
            reason,
        });
    }

    fn on_frame(&mut self, interface: InterfaceId, frame: Frame) {
        let (node, link, accepted) = match self.topology.interface(interface) {
            Some(iface) => {
                let point_to_point = self
                    .topology
                    .link(iface.link)
                    .map(|l| l.kind == LinkKind::PointToPoint)
                    .unwrap_or(false);
                (
                    iface.node,
                    iface.link,
                    point_to_point || iface.address == Some(frame.next_hop),
                )
            }
            None => return,
        };

        self.stats.link_mut(link).frames_delivered += 1;
        self.emit(TraceEvent::FrameDelivered {
            link,
            interface,
            node,
            accepted,
            frame: frame.packet.view(),
        });

        if !accepted {
            self.stats.frames_observed += 1;
            return;
        }
        self.process(node, frame.packet, false);
    }

    /// Handle a packet at `node`. `originated` packets start here and skip the
    /// forwarding checks.
    fn process(&mut self, node: NodeId, mut packet: Packet, originated: bool) {
        if self.topology.owns_address(node, packet.dst) {
            self.receive_local(node, packet);
            return;
        }

        if !originated {
            let forwards = self
                .topology
                .node(node)
                .map(|n| n.role.forwards())
                .unwrap_or(false);
            if !forwards {
                self.drop_packet(
                    node,
                    packet.uid,
                    DropReason::NoRoute {
                        destination: packet.dst,
                    },
                );
                return;
            }
            if packet.ttl <= 1 {
                self.drop_packet(node, packet.uid, DropReason::TtlExpired);
                return;
            }
            packet.ttl -= 1;
            self.stats.packets_forwarded += 1;
        }

        let sealed = match self.gateways.get_mut(&node) {
            Some(gw) => gw.encapsulate(&packet),
            None => Ok(None),
        };
        match sealed {
            Ok(Some((peer, outer))) => {
                if let Some(w) = outer.as_wrapper() {
                    let (spi, seq) = (w.spi, w.seq);
                    self.stats.encapsulations += 1;
                    self.emit(TraceEvent::Encapsulated {
                        node,
                        peer,
                        spi,
                        seq,
                    });
                }
                packet = outer;
            }
            Ok(None) => {}
            Err(e) => {
                self.drop_packet(node, packet.uid, e.into());
                return;
            }
        }

        match self.routes.forward(&self.topology, node, &packet) {
            ForwardDecision::DeliverLocally => self.receive_local(node, packet),
            ForwardDecision::NoRoute { destination } => {
                self.drop_packet(node, packet.uid, DropReason::NoRoute { destination })
            }
            ForwardDecision::NextHop {
                interface,
                next_hop,
            } => self.transmit(node, interface, Frame { next_hop, packet }),
        }
    }

    fn receive_local(&mut self, node: NodeId, packet: Packet) {
        if let Some(w) = packet.as_wrapper() {
            let (spi, seq) = (w.spi, w.seq);
            let opened = match self.gateways.get_mut(&node) {
                Some(gw) => gw.decapsulate(&packet),
                // only gateways hold SAs
                None => Err(DropReason::NoAssociation { spi: Some(spi) }),
            };
            match opened {
                Ok((peer, inner)) => {
                    self.stats.decapsulations += 1;
                    self.emit(TraceEvent::Decapsulated {
                        node,
                        peer,
                        spi,
                        seq,
                    });
                    self.process(node, inner, false);
                }
                Err(reason) => self.drop_packet(node, packet.uid, reason),
            }
            return;
        }

        let (uid, src) = (packet.uid, packet.src);
        if let PacketBody::Datagram(d) = packet.body {
            self.deliver_to_app(node, uid, src, d);
        }
    }

    fn deliver_to_app(&mut self, node: NodeId, uid: PacketUid, src: Ipv4Addr, datagram: Datagram) {
        let port = datagram.dst_port;
        let active = self
            .listeners
            .get(&(node, port))
            .map(|l| l.is_active())
            .unwrap_or(false);
        if !active {
            self.drop_packet(node, uid, DropReason::PortUnreachable { port });
            return;
        }

        let now = self.scheduler.now();
        let from = SocketAddrV4::new(src, datagram.src_port);
        if let Some(listener) = self.listeners.get_mut(&(node, port)) {
            listener.consumer.consume(now, from, &datagram.payload);
            listener.delivered += 1;
        }
        self.stats.consumer_deliveries += 1;
        debug!(
            "t={}ns '{}':{} received {} bytes from {}",
            now,
            self.topology.node_name(node),
            port,
            datagram.payload.len(),
            from
        );
        self.emit(TraceEvent::AppReceived {
            node,
            port,
            from,
            size: datagram.payload.len(),
        });
    }

    fn transmit(&mut self, node: NodeId, interface: InterfaceId, frame: Frame) {
        let now = self.scheduler.now();
        let size = frame.packet.size();
        let plan = match self
            .channels
            .transmit(&self.topology, interface, size, now, &mut self.rng)
        {
            Ok(plan) => plan,
            Err(e) => {
                warn!("node {}: cannot transmit on interface {}: {}", node, interface, e);
                let destination = frame.packet.dst;
                self.drop_packet(node, frame.packet.uid, DropReason::NoRoute { destination });
                return;
            }
        };

        let counters = self.stats.link_mut(plan.link);
        counters.frames_sent += 1;
        counters.bytes_sent += size as u64;
        if plan.lost {
            counters.frames_lost += 1;
        }

        debug!(
            "t={}ns '{}' sends packet {} on link {} ({} bytes, on wire {}..{})",
            now,
            self.topology.node_name(node),
            frame.packet.uid,
            plan.link,
            size,
            plan.start,
            plan.finish
        );
        self.emit(TraceEvent::FrameSent {
            link: plan.link,
            interface,
            node,
            frame: frame.packet.view(),
        });

        if plan.lost {
            self.drop_packet(node, frame.packet.uid, DropReason::LinkLoss);
            return;
        }
        for delivery in plan.deliveries {
            self.scheduler.schedule_in(
                delivery.at.saturating_sub(now),
                SimAction::Deliver {
                    interface: delivery.interface,
                    frame: frame.clone(),
                },
            );
        }
    }

    /// Source address for traffic from `node` to `destination`: the address of
    /// the interface the route leaves through
    fn source_address(&self, node: NodeId, destination: Ipv4Addr) -> Ipv4Addr {
        let via = match self.routes.lookup(&self.topology, node, destination) {
            ForwardDecision::NextHop { interface, .. } => {
                self.topology.interface(interface).and_then(|i| i.address)
            }
            _ => None,
        };
        via.or_else(|| self.topology.node_addresses(node).first().copied())
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    fn on_app_start(&mut self, app: AppId) {
        match self.producers.get_mut(app) {
            Some(p) => p.start(),
            None => return,
        }
        self.on_app_send(app);
    }

    fn on_app_send(&mut self, app: AppId) {
        let now = self.scheduler.now();
        let (node, destination, port, source_port, payload, next) = {
            let Some(p) = self.producers.get_mut(app) else {
                return;
            };
            p.pending = None;
            let Some(payload) = p.next_payload(now) else {
                return;
            };
            (
                p.node,
                p.config.destination,
                p.config.port,
                p.config.source_port,
                payload,
                p.next_send_time(now),
            )
        };

        if let Some(at) = next {
            let handle = self
                .scheduler
                .schedule_in(at.saturating_sub(now), SimAction::AppSend(app));
            if let Some(p) = self.producers.get_mut(app) {
                p.pending = Some(handle);
            }
        }

        let src = self.source_address(node, destination);
        let uid = self.allocate_uid();
        let size = payload.len();
        let packet = Packet::datagram(uid, src, destination, source_port, port, payload);

        self.stats.packets_originated += 1;
        self.emit(TraceEvent::AppSent {
            app,
            node,
            destination: SocketAddrV4::new(destination, port),
            size,
        });
        self.process(node, packet, true);
    }

    fn on_app_stop(&mut self, app: AppId) {
        if let Some(p) = self.producers.get_mut(app) {
            if let Some(handle) = p.stop() {
                self.scheduler.cancel(handle);
            }
            debug!("producer {} stopped after {} sends", app, p.sent());
        }
    }

    fn set_listening(&mut self, node: NodeId, port: u16, active: bool) {
        if let Some(listener) = self.listeners.get_mut(&(node, port)) {
            listener.active = active;
        }
    }
}
