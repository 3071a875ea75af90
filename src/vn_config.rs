//! Scenario description and the run control surface.
//!
//! A `ScenarioConfig` is the whole input of a run: nodes, links with their
//! subnets, tunnels between gateways, and the application schedule. It is
//! usually read from YAML:
//!
//! ```yaml
//! meta:
//!   name: two-lan-vpn
//! seed: "00112233...eeff"   # optional, 64 hex digits
//! duration: 11.0            # seconds of virtual time
//! nodes:
//!   - { name: n0, role: endpoint }
//!   - { name: r0, role: gateway }
//! links:
//!   - { kind: segment, nodes: [n0, r0], bandwidth: 100Mbps, delay_ms: 2,
//!       subnet: 10.1.1.0, mask: 255.255.255.0 }
//! tunnels:
//!   - { a: r0, b: r2, key: random }
//! consumers:
//!   - { node: n0, port: 9 }
//! producers:
//!   - { node: n3, destination: 10.1.1.1, port: 9, start: 2.0 }
//! ```

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use crate::vn_address::Subnet;
use crate::vn_application::{ConsumerConfig, PayloadFill, ProducerConfig, RecordingConsumer};
use crate::vn_error::{ConfigurationError, TopologyError};
use crate::vn_gateway::TunnelConfig;
use crate::vn_interface::{seconds, NodeId, SimTime, Spi, TraceSink};
use crate::vn_network::Network;
use crate::vn_stats::RunReport;
use crate::vn_topology::{LinkKind, LinkParams, NodeRole, Topology};
use crate::vn_transform::{transform_by_name, KeyMaterial};

// ============================================================================
// Scenario File
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioMeta {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Complete description of one simulation run
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub meta: ScenarioMeta,

    /// 64 hex digits; drawn from entropy when absent
    #[serde(default)]
    pub seed: Option<String>,

    /// Virtual seconds to simulate
    #[serde(default = "default_duration")]
    pub duration: f64,

    /// Payload transform used by every gateway
    #[serde(default = "default_transform")]
    pub transform: String,

    pub nodes: Vec<NodeSpec>,

    pub links: Vec<LinkSpec>,

    #[serde(default)]
    pub tunnels: Vec<TunnelSpec>,

    #[serde(default)]
    pub consumers: Vec<ConsumerSpec>,

    #[serde(default)]
    pub producers: Vec<ProducerSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub role: NodeRole,
}

/// Bits per second, or a rate string such as `"100Mbps"`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DataRate {
    Bps(u64),
    Text(String),
}

impl DataRate {
    pub fn bits_per_second(&self) -> Result<u64, ConfigurationError> {
        match self {
            DataRate::Bps(0) => Err(ConfigurationError::InvalidScenario(
                "bandwidth must be positive".to_string(),
            )),
            DataRate::Bps(bps) => Ok(*bps),
            DataRate::Text(s) => parse_data_rate(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkSpec {
    pub kind: LinkKind,
    /// Node names, in address assignment order
    pub nodes: Vec<String>,
    #[serde(default)]
    pub bandwidth: Option<DataRate>,
    #[serde(default)]
    pub delay_ms: Option<f64>,
    #[serde(default)]
    pub loss: f64,
    pub subnet: Ipv4Addr,
    pub mask: Ipv4Addr,
}

/// Where a tunnel's master key comes from
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeySource {
    /// 64 hex digits
    Hex(String),
    /// Stretched with Argon2id
    Passphrase(String),
    /// Drawn from the seeded simulation RNG
    #[default]
    Random,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelSpec {
    pub a: String,
    pub b: String,

    /// CIDR prefixes behind `a`; defaults to the segments `a` sits on
    #[serde(default)]
    pub a_prefixes: Vec<String>,

    #[serde(default)]
    pub b_prefixes: Vec<String>,

    /// `random`, `{ hex: ... }` or `{ passphrase: ... }`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub key: KeySource,

    /// SPIs for a->b and b->a traffic
    #[serde(default)]
    pub spis: Option<(Spi, Spi)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerSpec {
    pub node: String,
    pub port: Option<u16>,
    pub start: Option<f64>,
    pub stop: Option<f64>,
}

/// Unset fields fall back to `ProducerConfig::default()`
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerSpec {
    pub node: String,
    pub destination: Ipv4Addr,
    pub port: Option<u16>,
    pub source_port: Option<u16>,
    pub payload_size: Option<usize>,
    pub count: Option<u32>,
    pub interval: Option<f64>,
    pub start: Option<f64>,
    pub stop: Option<f64>,
    pub fill: Option<PayloadFill>,
}

fn default_duration() -> f64 {
    10.0
}

fn default_transform() -> String {
    "keyed-stream".to_string()
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            meta: ScenarioMeta::default(),
            seed: None,
            duration: default_duration(),
            transform: default_transform(),
            nodes: Vec::new(),
            links: Vec::new(),
            tunnels: Vec::new(),
            consumers: Vec::new(),
            producers: Vec::new(),
        }
    }
}

/// Seconds from a scenario field; negative and non-finite values are rejected
fn time_field(field: &str, value: Option<f64>, default: SimTime) -> Result<SimTime, ConfigurationError> {
    match value {
        None => Ok(default),
        Some(s) if s.is_finite() && s >= 0.0 => Ok(seconds(s)),
        Some(s) => Err(ConfigurationError::InvalidScenario(format!(
            "{} must be a non-negative number of seconds, got {}",
            field, s
        ))),
    }
}

impl ConsumerSpec {
    pub fn to_config(&self) -> Result<ConsumerConfig, ConfigurationError> {
        let defaults = ConsumerConfig::default();
        Ok(ConsumerConfig {
            port: self.port.unwrap_or(defaults.port),
            start: time_field("consumer start", self.start, defaults.start)?,
            stop: time_field("consumer stop", self.stop, defaults.stop)?,
        })
    }
}

impl ProducerSpec {
    pub fn to_config(&self) -> Result<ProducerConfig, ConfigurationError> {
        let defaults = ProducerConfig::default();
        Ok(ProducerConfig {
            destination: self.destination,
            port: self.port.unwrap_or(defaults.port),
            source_port: self.source_port.unwrap_or(defaults.source_port),
            payload_size: self.payload_size.unwrap_or(defaults.payload_size),
            count: self.count.unwrap_or(defaults.count),
            interval: time_field("producer interval", self.interval, defaults.interval)?,
            start: time_field("producer start", self.start, defaults.start)?,
            stop: time_field("producer stop", self.stop, defaults.stop)?,
            fill: self.fill.unwrap_or(defaults.fill),
        })
    }
}

// ============================================================================
// Parsing helpers
// ============================================================================

/// Parse `"100Mbps"`, `"1.5Gbps"`, `"56Kbps"`, `"9600bps"` or a bare number of
/// bits per second. Multipliers are decimal.
pub fn parse_data_rate(text: &str) -> Result<u64, ConfigurationError> {
    let s = text.trim();
    let invalid = || ConfigurationError::InvalidScenario(format!("invalid data rate '{}'", text));

    let (number, multiplier) = if let Some(n) = s.strip_suffix("Gbps") {
        (n, 1e9)
    } else if let Some(n) = s.strip_suffix("Mbps") {
        (n, 1e6)
    } else if let Some(n) = s.strip_suffix("Kbps").or_else(|| s.strip_suffix("kbps")) {
        (n, 1e3)
    } else if let Some(n) = s.strip_suffix("bps") {
        (n, 1.0)
    } else {
        (s, 1.0)
    };

    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    let bps = (value * multiplier).round();
    if !bps.is_finite() || bps < 1.0 || bps > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bps as u64)
}

/// 64 hex digits, optionally prefixed with `0x`
pub fn parse_seed_hex(hex: &str) -> Result<[u8; 32], ConfigurationError> {
    let hex = hex.trim();
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    if hex.len() != 64 || !hex.is_ascii() {
        return Err(ConfigurationError::InvalidScenario(format!(
            "seed must be 64 hex digits, got '{}'",
            hex
        )));
    }

    let mut seed = [0u8; 32];
    for (i, byte) in seed.iter_mut().enumerate() {
        let pair = &hex[i * 2..i * 2 + 2];
        *byte = u8::from_str_radix(pair, 16).map_err(|_| {
            ConfigurationError::InvalidScenario(format!("invalid hex '{}' in seed", pair))
        })?;
    }
    Ok(seed)
}

fn parse_prefixes(prefixes: &[String]) -> Result<Vec<Subnet>, ConfigurationError> {
    prefixes
        .iter()
        .map(|p| p.parse::<Subnet>().map_err(ConfigurationError::InvalidScenario))
        .collect()
}

// ============================================================================
// Scenario
// ============================================================================

impl ScenarioConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Parse(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
            .map_err(|e| ConfigurationError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Two LANs joined by a routed transit path, with a VPN tunnel between the
    /// LAN gateways r0 and r2:
    ///
    /// ```text
    ///   n0 n1 n2 r0 ---- r1 ---- r2 n3 n4 n5
    ///   10.1.1.0/24  |        |   10.1.2.0/24
    ///      10.1.100.0/24  10.1.200.0/24
    /// ```
    ///
    /// n3 sends one 1024-byte datagram at t=2s to a listener on n0 port 9.
    pub fn two_lan_vpn() -> Self {
        let node = |name: &str, role| NodeSpec {
            name: name.to_string(),
            role,
        };
        let link = |kind, nodes: &[&str], rate: &str, subnet: [u8; 3]| LinkSpec {
            kind,
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            bandwidth: Some(DataRate::Text(rate.to_string())),
            delay_ms: Some(2.0),
            loss: 0.0,
            subnet: Ipv4Addr::new(subnet[0], subnet[1], subnet[2], 0),
            mask: Ipv4Addr::new(255, 255, 255, 0),
        };

        Self {
            meta: ScenarioMeta {
                name: Some("two-lan-vpn".to_string()),
                description: Some(
                    "Two LANs joined over an untrusted transit router through a gateway tunnel"
                        .to_string(),
                ),
            },
            seed: None,
            duration: 11.0,
            transform: default_transform(),
            nodes: vec![
                node("n0", NodeRole::Endpoint),
                node("n1", NodeRole::Endpoint),
                node("n2", NodeRole::Endpoint),
                node("n3", NodeRole::Endpoint),
                node("n4", NodeRole::Endpoint),
                node("n5", NodeRole::Endpoint),
                node("r0", NodeRole::Gateway),
                node("r1", NodeRole::TransitRouter),
                node("r2", NodeRole::Gateway),
            ],
            links: vec![
                link(LinkKind::Segment, &["n0", "n1", "n2", "r0"], "100Mbps", [10, 1, 1]),
                link(LinkKind::Segment, &["n3", "n4", "n5", "r2"], "100Mbps", [10, 1, 2]),
                link(LinkKind::PointToPoint, &["r0", "r1"], "30Mbps", [10, 1, 100]),
                link(LinkKind::PointToPoint, &["r1", "r2"], "30Mbps", [10, 1, 200]),
            ],
            tunnels: vec![TunnelSpec {
                a: "r0".to_string(),
                b: "r2".to_string(),
                a_prefixes: Vec::new(),
                b_prefixes: Vec::new(),
                key: KeySource::Random,
                spis: None,
            }],
            consumers: vec![ConsumerSpec {
                node: "n0".to_string(),
                port: Some(9),
                start: Some(1.0),
                stop: Some(10.0),
            }],
            producers: vec![ProducerSpec {
                node: "n3".to_string(),
                destination: Ipv4Addr::new(10, 1, 1, 1),
                port: Some(9),
                source_port: None,
                payload_size: Some(1024),
                count: Some(1),
                interval: Some(1.0),
                start: Some(2.0),
                stop: Some(10.0),
                fill: None,
            }],
        }
    }

    /// Resolve the seed (use provided or generate random)
    pub fn resolve_seed(&self) -> Result<[u8; 32], ConfigurationError> {
        match &self.seed {
            Some(hex) => parse_seed_hex(hex),
            None => {
                let mut temp_rng = StdRng::from_entropy();
                let mut seed = [0u8; 32];
                use rand::RngCore;
                temp_rng.fill_bytes(&mut seed);
                Ok(seed)
            }
        }
    }

    pub fn stop_time(&self) -> SimTime {
        seconds(self.duration)
    }

    fn node_id(topology: &Topology, name: &str) -> Result<NodeId, ConfigurationError> {
        topology
            .node_by_name(name)
            .ok_or_else(|| TopologyError::UnknownNode(name.to_string()).into())
    }

    /// Build the topology, gateways, tunnels and applications
    pub fn build(&self, seed: [u8; 32], sink: Box<dyn TraceSink>) -> Result<Network, ConfigurationError> {
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(ConfigurationError::InvalidScenario(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }

        let mut topology = Topology::new();
        for node in &self.nodes {
            topology.add_node(&node.name, node.role)?;
        }

        for spec in &self.links {
            let ids = spec
                .nodes
                .iter()
                .map(|n| Self::node_id(&topology, n))
                .collect::<Result<Vec<_>, _>>()?;
            let defaults = LinkParams::default();
            let params = LinkParams {
                bandwidth_bps: match &spec.bandwidth {
                    Some(rate) => rate.bits_per_second()?,
                    None => defaults.bandwidth_bps,
                },
                delay: time_field(
                    "link delay_ms",
                    spec.delay_ms.map(|ms| ms / 1000.0),
                    defaults.delay,
                )?,
                loss_rate: spec.loss,
            };

            let link = match spec.kind {
                LinkKind::Segment => topology.add_segment(&ids, params)?,
                LinkKind::PointToPoint => match ids.as_slice() {
                    [a, b] => topology.add_point_to_point(*a, *b, params)?,
                    _ => {
                        return Err(TopologyError::InvalidLink(format!(
                            "point-to-point link needs exactly two nodes, got {}",
                            ids.len()
                        ))
                        .into())
                    }
                },
            };
            topology.assign_addresses(link, spec.subnet, spec.mask)?;
        }
        info!(
            "topology built: {} nodes, {} links",
            topology.num_nodes(),
            topology.links().len()
        );

        let gateways: Vec<NodeId> = topology
            .nodes()
            .iter()
            .filter(|n| n.role == NodeRole::Gateway)
            .map(|n| n.id)
            .collect();

        let mut net = Network::new(topology, seed, sink);

        for node in gateways {
            let transform = transform_by_name(&self.transform).ok_or_else(|| {
                ConfigurationError::InvalidScenario(format!("unknown transform '{}'", self.transform))
            })?;
            net.install_gateway(node, transform)?;
        }

        for spec in &self.tunnels {
            let a = Self::node_id(net.topology(), &spec.a)?;
            let b = Self::node_id(net.topology(), &spec.b)?;
            let master = match &spec.key {
                KeySource::Hex(hex) => KeyMaterial::from_hex(hex)?,
                KeySource::Passphrase(p) => {
                    KeyMaterial::from_passphrase(p, &format!("{}<->{}", spec.a, spec.b))?
                }
                KeySource::Random => net.random_key(),
            };
            let config = TunnelConfig {
                spis: spec.spis,
                a_prefixes: parse_prefixes(&spec.a_prefixes)?,
                b_prefixes: parse_prefixes(&spec.b_prefixes)?,
            };
            net.install_sa_pair(a, b, &master, &config)?;
        }

        for spec in &self.consumers {
            let node = Self::node_id(net.topology(), &spec.node)?;
            net.add_consumer(node, spec.to_config()?, Box::new(RecordingConsumer::new()))?;
        }

        for spec in &self.producers {
            let node = Self::node_id(net.topology(), &spec.node)?;
            net.add_producer(node, spec.to_config()?)?;
        }

        Ok(net)
    }

    /// Every producer destination must be reachable over the static routes,
    /// including through any tunnel on the way
    pub fn preflight(&self, net: &Network) -> Result<(), ConfigurationError> {
        for spec in &self.producers {
            let node = Self::node_id(net.topology(), &spec.node)?;
            net.trace_route(node, spec.destination)
                .map_err(|reason| ConfigurationError::UnreachableDestination {
                    from: spec.node.clone(),
                    destination: spec.destination,
                    reason,
                })?;
        }
        Ok(())
    }
}

// ============================================================================
// Run
// ============================================================================

/// Outcome of `run`, mapped onto a process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    /// The scenario could not be set up; no virtual time passed
    SetupFailure,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::SetupFailure => 1,
        }
    }
}

/// Build, check and run a scenario. `seed` overrides the scenario's own.
pub fn run_scenario(
    config: &ScenarioConfig,
    seed: Option<[u8; 32]>,
    sink: Box<dyn TraceSink>,
) -> Result<RunReport, ConfigurationError> {
    let seed = match seed {
        Some(s) => s,
        None => config.resolve_seed()?,
    };

    let mut net = config.build(seed, sink)?;
    config.preflight(&net)?;

    let stop = config.stop_time();
    info!(
        "running '{}' until {}s",
        config.meta.name.as_deref().unwrap_or("scenario"),
        config.duration
    );
    let executed = net.run_until(stop);
    info!("run finished: {} events executed", executed);
    Ok(net.report())
}

pub fn run(config: &ScenarioConfig, sink: Box<dyn TraceSink>) -> ExitStatus {
    match run_scenario(config, None, sink) {
        Ok(_) => ExitStatus::Success,
        Err(e) => {
            error!("setup failed: {}", e);
            ExitStatus::SetupFailure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::vn_error::DropReason;
    use crate::vn_interface::{NoOpSink, TraceEvent};
    use crate::vn_trace::CollectorSink;

    const SEED: [u8; 32] = [3u8; 32];

    const YAML: &str = r#"
meta:
  name: small
  description: one gateway pair
seed: "0x0101010101010101010101010101010101010101010101010101010101010101"
duration: 5
nodes:
  - { name: a, role: endpoint }
  - { name: g1, role: gateway }
  - { name: t, role: transit-router }
  - { name: g2, role: gateway }
  - { name: b, role: endpoint }
links:
  - { kind: segment, nodes: [a, g1], bandwidth: 100Mbps, delay_ms: 1, subnet: 10.0.1.0, mask: 255.255.255.0 }
  - { kind: point-to-point, nodes: [g1, t], bandwidth: 10000000, subnet: 10.0.100.0, mask: 255.255.255.0 }
  - { kind: point-to-point, nodes: [t, g2], bandwidth: 10Mbps, subnet: 10.0.200.0, mask: 255.255.255.0 }
  - { kind: segment, nodes: [b, g2], subnet: 10.0.2.0, mask: 255.255.255.0 }
tunnels:
  - a: g1
    b: g2
    key:
      passphrase: correct horse
    spis: [768, 769]
consumers:
  - { node: b, port: 7 }
producers:
  - { node: a, destination: 10.0.2.1, port: 7, count: 3, interval: 0.5, start: 1.0, fill: random }
"#;

    #[test]
    fn test_parse_data_rate() {
        assert_eq!(parse_data_rate("100Mbps").unwrap(), 100_000_000);
        assert_eq!(parse_data_rate("30Mbps").unwrap(), 30_000_000);
        assert_eq!(parse_data_rate("1.5Gbps").unwrap(), 1_500_000_000);
        assert_eq!(parse_data_rate("56Kbps").unwrap(), 56_000);
        assert_eq!(parse_data_rate("9600bps").unwrap(), 9_600);
        assert_eq!(parse_data_rate(" 2500 ").unwrap(), 2_500);

        assert!(parse_data_rate("fast").is_err());
        assert!(parse_data_rate("0Mbps").is_err());
        assert!(parse_data_rate("-5Mbps").is_err());
        assert!(DataRate::Bps(0).bits_per_second().is_err());
    }

    #[test]
    fn test_parse_seed_hex() {
        let hex = "ab".repeat(32);
        assert_eq!(parse_seed_hex(&hex).unwrap(), [0xAB; 32]);
        assert_eq!(parse_seed_hex(&format!("0x{}", hex)).unwrap(), [0xAB; 32]);
        assert!(parse_seed_hex("abcd").is_err());
        assert!(parse_seed_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_resolve_seed() {
        let mut config = ScenarioConfig::two_lan_vpn();
        config.seed = Some("07".repeat(32));
        assert_eq!(config.resolve_seed().unwrap(), [7; 32]);

        config.seed = None;
        assert!(config.resolve_seed().is_ok());
    }

    #[test]
    fn test_yaml_scenario() {
        let config = ScenarioConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.meta.name.as_deref(), Some("small"));
        assert_eq!(config.nodes.len(), 5);
        assert_eq!(config.links[1].bandwidth, Some(DataRate::Bps(10_000_000)));
        assert_eq!(
            config.tunnels[0].key,
            KeySource::Passphrase("correct horse".to_string())
        );
        assert_eq!(config.tunnels[0].spis, Some((0x300, 0x301)));
        assert_eq!(config.producers[0].fill, Some(PayloadFill::Random));
        assert_eq!(config.transform, "keyed-stream");

        let trace = Rc::new(RefCell::new(CollectorSink::new()));
        let report = run_scenario(&config, None, Box::new(trace.clone())).unwrap();
        assert_eq!(report.seed_used, [1; 32]);
        assert_eq!(report.final_time, seconds(5.0));
        assert_eq!(report.statistics.consumer_deliveries, 3);
        assert_eq!(report.statistics.encapsulations, 3);
        assert_eq!(report.statistics.total_drops(), 0);

        let spis: Vec<Spi> = trace
            .borrow()
            .of_kind("Decapsulated")
            .filter_map(|r| match r.event {
                TraceEvent::Decapsulated { spi, .. } => Some(spi),
                _ => None,
            })
            .collect();
        assert_eq!(spis, vec![0x300, 0x300, 0x300]);
    }

    #[test]
    fn test_bad_yaml_is_parse_error() {
        assert!(matches!(
            ScenarioConfig::from_yaml_str("nodes: [ {name: a} ]"),
            Err(ConfigurationError::Parse(_))
        ));
        assert!(matches!(
            ScenarioConfig::from_file("/nonexistent/scenario.yaml"),
            Err(ConfigurationError::Parse(_))
        ));
    }

    #[test]
    fn test_two_lan_addresses() {
        let config = ScenarioConfig::two_lan_vpn();
        let net = config.build(SEED, Box::new(NoOpSink)).unwrap();
        let t = net.topology();
        let addrs = |name: &str| t.node_addresses(t.node_by_name(name).unwrap());

        assert_eq!(addrs("n0"), vec![Ipv4Addr::new(10, 1, 1, 1)]);
        assert_eq!(addrs("n2"), vec![Ipv4Addr::new(10, 1, 1, 3)]);
        assert_eq!(addrs("n3"), vec![Ipv4Addr::new(10, 1, 2, 1)]);
        assert_eq!(
            addrs("r0"),
            vec![Ipv4Addr::new(10, 1, 1, 4), Ipv4Addr::new(10, 1, 100, 1)]
        );
        assert_eq!(
            addrs("r1"),
            vec![Ipv4Addr::new(10, 1, 100, 2), Ipv4Addr::new(10, 1, 200, 1)]
        );
        assert_eq!(
            addrs("r2"),
            vec![Ipv4Addr::new(10, 1, 2, 4), Ipv4Addr::new(10, 1, 200, 2)]
        );
    }

    #[test]
    fn test_two_lan_run() {
        let config = ScenarioConfig::two_lan_vpn();
        let trace = Rc::new(RefCell::new(CollectorSink::new()));
        let report = run_scenario(&config, Some(SEED), Box::new(trace.clone())).unwrap();

        assert_eq!(report.seed_used, SEED);
        assert_eq!(report.final_time, seconds(11.0));
        assert_eq!(report.statistics.packets_originated, 1);
        assert_eq!(report.statistics.consumer_deliveries, 1);
        assert_eq!(report.statistics.encapsulations, 1);
        assert_eq!(report.statistics.decapsulations, 1);
        assert_eq!(report.events_pending, 0);
        assert_eq!(report.link_labels[2], "r0-r1");

        let trace = trace.borrow();
        let received = trace.app_receptions().next().unwrap();
        assert!(matches!(
            received.event,
            TraceEvent::AppReceived { port: 9, size: 1024, .. }
        ));
        assert_eq!(run(&config, Box::new(NoOpSink)), ExitStatus::Success);
    }

    #[test]
    fn test_same_seed_reproduces_run() {
        let mut config = ScenarioConfig::two_lan_vpn();
        for link in &mut config.links {
            if link.kind == LinkKind::PointToPoint {
                link.loss = 0.25;
            }
        }
        config.producers[0].count = Some(30);
        config.producers[0].interval = Some(0.1);
        config.producers[0].fill = Some(PayloadFill::Random);

        let once = || {
            let trace = Rc::new(RefCell::new(CollectorSink::new()));
            let report = run_scenario(&config, Some(SEED), Box::new(trace.clone())).unwrap();
            let events = trace.borrow().events.clone();
            (events, report.statistics.consumer_deliveries)
        };
        let (a, delivered_a) = once();
        let (b, delivered_b) = once();
        assert_eq!(a, b);
        assert_eq!(delivered_a, delivered_b);
        assert!(delivered_a < 30);
    }

    #[test]
    fn test_unreachable_destination_fails_setup() {
        let mut config = ScenarioConfig::two_lan_vpn();
        config.producers[0].destination = Ipv4Addr::new(10, 9, 9, 9);

        let err = run_scenario(&config, Some(SEED), Box::new(NoOpSink)).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnreachableDestination {
                from: "n3".to_string(),
                destination: Ipv4Addr::new(10, 9, 9, 9),
                reason: DropReason::NoRoute {
                    destination: Ipv4Addr::new(10, 9, 9, 9)
                },
            }
        );
        assert_eq!(run(&config, Box::new(NoOpSink)), ExitStatus::SetupFailure);
        assert_eq!(ExitStatus::SetupFailure.code(), 1);
    }

    #[test]
    fn test_invalid_tunnel_key() {
        let mut config = ScenarioConfig::two_lan_vpn();
        config.tunnels[0].key = KeySource::Hex("1234".to_string());
        assert!(matches!(
            run_scenario(&config, Some(SEED), Box::new(NoOpSink)),
            Err(ConfigurationError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_address_exhaustion_is_fatal() {
        let mut config = ScenarioConfig::two_lan_vpn();
        // a /30 has two host addresses for four interfaces
        config.links[0].mask = Ipv4Addr::new(255, 255, 255, 252);
        assert!(matches!(
            config.build(SEED, Box::new(NoOpSink)),
            Err(ConfigurationError::Topology(TopologyError::AddressExhausted { capacity: 2, .. }))
        ));
    }

    #[test]
    fn test_unknown_names_rejected() {
        let mut config = ScenarioConfig::two_lan_vpn();
        config.links[3].nodes[1] = "r9".to_string();
        assert_eq!(
            config.build(SEED, Box::new(NoOpSink)).err(),
            Some(ConfigurationError::Topology(TopologyError::UnknownNode(
                "r9".to_string()
            )))
        );

        let mut config = ScenarioConfig::two_lan_vpn();
        config.transform = "rot13".to_string();
        assert!(matches!(
            config.build(SEED, Box::new(NoOpSink)),
            Err(ConfigurationError::InvalidScenario(_))
        ));
    }

    #[test]
    fn test_bundled_scenarios() {
        let two_lan =
            ScenarioConfig::from_yaml_str(include_str!("../scenarios/two_lan_vpn.yaml")).unwrap();
        let report = run_scenario(&two_lan, Some(SEED), Box::new(NoOpSink)).unwrap();
        assert_eq!(report.statistics.consumer_deliveries, 1);
        assert_eq!(report.statistics.total_drops(), 0);

        let lossy =
            ScenarioConfig::from_yaml_str(include_str!("../scenarios/lossy_transit.yaml")).unwrap();
        let report = run_scenario(&lossy, None, Box::new(NoOpSink)).unwrap();
        let stats = &report.statistics;
        assert_eq!(stats.packets_originated, 50);
        assert_eq!(stats.consumer_deliveries + stats.drops_for("link-loss"), 50);
        assert_eq!(stats.total_drops(), stats.drops_for("link-loss"));

        let disconnected = ScenarioConfig::from_yaml_str(include_str!(
            "../scenarios/disconnected_segment.yaml"
        ))
        .unwrap();
        assert!(matches!(
            run_scenario(&disconnected, Some(SEED), Box::new(NoOpSink)),
            Err(ConfigurationError::UnreachableDestination { .. })
        ));
    }

    #[test]
    fn test_key_sources_from_yaml() {
        let tunnel = |key: &str| {
            let yaml = format!("{{ a: g1, b: g2, key: {} }}", key);
            serde_yaml::from_str::<TunnelSpec>(&yaml).map(|t| t.key)
        };
        assert_eq!(tunnel("random").unwrap(), KeySource::Random);
        assert_eq!(
            tunnel("{ hex: abcd }").unwrap(),
            KeySource::Hex("abcd".to_string())
        );
        assert_eq!(
            tunnel("{ passphrase: open sesame }").unwrap(),
            KeySource::Passphrase("open sesame".to_string())
        );
        assert!(tunnel("{ pin: 1234 }").is_err());

        let bare: TunnelSpec = serde_yaml::from_str("{ a: g1, b: g2 }").unwrap();
        assert_eq!(bare.key, KeySource::Random);
    }

    #[test]
    fn test_non_ascii_hex_key_is_rejected() {
        let mut config = ScenarioConfig::two_lan_vpn();
        // 64 bytes, with a two-byte character straddling a digit pair
        config.tunnels[0].key = KeySource::Hex(format!("{}\u{e9}0", "0".repeat(61)));
        assert!(matches!(
            config.build(SEED, Box::new(NoOpSink)),
            Err(ConfigurationError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_negative_times_rejected() {
        let invalid = |config: &ScenarioConfig| {
            matches!(
                config.build(SEED, Box::new(NoOpSink)),
                Err(ConfigurationError::InvalidScenario(_))
            )
        };

        let mut config = ScenarioConfig::two_lan_vpn();
        config.links[2].delay_ms = Some(-5.0);
        assert!(invalid(&config));

        let mut config = ScenarioConfig::two_lan_vpn();
        config.links[0].delay_ms = Some(f64::NAN);
        assert!(invalid(&config));

        let mut config = ScenarioConfig::two_lan_vpn();
        config.producers[0].start = Some(-3.0);
        assert!(invalid(&config));

        let mut config = ScenarioConfig::two_lan_vpn();
        config.producers[0].interval = Some(f64::INFINITY);
        assert!(invalid(&config));

        let mut config = ScenarioConfig::two_lan_vpn();
        config.consumers[0].stop = Some(-1.0);
        assert!(invalid(&config));

        // zero stays valid
        let mut config = ScenarioConfig::two_lan_vpn();
        config.links[2].delay_ms = Some(0.0);
        config.producers[0].start = Some(0.0);
        assert!(config.build(SEED, Box::new(NoOpSink)).is_ok());
    }

    #[test]
    fn test_tunnel_on_transit_router_rejected() {
        let mut config = ScenarioConfig::two_lan_vpn();
        config.tunnels[0].b = "r1".to_string();
        assert!(matches!(
            config.build(SEED, Box::new(NoOpSink)),
            Err(ConfigurationError::Association(crate::vn_error::SaError::NotAGateway(_)))
        ));
    }
}
