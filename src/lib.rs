//! # vpn-netsim - Discrete-Event VPN Network Simulator
//!
//! Simulates a small internetwork of two local segments joined by an untrusted
//! transit path, with a VPN overlay between the segment gateways. Traffic
//! between the segments crosses the transit path as opaque wrappers, while
//! observers on either segment see plaintext.
//!
//! ## Core Components
//!
//! - **Scheduler**: virtual clock and `(time, insertion order)` event queue
//! - **Topology / Routing**: node-link graph, address assignment, static routes
//! - **Link model**: per-packet serialization delay, propagation delay, loss
//! - **SA store / Gateway**: directional security associations, tunnel-mode
//!   encapsulation, strictly monotonic anti-replay
//! - **Applications**: payload producers and consumers bound to endpoints
//! - **Network**: owns all of the above and dispatches scheduled actions
//!
//! ## Usage
//!
//! ```no_run
//! use vn_sim::vn_config::{run_scenario, ScenarioConfig};
//! use vn_sim::vn_trace::ConsoleTraceSink;
//!
//! let config = ScenarioConfig::two_lan_vpn();
//! let report = run_scenario(&config, None, Box::new(ConsoleTraceSink::new(true)))
//!     .expect("scenario setup");
//! report.print_summary();
//! ```
//!
//! Components can also be driven directly: build a `Topology`, hand it to
//! `Network::new`, install gateways and SAs, add applications and call
//! `run_until`. Per-packet failures never stop a run; they are traced as
//! `TraceEvent::Dropped` and counted in the `RunReport`.

// Core simulation modules
pub mod vn_interface;
pub mod vn_error;
pub mod vn_scheduler;
pub mod vn_address;
pub mod vn_topology;
pub mod vn_routing;
pub mod vn_packet;
pub mod vn_link;

// VPN layer
pub mod vn_transform;
pub mod vn_security;
pub mod vn_gateway;

// Applications, world and outputs
pub mod vn_application;
pub mod vn_network;
pub mod vn_stats;
pub mod vn_trace;
pub mod vn_config;

// Re-export commonly used types
pub use vn_config::{run, run_scenario, ExitStatus, ScenarioConfig};
pub use vn_error::{ConfigurationError, DropReason, SaError, ScheduleError, TopologyError};
pub use vn_interface::{
    Direction, NoOpSink, NodeId, SimTime, Spi, TraceEvent, TraceSink,
};
pub use vn_network::{Network, SimAction};
pub use vn_scheduler::{EventHandle, Scheduler};
pub use vn_stats::RunReport;
pub use vn_topology::{LinkKind, LinkParams, NodeRole, Topology};
