//! Statistics and results for a simulation run

use std::collections::BTreeMap;

use crate::vn_error::DropReason;
use crate::vn_interface::{as_seconds, LinkId, SimTime};

/// Per-link frame counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkCounters {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    /// Frame arrivals across all receiving interfaces
    pub frames_delivered: u64,
    pub frames_lost: u64,
}

/// Counters accumulated while the simulation runs
#[derive(Debug, Default, Clone)]
pub struct SimStatistics {
    /// Datagrams handed to the network by producers
    pub packets_originated: u64,

    /// Packets relayed by routers and gateways
    pub packets_forwarded: u64,

    pub encapsulations: u64,
    pub decapsulations: u64,

    /// Payloads handed to consumers
    pub consumer_deliveries: u64,

    /// Segment frames seen by interfaces they were not addressed to
    pub frames_observed: u64,

    pub links: BTreeMap<LinkId, LinkCounters>,

    /// Drop counts keyed by `DropReason::label`
    pub drops: BTreeMap<&'static str, u64>,
}

impl SimStatistics {
    pub fn record_drop(&mut self, reason: &DropReason) {
        *self.drops.entry(reason.label()).or_insert(0) += 1;
    }

    pub fn drops_for(&self, label: &str) -> u64 {
        self.drops.get(label).copied().unwrap_or(0)
    }

    pub fn total_drops(&self) -> u64 {
        self.drops.values().sum()
    }

    pub fn link_mut(&mut self, link: LinkId) -> &mut LinkCounters {
        self.links.entry(link).or_default()
    }

    pub fn link(&self, link: LinkId) -> LinkCounters {
        self.links.get(&link).cloned().unwrap_or_default()
    }
}

/// Simulation result
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Seed used for the simulation
    pub seed_used: [u8; 32],

    /// Virtual time when the run stopped
    pub final_time: SimTime,

    /// Number of scheduler events fired
    pub events_executed: u64,

    /// Events still queued when the run stopped
    pub events_pending: usize,

    pub statistics: SimStatistics,

    /// Link names for the summary, indexed by `LinkId`
    pub link_labels: Vec<String>,
}

impl RunReport {
    pub fn seed_hex(&self) -> String {
        self.seed_used.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Print a summary of the simulation results
    pub fn print_summary(&self) {
        let stats = &self.statistics;

        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║        VPN Network Simulation Results                  ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Configuration:");
        println!("  Seed: {}", self.seed_hex());
        println!("  Final time: {:.6}s", as_seconds(self.final_time));
        println!(
            "  Events: {} executed, {} pending\n",
            self.events_executed, self.events_pending
        );

        println!("Traffic:");
        println!("  Datagrams originated: {}", stats.packets_originated);
        println!("  Packets forwarded: {}", stats.packets_forwarded);
        println!("  Consumer deliveries: {}", stats.consumer_deliveries);
        println!(
            "  Tunnel: {} encapsulated, {} decapsulated",
            stats.encapsulations, stats.decapsulations
        );
        println!();

        println!("Links:");
        for (link, counters) in &stats.links {
            let label = self
                .link_labels
                .get(*link)
                .map(|s| s.as_str())
                .unwrap_or("?");
            println!(
                "  [{}] {:<16} sent={} bytes={} delivered={} lost={}",
                link,
                label,
                counters.frames_sent,
                counters.bytes_sent,
                counters.frames_delivered,
                counters.frames_lost
            );
        }
        println!();

        println!("Drops: {}", stats.total_drops());
        for (label, count) in &stats.drops {
            println!("  {}: {}", label, count);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_drop_counters() {
        let mut s = SimStatistics::default();
        s.record_drop(&DropReason::TtlExpired);
        s.record_drop(&DropReason::NoRoute {
            destination: Ipv4Addr::new(10, 9, 9, 9),
        });
        s.record_drop(&DropReason::NoRoute {
            destination: Ipv4Addr::new(10, 9, 9, 8),
        });

        assert_eq!(s.drops_for("no-route"), 2);
        assert_eq!(s.drops_for("ttl-expired"), 1);
        assert_eq!(s.drops_for("replay"), 0);
        assert_eq!(s.total_drops(), 3);
    }

    #[test]
    fn test_link_counters_default_to_zero() {
        let mut s = SimStatistics::default();
        assert_eq!(s.link(3), LinkCounters::default());
        s.link_mut(3).frames_sent += 1;
        assert_eq!(s.link(3).frames_sent, 1);
    }

    #[test]
    fn test_seed_hex() {
        let mut seed = [0u8; 32];
        seed[0] = 0xAB;
        let report = RunReport {
            seed_used: seed,
            final_time: 0,
            events_executed: 0,
            events_pending: 0,
            statistics: SimStatistics::default(),
            link_labels: Vec::new(),
        };
        let hex = report.seed_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("ab00"));
    }
}
