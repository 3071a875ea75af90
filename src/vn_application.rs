// Application producers and consumers bound to endpoint nodes

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::vn_interface::{seconds, AppId, NodeId, SimTime};
use crate::vn_scheduler::EventHandle;

/// How producers fill their payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadFill {
    /// Counting byte pattern, easy to spot in a capture
    #[default]
    Pattern,
    /// Bytes from the seeded simulation RNG
    Random,
}

/// Sends `count` datagrams of `payload_size` bytes, `interval` apart, between
/// `start` and `stop`
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub destination: Ipv4Addr,
    pub port: u16,
    pub source_port: u16,
    pub payload_size: usize,
    pub count: u32,
    pub interval: SimTime,
    pub start: SimTime,
    pub stop: SimTime,
    pub fill: PayloadFill,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            destination: Ipv4Addr::UNSPECIFIED,
            port: 9,
            source_port: 49153,
            payload_size: 1024,
            count: 1,
            interval: seconds(1.0),
            start: seconds(2.0),
            stop: seconds(10.0),
            fill: PayloadFill::Pattern,
        }
    }
}

/// Listens on `port` between `start` and `stop`
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub port: u16,
    pub start: SimTime,
    pub stop: SimTime,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            port: 9,
            start: seconds(1.0),
            stop: seconds(10.0),
        }
    }
}

/// Produces one payload per send
pub trait PayloadSource {
    fn produce(&mut self, index: u32, size: usize) -> Vec<u8>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PatternPayload;

impl PayloadSource for PatternPayload {
    fn produce(&mut self, index: u32, size: usize) -> Vec<u8> {
        (0..size)
            .map(|i| (i as u32).wrapping_add(index) as u8)
            .collect()
    }
}

pub struct RandomPayload {
    rng: StdRng,
}

impl RandomPayload {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl PayloadSource for RandomPayload {
    fn produce(&mut self, _index: u32, size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; size];
        self.rng.fill(&mut buf[..]);
        buf
    }
}

/// Receives one callback per datagram delivered to its port
pub trait Consumer {
    fn consume(&mut self, time: SimTime, from: SocketAddrV4, payload: &[u8]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPayload {
    pub time: SimTime,
    pub from: SocketAddrV4,
    pub payload: Vec<u8>,
}

/// Keeps every payload it is handed
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    pub received: Vec<ReceivedPayload>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.received.len()
    }
}

impl Consumer for RecordingConsumer {
    fn consume(&mut self, time: SimTime, from: SocketAddrV4, payload: &[u8]) {
        self.received.push(ReceivedPayload {
            time,
            from,
            payload: payload.to_vec(),
        });
    }
}

impl<T: Consumer> Consumer for Rc<RefCell<T>> {
    fn consume(&mut self, time: SimTime, from: SocketAddrV4, payload: &[u8]) {
        self.borrow_mut().consume(time, from, payload);
    }
}

/// Runtime state of one producer
pub struct Producer {
    pub id: AppId,
    pub node: NodeId,
    pub config: ProducerConfig,
    source: Box<dyn PayloadSource>,
    sent: u32,
    running: bool,
    // next scheduled send, cancelled on stop
    pub(crate) pending: Option<EventHandle>,
}

impl Producer {
    pub fn new(id: AppId, node: NodeId, config: ProducerConfig, source: Box<dyn PayloadSource>) -> Self {
        Self {
            id,
            node,
            config,
            source,
            sent: 0,
            running: false,
            pending: None,
        }
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn start(&mut self) {
        self.running = true;
    }

    pub(crate) fn stop(&mut self) -> Option<EventHandle> {
        self.running = false;
        self.pending.take()
    }

    /// Next payload, or None once stopped or the count is reached
    pub(crate) fn next_payload(&mut self, now: SimTime) -> Option<Vec<u8>> {
        if !self.running || self.sent >= self.config.count || now >= self.config.stop {
            return None;
        }
        let payload = self.source.produce(self.sent, self.config.payload_size);
        self.sent += 1;
        Some(payload)
    }

    /// Time of the following send, if one should be scheduled
    pub(crate) fn next_send_time(&self, now: SimTime) -> Option<SimTime> {
        if !self.running || self.sent >= self.config.count {
            return None;
        }
        let at = now.saturating_add(self.config.interval);
        (at < self.config.stop).then_some(at)
    }
}

/// A consumer bound to (node, port)
pub struct Listener {
    pub node: NodeId,
    pub config: ConsumerConfig,
    pub(crate) active: bool,
    pub(crate) consumer: Box<dyn Consumer>,
    pub delivered: u64,
}

impl Listener {
    pub fn new(node: NodeId, config: ConsumerConfig, consumer: Box<dyn Consumer>) -> Self {
        Self {
            node,
            config,
            active: false,
            consumer,
            delivered: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer(count: u32) -> Producer {
        let config = ProducerConfig {
            destination: Ipv4Addr::new(10, 1, 2, 1),
            payload_size: 8,
            count,
            interval: seconds(1.0),
            start: seconds(2.0),
            stop: seconds(5.0),
            ..Default::default()
        };
        Producer::new(0, 0, config, Box::new(PatternPayload))
    }

    #[test]
    fn test_pattern_payload() {
        let mut p = PatternPayload;
        assert_eq!(p.produce(0, 4), vec![0, 1, 2, 3]);
        assert_eq!(p.produce(2, 3), vec![2, 3, 4]);
        assert_eq!(p.produce(0, 1024).len(), 1024);
    }

    #[test]
    fn test_random_payload_follows_seed() {
        let a = RandomPayload::new(11).produce(0, 32);
        let b = RandomPayload::new(11).produce(0, 32);
        let c = RandomPayload::new(12).produce(0, 32);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_producer_respects_count() {
        let mut p = producer(2);
        assert!(p.next_payload(seconds(2.0)).is_none());

        p.start();
        assert!(p.next_payload(seconds(2.0)).is_some());
        assert_eq!(p.next_send_time(seconds(2.0)), Some(seconds(3.0)));
        assert!(p.next_payload(seconds(3.0)).is_some());
        assert_eq!(p.next_send_time(seconds(3.0)), None);
        assert!(p.next_payload(seconds(4.0)).is_none());
        assert_eq!(p.sent(), 2);
    }

    #[test]
    fn test_producer_stops_at_stop_time() {
        let mut p = producer(100);
        p.start();
        p.next_payload(seconds(4.0)).unwrap();
        // 5.0 is the stop time itself
        assert_eq!(p.next_send_time(seconds(4.0)), None);
        assert!(p.next_payload(seconds(5.0)).is_none());
    }

    #[test]
    fn test_stop_hands_back_pending_send() {
        let mut scheduler: crate::vn_scheduler::Scheduler<()> = crate::vn_scheduler::Scheduler::new();
        let handle = scheduler.schedule_in(seconds(3.0), ());
        let mut p = producer(3);
        p.start();
        p.pending = Some(handle);
        assert_eq!(p.stop(), Some(handle));
        assert!(!p.is_running());
        assert!(p.stop().is_none());
    }

    #[test]
    fn test_recording_consumer_shared() {
        let shared = Rc::new(RefCell::new(RecordingConsumer::new()));
        let mut handle = shared.clone();
        let from = SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, 1), 49153);
        handle.consume(seconds(2.0), from, b"abc");

        let rec = shared.borrow();
        assert_eq!(rec.count(), 1);
        assert_eq!(rec.received[0].payload, b"abc".to_vec());
        assert_eq!(rec.received[0].from, from);
    }
}
