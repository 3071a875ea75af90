//! Trace sinks for different use cases

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::vn_interface::{
    as_seconds, LinkId, NodeId, PayloadView, SimTime, TraceEvent, TraceSink,
};

// ============================================================================
// Console Logging Sink
// ============================================================================

/// Renders every event through `log::info!`, one line per event
pub struct ConsoleTraceSink {
    enabled: bool,
}

impl ConsoleTraceSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

fn content_summary(content: &PayloadView) -> String {
    match content {
        PayloadView::Plain {
            src_port,
            dst_port,
            payload,
        } => format!("udp {}->{} len:{}", src_port, dst_port, payload.len()),
        PayloadView::Wrapped {
            spi,
            seq,
            ciphertext,
        } => format!("esp spi:{:#x} seq:{} len:{}", spi, seq, ciphertext.len()),
    }
}

impl TraceSink for ConsoleTraceSink {
    fn record(&mut self, time: SimTime, event: TraceEvent) {
        if !self.enabled {
            return;
        }

        let t = as_seconds(time);
        match event {
            TraceEvent::FrameSent {
                link,
                node,
                frame,
                ..
            } => {
                info!(
                    "{:>12.6} {:>4} FrameSent      link:{} {} > {} size:{} {}",
                    t,
                    node,
                    link,
                    frame.src,
                    frame.dst,
                    frame.size,
                    content_summary(&frame.content)
                );
            }
            TraceEvent::FrameDelivered {
                link,
                node,
                accepted,
                frame,
                ..
            } => {
                info!(
                    "{:>12.6} {:>4} FrameDelivered link:{} {} > {} size:{} {}",
                    t,
                    node,
                    link,
                    frame.src,
                    frame.dst,
                    frame.size,
                    if accepted { "accepted" } else { "observed" }
                );
            }
            TraceEvent::Dropped {
                node,
                packet,
                reason,
            } => {
                info!(
                    "{:>12.6} {:>4} Dropped        packet:{} {}",
                    t, node, packet, reason
                );
            }
            TraceEvent::Encapsulated {
                node,
                peer,
                spi,
                seq,
            } => {
                info!(
                    "{:>12.6} {:>4} Encapsulated   peer:{} spi:{:#x} seq:{}",
                    t, node, peer, spi, seq
                );
            }
            TraceEvent::Decapsulated {
                node,
                peer,
                spi,
                seq,
            } => {
                info!(
                    "{:>12.6} {:>4} Decapsulated   peer:{} spi:{:#x} seq:{}",
                    t, node, peer, spi, seq
                );
            }
            TraceEvent::AppSent {
                app,
                node,
                destination,
                size,
            } => {
                info!(
                    "{:>12.6} {:>4} AppSent        app:{} to:{} size:{}",
                    t, node, app, destination, size
                );
            }
            TraceEvent::AppReceived {
                node,
                port,
                from,
                size,
            } => {
                info!(
                    "{:>12.6} {:>4} AppReceived    port:{} from:{} size:{}",
                    t, node, port, from, size
                );
            }
        }
    }
}

// ============================================================================
// CSV Trace Sink
// ============================================================================

/// CSV trace sink for structured data export
pub struct CsvTraceSink {
    writer: BufWriter<File>,
}

impl CsvTraceSink {
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        writeln!(
            writer,
            "time_ns,event,node,link,interface,packet,src,dst,size,spi,seq,details"
        )?;

        Ok(Self { writer })
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

fn wrapper_fields(content: &PayloadView) -> (String, String) {
    match content {
        PayloadView::Wrapped { spi, seq, .. } => (format!("{:#x}", spi), seq.to_string()),
        PayloadView::Plain { .. } => (String::new(), String::new()),
    }
}

impl TraceSink for CsvTraceSink {
    fn record(&mut self, time: SimTime, event: TraceEvent) {
        let result = match event {
            TraceEvent::FrameSent {
                link,
                interface,
                node,
                frame,
            } => {
                let (spi, seq) = wrapper_fields(&frame.content);
                writeln!(
                    self.writer,
                    "{},FrameSent,{},{},{},{},{},{},{},{},{},",
                    time, node, link, interface, frame.packet, frame.src, frame.dst, frame.size, spi, seq
                )
            }
            TraceEvent::FrameDelivered {
                link,
                interface,
                node,
                accepted,
                frame,
            } => {
                let (spi, seq) = wrapper_fields(&frame.content);
                writeln!(
                    self.writer,
                    "{},FrameDelivered,{},{},{},{},{},{},{},{},{},{}",
                    time,
                    node,
                    link,
                    interface,
                    frame.packet,
                    frame.src,
                    frame.dst,
                    frame.size,
                    spi,
                    seq,
                    if accepted { "accepted" } else { "observed" }
                )
            }
            TraceEvent::Dropped {
                node,
                packet,
                reason,
            } => writeln!(
                self.writer,
                "{},Dropped,{},,,{},,,,,,{}",
                time,
                node,
                packet,
                reason.label()
            ),
            TraceEvent::Encapsulated {
                node,
                peer,
                spi,
                seq,
            } => writeln!(
                self.writer,
                "{},Encapsulated,{},,,,,,,{:#x},{},peer={}",
                time, node, spi, seq, peer
            ),
            TraceEvent::Decapsulated {
                node,
                peer,
                spi,
                seq,
            } => writeln!(
                self.writer,
                "{},Decapsulated,{},,,,,,,{:#x},{},peer={}",
                time, node, spi, seq, peer
            ),
            TraceEvent::AppSent {
                app,
                node,
                destination,
                size,
            } => writeln!(
                self.writer,
                "{},AppSent,{},,,,,{},{},,,app={}",
                time, node, destination, size, app
            ),
            TraceEvent::AppReceived {
                node,
                port,
                from,
                size,
            } => writeln!(
                self.writer,
                "{},AppReceived,{},,,,{},,{},,,port={}",
                time, node, from, size, port
            ),
        };

        if let Err(e) = result {
            log::warn!("error writing trace CSV: {}", e);
        }
    }
}

impl Drop for CsvTraceSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

// ============================================================================
// Collector Trace Sink (In-Memory)
// ============================================================================

/// Collects events in memory for programmatic analysis
#[derive(Default)]
pub struct CollectorSink {
    pub events: Vec<TraceRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub time: SimTime,
    pub event: TraceEvent,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    // Query helpers

    /// Frames put on `link`, as a capture on that link would list them
    pub fn frames_on_link(&self, link: LinkId) -> impl Iterator<Item = &TraceRecord> {
        self.events
            .iter()
            .filter(move |r| matches!(&r.event, TraceEvent::FrameSent { link: l, .. } if *l == link))
    }

    /// Frames accepted by `node` for processing
    pub fn accepted_at(&self, node: NodeId) -> impl Iterator<Item = &TraceRecord> {
        self.events.iter().filter(move |r| {
            matches!(&r.event, TraceEvent::FrameDelivered { node: n, accepted: true, .. } if *n == node)
        })
    }

    pub fn drops(&self) -> impl Iterator<Item = &TraceRecord> {
        self.events
            .iter()
            .filter(|r| matches!(r.event, TraceEvent::Dropped { .. }))
    }

    pub fn app_receptions(&self) -> impl Iterator<Item = &TraceRecord> {
        self.events
            .iter()
            .filter(|r| matches!(r.event, TraceEvent::AppReceived { .. }))
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a TraceRecord> {
        self.events.iter().filter(move |r| r.event.kind() == kind)
    }

    pub fn in_time_range(&self, start: SimTime, end: SimTime) -> impl Iterator<Item = &TraceRecord> {
        self.events
            .iter()
            .filter(move |r| r.time >= start && r.time <= end)
    }

    pub fn export_to_csv<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut csv_sink = CsvTraceSink::new(path)?;
        for record in &self.events {
            csv_sink.record(record.time, record.event.clone());
        }
        csv_sink.flush()
    }
}

impl TraceSink for CollectorSink {
    fn record(&mut self, time: SimTime, event: TraceEvent) {
        self.events.push(TraceRecord { time, event });
    }
}

// ============================================================================
// Fan-out Sink
// ============================================================================

/// Forwards every event to each inner sink in order
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn TraceSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: Box<dyn TraceSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Box<dyn TraceSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TraceSink for MultiSink {
    fn record(&mut self, time: SimTime, event: TraceEvent) {
        if let Some((last, rest)) = self.sinks.split_last_mut() {
            for sink in rest {
                sink.record(time, event.clone());
            }
            last.record(time, event);
        }
    }
}
