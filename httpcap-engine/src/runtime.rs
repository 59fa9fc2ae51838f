/*!
# Capture Runtime

[`Sniffer`] wires a packet source through TCP reassembly into the flow
correlator, and owns the event dispatcher. `start` is blocking: it runs the
single reassembly-notification loop on the calling thread until the
terminate flag is set, the source runs dry, or capture fails.
*/

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, trace};

use httpcap_capture::packet::decode;
use httpcap_capture::{Assembler, CaptureOptions, PacketSource, Poll, Timestamp};
use httpcap_config::HttpcapConfig;
use httpcap_core::events::{
    DeliveryMode, EventDispatcher, EventReceiver, TransactionEvent, TransactionHandler,
};
use httpcap_protocols::Framer;
use httpcap_telemetry::MetricsRecorder;

use crate::correlator::{FlowCorrelator, PairSettings};
use crate::error::EngineError;

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Where packets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketSourceSpec {
    /// Live capture on the configured interface.
    Live,
    /// Replay of a pcap file.
    Offline(PathBuf),
}

enum Delivery {
    Callback(TransactionHandler),
    Queue(EventDispatcher),
    Disabled,
}

enum LoopExit {
    Terminated,
    Exhausted,
    Failed(httpcap_capture::CaptureError),
}

pub struct Sniffer {
    config: HttpcapConfig,
    source: PacketSourceSpec,
    delivery: Delivery,
    metrics: MetricsRecorder,
}

impl Sniffer {
    pub fn new(config: HttpcapConfig) -> Result<Self, EngineError> {
        Ok(Self {
            config,
            source: PacketSourceSpec::Live,
            delivery: Delivery::Disabled,
            metrics: MetricsRecorder::new()?,
        })
    }

    /// Delivers each transaction to `handler` on `dispatch.workers` threads.
    pub fn on_transaction<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TransactionEvent) + Send + Sync + 'static,
    {
        self.delivery = Delivery::Callback(Arc::new(handler));
        self
    }

    /// Switches to queue delivery and hands out the queue. The receiver
    /// reports the end once `start` has returned and the queue is drained.
    pub fn subscribe(&mut self) -> EventReceiver {
        let (dispatcher, receiver) =
            EventDispatcher::with_queue(self.config.dispatch.queue_capacity);
        self.delivery = Delivery::Queue(dispatcher);
        receiver
    }

    pub fn source(mut self, source: PacketSourceSpec) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &HttpcapConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Runs capture until `terminate` is set, an offline source is
    /// exhausted, or capture fails. Opening the source and installing the
    /// filter happen first; their errors are returned before anything runs.
    #[instrument(skip_all, fields(source = ?self.source))]
    pub fn start(self, terminate: Arc<AtomicBool>) -> Result<(), EngineError> {
        let Sniffer {
            config,
            source,
            delivery,
            metrics,
        } = self;

        let mut packets = match &source {
            PacketSourceSpec::Live => PacketSource::open_live(&CaptureOptions {
                interface: config.capture.interface.clone(),
                filter: config.capture.filter.clone(),
                promiscuous: config.capture.promiscuous,
                snaplen: config.capture.snaplen,
                timeout_ms: config.capture.timeout_ms,
            })?,
            PacketSourceSpec::Offline(path) => {
                PacketSource::open_offline(path, &config.capture.filter)?
            }
        };

        let dispatcher = match delivery {
            Delivery::Queue(dispatcher) => dispatcher,
            Delivery::Callback(handler) => EventDispatcher::new(
                config.dispatch.queue_capacity,
                DeliveryMode::Callback {
                    workers: config.dispatch.workers,
                    handler,
                },
            )?,
            Delivery::Disabled => {
                EventDispatcher::new(config.dispatch.queue_capacity, DeliveryMode::Disabled)?
            }
        };

        let correlator = Arc::new(FlowCorrelator::new(PairSettings {
            framer: Framer::new(config.framing.max_body_size),
            bridge_capacity: config.bridge.capacity,
            append_timeout: config.bridge.append_timeout(),
            publisher: dispatcher.publisher(),
            metrics: metrics.clone(),
        }));
        let mut assembler = Assembler::new(
            correlator.clone(),
            config.reassembly.max_buffered_segments,
        );

        info!(
            link = ?packets.link(),
            workers = dispatcher.worker_count(),
            retention_secs = config.reassembly.retention_secs,
            "Capture started"
        );
        let exit = capture_loop(&mut packets, &mut assembler, &config, &metrics, &terminate);

        if matches!(exit, LoopExit::Exhausted) {
            let stats = assembler.flush_all();
            debug!(closed = stats.closed, "Source exhausted, waiting for pairs");
            while correlator.running() > 0 && !terminate.load(Ordering::Relaxed) {
                thread::sleep(DRAIN_POLL);
            }
        }

        correlator.abort_all();
        dispatcher.shutdown();
        info!(
            packets = metrics.packets.get(),
            transactions = metrics.transactions.get(),
            aborted = metrics.pairs_aborted.get(),
            "Capture stopped"
        );

        match exit {
            LoopExit::Failed(e) => {
                error!(error = %e, "Capture failed");
                Err(e.into())
            }
            LoopExit::Terminated | LoopExit::Exhausted => Ok(()),
        }
    }
}

fn capture_loop(
    packets: &mut PacketSource,
    assembler: &mut Assembler<Arc<FlowCorrelator>>,
    config: &HttpcapConfig,
    metrics: &MetricsRecorder,
    terminate: &AtomicBool,
) -> LoopExit {
    let link = packets.link();
    let retention = chrono::Duration::from_std(config.reassembly.retention()).ok();
    let flush_interval = config.reassembly.flush_interval();
    let mut last_flush = Instant::now();
    let mut last_packet: Option<Timestamp> = None;

    loop {
        if terminate.load(Ordering::Relaxed) {
            info!("Terminate requested");
            return LoopExit::Terminated;
        }

        match packets.next_packet() {
            Ok(Poll::Packet(packet)) => {
                metrics.packets.inc();
                last_packet = Some(last_packet.map_or(packet.seen, |t| t.max(packet.seen)));
                match decode(link, &packet.data, packet.seen) {
                    Ok(Some(segment)) => assembler.process(segment),
                    Ok(None) => {}
                    Err(e) => trace!(error = %e, len = packet.data.len(), "Skipping packet"),
                }
            }
            Ok(Poll::Timeout) => {}
            Ok(Poll::Exhausted) => return LoopExit::Exhausted,
            Err(e) => return LoopExit::Failed(e),
        }

        if last_flush.elapsed() >= flush_interval {
            last_flush = Instant::now();
            let threshold = last_packet.zip(retention).and_then(|(t, r)| t.checked_sub_signed(r));
            if let Some(threshold) = threshold {
                let stats = assembler.flush_older_than(threshold);
                trace!(
                    closed = stats.closed,
                    streams = assembler.stream_count(),
                    "Periodic flush"
                );
            }
        }
    }
}
