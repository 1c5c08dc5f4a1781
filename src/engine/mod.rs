//! Packet Engine
//!
//! Capture and event delivery for the monitor.
//!
//! # Architecture
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐     ┌─────────────┐
//! │   Capture   │────▶│   Pipeline   │────▶│   channel    │────▶│  EventBus   │
//! │   (pcap)    │     │  (1 thread)  │     │  (bounded)   │     │ subscribers │
//! └─────────────┘     └──────────────┘     └──────────────┘     └─────────────┘
//! ```
//!
//! The capture thread owns the pipeline and every per-flow table. The
//! delivery thread calls subscribers in emission order.

pub mod bus;
pub mod capture;
pub mod dispatch;
pub mod pipeline;
pub mod session;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::{Event, EventKind};
use crate::geoip::{CountryLookup, GeoIpResolver};

pub use bus::{EventBus, EventSink};
pub use capture::{CaptureConfig, CaptureError, CaptureStats, PacketCapture, PcapCapture};
pub use dispatch::{classify, Route};
pub use pipeline::{Pipeline, PipelineStats};
pub use session::{Segment, SessionTracker, TcpSession};

/// Monitor statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Decoded packets taken from the capture
    pub packets_captured: u64,
    /// Capture handle counters
    pub capture: CaptureStats,
    /// Pipeline counters
    pub pipeline: PipelineStats,
    /// Events handed to subscribers
    pub events_delivered: u64,
}

/// Passive traffic monitor
///
/// Handlers run on the delivery thread with the bus locked; they must not
/// call [`Monitor::subscribe`].
pub struct Monitor {
    config: Config,
    geo: Arc<dyn CountryLookup>,
    bus: Arc<Mutex<EventBus>>,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<EngineStats>>,
    threads: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Create a monitor using the configured GeoIP database
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let geo = GeoIpResolver::from_config(&config.geoip).context("Failed to initialize GeoIP")?;
        if !geo.has_database() {
            warn!("No GeoIP database configured, countries will be unrecognized");
        }
        Ok(Self::with_lookup(config, Arc::new(geo)))
    }

    /// Create a monitor with a custom country lookup
    pub fn with_lookup(config: Config, geo: Arc<dyn CountryLookup>) -> Self {
        Self {
            config,
            geo,
            bus: Arc::new(Mutex::new(EventBus::new())),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(EngineStats::default())),
            threads: Vec::new(),
        }
    }

    /// Register a handler for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.bus.lock().subscribe(kind, handler);
    }

    /// Start capturing on an interface; a second call while running is a no-op
    pub fn start(&mut self, interface: &str) -> anyhow::Result<()> {
        if self.is_running() {
            debug!("Monitor already running");
            return Ok(());
        }
        let capture = PcapCapture::open_live(interface, &self.config.capture)
            .with_context(|| format!("Failed to open capture on {}", interface))?;
        self.spawn(Box::new(capture));
        Ok(())
    }

    /// Replay a pcap file through the pipeline
    pub fn start_offline(&mut self, path: &Path) -> anyhow::Result<()> {
        if self.is_running() {
            debug!("Monitor already running");
            return Ok(());
        }
        let capture = PcapCapture::open_offline(path, &self.config.capture)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        self.spawn(Box::new(capture));
        Ok(())
    }

    /// Run an already opened capture
    pub fn start_with(&mut self, capture: Box<dyn PacketCapture>) {
        if self.is_running() {
            debug!("Monitor already running");
            return;
        }
        self.spawn(capture);
    }

    fn spawn(&mut self, mut capture: Box<dyn PacketCapture>) {
        self.join();
        self.running.store(true, Ordering::SeqCst);

        let (tx, rx) = crossbeam_channel::bounded::<Event>(self.config.capture.channel_capacity.max(1));

        let running = self.running.clone();
        let stats = self.stats.clone();
        let mut pipeline = Pipeline::new(&self.config, self.geo.clone());

        self.threads.push(std::thread::spawn(move || {
            let mut sink = tx;
            sink.emit(Event::Ready);
            info!("Monitor started");

            while running.load(Ordering::SeqCst) {
                match capture.next_packet() {
                    Ok(Some(packet)) => {
                        pipeline.process(&packet, &mut sink);
                        let mut s = stats.write();
                        s.packets_captured += 1;
                        s.pipeline = pipeline.stats();
                    }
                    Ok(None) => {}
                    Err(CaptureError::Exhausted) => {
                        info!("End of capture");
                        break;
                    }
                    Err(e) => {
                        error!("Capture error: {}", e);
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }
            }

            stats.write().capture = capture.stats();
            capture.close();
            pipeline.clear();
            running.store(false, Ordering::SeqCst);
            info!("Capture stopped");
        }));

        let bus = self.bus.clone();
        let stats = self.stats.clone();
        self.threads.push(std::thread::spawn(move || deliver(rx, &bus, &stats)));
    }

    /// Stop capturing and discard in-flight flow state
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Stopping monitor...");
        }
        self.join();
    }

    /// Block until the capture ends on its own (end of a replayed file)
    pub fn wait(&mut self) {
        self.join();
    }

    fn join(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("Monitor thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drain the event channel into subscribers until the capture side hangs up
fn deliver(rx: Receiver<Event>, bus: &Mutex<EventBus>, stats: &RwLock<EngineStats>) {
    for event in rx.iter() {
        bus.lock().deliver(&event);
        stats.write().events_delivered += 1;
    }
    debug!("Event delivery finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Packet, TcpFlags};
    use crate::geoip::StaticCountries;
    use std::collections::VecDeque;

    /// Replays a fixed packet list, then reports end of capture
    struct Scripted {
        packets: VecDeque<Packet>,
        stats: CaptureStats,
    }

    impl PacketCapture for Scripted {
        fn next_packet(&mut self) -> Result<Option<Packet>, CaptureError> {
            match self.packets.pop_front() {
                Some(p) => {
                    self.stats.received += 1;
                    Ok(Some(p))
                }
                None => Err(CaptureError::Exhausted),
            }
        }

        fn stats(&self) -> CaptureStats {
            self.stats
        }

        fn close(&mut self) {
            self.packets.clear();
        }
    }

    fn monitor() -> Monitor {
        Monitor::with_lookup(Config::default(), Arc::new(StaticCountries::new()))
    }

    #[test]
    fn test_monitor_creation() {
        let m = monitor();
        assert!(!m.is_running());
        assert_eq!(m.stats().packets_captured, 0);
    }

    #[test]
    fn test_replay_delivers_in_order() {
        let mut m = monitor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let s = seen.clone();
            m.subscribe(kind, move |e| s.lock().push(e.kind()));
        }

        let src = "10.1.1.1:40000".parse().unwrap();
        let dst = "10.2.2.2:443".parse().unwrap();
        let syn = TcpFlags { syn: true, ..Default::default() };
        let rst = TcpFlags { rst: true, ..Default::default() };
        let packets = VecDeque::from(vec![
            Packet::tcp(src, dst, 1, syn, Vec::new()),
            Packet::tcp(src, dst, 2, rst, Vec::new()),
        ]);

        m.start_with(Box::new(Scripted { packets, stats: CaptureStats::default() }));
        m.wait();

        assert!(!m.is_running());
        assert_eq!(*seen.lock(), vec![
            EventKind::Ready,
            EventKind::HttpsObserved,
            EventKind::Connect,
            EventKind::HttpsObserved,
            EventKind::Disconnect,
        ]);
        let stats = m.stats();
        assert_eq!(stats.packets_captured, 2);
        assert_eq!(stats.capture.received, 2);
        assert_eq!(stats.events_delivered, 5);
    }

    #[test]
    fn test_stop_without_start() {
        let mut m = monitor();
        m.stop();
        assert!(!m.is_running());
    }
}
