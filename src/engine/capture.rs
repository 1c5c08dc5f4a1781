//! Packet capture
//!
//! libpcap-backed sources:
//! - live capture from a network interface
//! - replay of a pcap file
//!
//! Frames are decoded into [`Packet`]s here; nothing above this layer sees
//! raw link-layer bytes.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pcap::{Activated, Capture};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::packet::Packet;
use crate::core::parser::{parse_frame, LinkKind};

/// Errors that can occur while capturing
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("invalid capture filter {filter:?}: {source}")]
    Filter {
        filter: String,
        source: pcap::Error,
    },

    #[error("end of capture")]
    Exhausted,
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface used when none is given on the command line
    pub interface: Option<String>,
    /// Snapshot length
    pub snaplen: i32,
    /// Read timeout in milliseconds
    pub timeout_ms: i32,
    /// Enable promiscuous mode
    pub promiscuous: bool,
    /// Optional BPF filter applied to the handle
    pub filter: Option<String>,
    /// Events buffered between the capture and delivery threads
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            snaplen: 65535,
            timeout_ms: 100,
            promiscuous: true,
            filter: None,
            channel_capacity: 10_000,
        }
    }
}

/// Trait for packet capture implementations
pub trait PacketCapture: Send {
    /// Get the next packet.
    ///
    /// `Ok(None)` means nothing usable arrived (read timeout or a frame that
    /// could not be decoded). [`CaptureError::Exhausted`] ends a replay.
    fn next_packet(&mut self) -> Result<Option<Packet>, CaptureError>;

    /// Get capture statistics
    fn stats(&self) -> CaptureStats;

    /// Close the capture
    fn close(&mut self);
}

/// Capture statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Frames read from the handle
    pub received: u64,
    /// Frames that could not be sliced
    pub undecoded: u64,
}

/// libpcap capture over a live device or a saved file
pub struct PcapCapture {
    cap: Option<Capture<dyn Activated>>,
    link: LinkKind,
    stats: CaptureStats,
}

impl PcapCapture {
    /// Open a live capture on an interface
    pub fn open_live(interface: &str, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let cap = Capture::from_device(interface)?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .timeout(config.timeout_ms)
            .open()?;
        info!("Capturing on {}", interface);
        Self::from_capture(cap.into(), config)
    }

    /// Open a pcap file for replay
    pub fn open_offline(path: &Path, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let cap = Capture::from_file(path)?;
        info!("Reading packets from {}", path.display());
        Self::from_capture(cap.into(), config)
    }

    fn from_capture(mut cap: Capture<dyn Activated>, config: &CaptureConfig) -> Result<Self, CaptureError> {
        if let Some(filter) = &config.filter {
            cap.filter(filter, true).map_err(|source| CaptureError::Filter {
                filter: filter.clone(),
                source,
            })?;
        }
        let link = LinkKind::from_dlt(cap.get_datalink().0);
        debug!("link type {:?}", link);
        Ok(Self {
            cap: Some(cap),
            link,
            stats: CaptureStats::default(),
        })
    }
}

impl PacketCapture for PcapCapture {
    fn next_packet(&mut self) -> Result<Option<Packet>, CaptureError> {
        let Some(cap) = self.cap.as_mut() else {
            return Err(CaptureError::Exhausted);
        };

        match cap.next_packet() {
            Ok(frame) => {
                self.stats.received += 1;
                let timestamp = frame_time(frame.header.ts.tv_sec as i64, frame.header.ts.tv_usec as i64);
                let packet = parse_frame(frame.data, self.link, timestamp);
                if packet.is_none() {
                    self.stats.undecoded += 1;
                }
                Ok(packet)
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(pcap::Error::NoMorePackets) => Err(CaptureError::Exhausted),
            Err(e) => Err(e.into()),
        }
    }

    fn stats(&self) -> CaptureStats {
        self.stats
    }

    fn close(&mut self) {
        self.cap = None;
    }
}

/// Capture timestamp from a pcap `timeval`
fn frame_time(sec: i64, usec: i64) -> SystemTime {
    let secs = u64::try_from(sec).unwrap_or(0);
    let nanos = u32::try_from(usec.clamp(0, 999_999)).unwrap_or(0) * 1000;
    UNIX_EPOCH + Duration::new(secs, nanos)
}
