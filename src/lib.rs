//! wirelog
//!
//! Passive traffic logger. Decoded packets go through a single-threaded
//! pipeline that rebuilds TCP sessions, DNS transactions, HTTP exchanges
//! and mail transcripts, and reports them as typed [`Event`]s.
//!
//! ```no_run
//! use wirelog::{Config, EventKind, Monitor};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut monitor = Monitor::new(Config::default())?;
//! monitor.subscribe(EventKind::DnsRequest, |e| println!("{:?}", e));
//! monitor.start("eth0")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod flow;
pub mod geoip;
pub mod protocols;

pub use config::Config;
pub use core::{Event, EventKind, FlowKey, Packet};
pub use engine::{EngineStats, EventSink, Monitor, Pipeline};
pub use geoip::{CountryLookup, GeoIpResolver, StaticCountries};
