//! Shared core for the Amon monitoring system: the contact/monitor/probe
//! object model, the event wire format, domain errors and the probe-type
//! plugin registry. The master, relay and agent crates all build on this.

pub mod dn;
pub mod error;
pub mod event;
pub mod model;
pub mod probes;

pub use error::{Error, ErrorKind, Result};
pub use event::{Event, EventKind, EventProbe};
pub use model::{Contact, DirEntry, Monitor, Probe};
pub use probes::{LogScanConfig, ProbeType, ProbeTypeRegistry};
