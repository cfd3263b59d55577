//! TCP connect probes with an explicit TTL.

mod driver;

pub use driver::{classify, ConnectProber};
