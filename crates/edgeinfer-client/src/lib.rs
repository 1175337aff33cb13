//! Protocol client, feeder, and ingester: the edge-side half of the
//! session-oriented inference protocol.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod connection;
pub mod error;
pub mod feeder;
#[cfg(feature = "ingest")]
pub mod ingester;
#[cfg(feature = "transport")]
pub mod transport;

pub use config::ClientConfig;
pub use connection::{ConnectionAction, ConnectionConfig, ConnectionState, ProtocolClient};
pub use error::{ConnectionError, FeederError, IngestError};
pub use feeder::{CaptureMeta, Feeder, FeederAction, FeederMetrics, IngestJob};
#[cfg(feature = "ingest")]
pub use ingester::{Ingester, IngesterConfig};
