//! Adapter layer for raw CAN access
//!
//! This module provides adapters that move frames between the bus and the
//! [`Client`](crate::client::Client):
//! - SocketCAN adapter for raw CAN (Linux only)
//! - Mock adapter with a scriptable ECU responder, for testing (built from
//!   configuration it answers like a Trionic 8 running Legion)
//!
//! # Example
//!
//! ```ignore
//! use canflash::config::AdapterConfig;
//! use canflash::transport::create_adapter;
//!
//! let adapter = create_adapter(&AdapterConfig::default())?;
//! let client = Client::new(adapter, ClientConfig::default()).await?;
//! ```

mod adapter;
pub mod error;
pub mod mock;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use adapter::CanAdapter;
pub use error::TransportError;

use std::sync::Arc;

use crate::config::AdapterConfig;

/// Create a CAN adapter based on configuration
pub fn create_adapter(config: &AdapterConfig) -> Result<Arc<dyn CanAdapter>, TransportError> {
    match config {
        #[cfg(all(target_os = "linux", feature = "socketcan"))]
        AdapterConfig::SocketCan(cfg) => {
            let adapter = socketcan::SocketCanAdapter::new(cfg)?;
            Ok(Arc::new(adapter))
        }
        #[cfg(not(all(target_os = "linux", feature = "socketcan")))]
        AdapterConfig::SocketCan(_) => Err(TransportError::Unsupported(
            "SocketCAN requires Linux and the 'socketcan' feature".to_string(),
        )),
        AdapterConfig::Mock(cfg) => {
            let adapter = mock::MockAdapter::with_t8_responder(cfg);
            Ok(Arc::new(adapter))
        }
    }
}
