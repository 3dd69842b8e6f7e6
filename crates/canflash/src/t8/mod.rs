//! Trionic 8 bootloader client
//!
//! Uploads the Legion bootloader into RAM over GMLAN TransferData, starts
//! it, and talks to it with its vendor command set.

mod bootloader;
mod error;
mod legion;

pub use bootloader::{NoProgress, ProgressSink, ProgressUpdate, UploadReport, UploadState};
pub use error::T8Error;
pub use legion::LegionCommand;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::Client;
use crate::config::BootloaderConfig;
use crate::gmlan::Gmlan;
use crate::retry::RetryPolicy;

/// Trionic 8 ECU client over a shared [`Client`]
#[derive(Clone)]
pub struct T8Client {
    gmlan: Gmlan,
    config: BootloaderConfig,
    retry: RetryPolicy,
}

impl T8Client {
    pub fn new(client: Arc<Client>, config: BootloaderConfig) -> Self {
        let gmlan = Gmlan::new(client).with_keepalive_id(config.keepalive_id);
        Self {
            gmlan,
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_gmlan(mut self, gmlan: Gmlan) -> Self {
        self.gmlan = gmlan;
        self
    }

    pub fn gmlan(&self) -> &Gmlan {
        &self.gmlan
    }

    pub fn config(&self) -> &BootloaderConfig {
        &self.config
    }

    /// Jump into code previously uploaded at `address`
    pub async fn start_bootloader(
        &self,
        cancel: &CancellationToken,
        address: u32,
    ) -> Result<(), T8Error> {
        self.gmlan
            .transfer_data_execute(cancel, address, self.config.tx_id, self.config.rx_id)
            .await?;
        info!(address = format!("0x{:06X}", address), "Bootloader started");
        Ok(())
    }
}
