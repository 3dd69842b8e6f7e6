//! canflash - CAN diagnostics and Trionic 8 bootloader flashing
//!
//! This crate talks GMLAN diagnostics to engine control units over a CAN
//! adapter and uploads the Legion bootloader into a Trionic 8.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        T8Client                             │
//! │  Bootloader upload engine + Legion vendor commands          │
//! │                                                             │
//! │  ┌──────────────────┐  ┌────────────┐  ┌─────────────────┐  │
//! │  │ BootloaderConfig │  │RetryPolicy │  │ ProgressSink    │  │
//! │  │ (ids, chunking)  │  │ (demand)   │  │ (caller)        │  │
//! │  └──────────────────┘  └────────────┘  └─────────────────┘  │
//! │                          │                                  │
//! │                    ┌─────┴─────┐                            │
//! │                    │  Gmlan    │                            │
//! │                    │(services) │                            │
//! │                    └─────┬─────┘                            │
//! │                          │                                  │
//! │                    ┌─────┴─────┐                            │
//! │                    │  Client   │                            │
//! │                    │(correlate)│                            │
//! │                    └─────┬─────┘                            │
//! │                          │                                  │
//! │                 ┌────────┴────────┐                         │
//! │                 │   CanAdapter    │                         │
//! │                 │(SocketCAN/mock) │                         │
//! │                 └─────────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod gmlan;
pub mod retry;
pub mod t8;
pub mod transport;

pub use client::{Client, FrameSender, FrameSubscription, PendingResponse};
pub use config::{AdapterConfig, BootloaderConfig, CanflashConfig, ClientConfig, RetryConfig};
pub use error::{Error, Result};
pub use frame::{CanFrame, FrameKind};
pub use gmlan::{check_err, Gmlan, GmlanError, NegativeResponseCode};
pub use retry::{retry, RetryError, RetryPolicy};
pub use t8::{
    LegionCommand, NoProgress, ProgressSink, ProgressUpdate, T8Client, T8Error, UploadReport,
    UploadState,
};
pub use transport::{create_adapter, CanAdapter, TransportError};
