//! Command implementations for canflash

pub mod flash;
pub mod legion;
pub mod monitor;

pub use flash::{start, upload};
pub use legion::{demand, exit, high_speed, ping, DemandKind};
pub use monitor::monitor;
