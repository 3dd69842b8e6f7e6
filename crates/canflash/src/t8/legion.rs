//! Legion bootloader vendor commands
//!
//! Every command is one 8-byte frame on the diagnostic request ID; the reply
//! comes back on the response ID with a command specific signature.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{T8Client, T8Error};
use crate::frame::CanFrame;
use crate::gmlan::GmlanError;
use crate::retry::{retry, RetryError};
use crate::transport::TransportError;

const PING: [u8; 8] = [0xEF, 0xBE, 0x00, 0x00, 0x00, 0x00, 0x33, 0x66];
const PING_REPLY: [u8; 4] = [0xDE, 0xAD, 0xF0, 0x0F];
const EXIT: [u8; 8] = [0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
const HIGH_SPEED: [u8; 8] = [0x02, 0xA5, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10];

/// Status byte value meaning "done" in demand replies
const STATUS_READY: u8 = 0x01;

/// Local identifier holding the result block of a digest demand
const RESULT_LOCAL_ID: u8 = 0x07;
const RESULT_LEN: usize = 16;

/// Commands accepted by [`T8Client::legion_demand`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LegionCommand {
    /// wish: inter-frame delay (default 2000)
    ConfigurePacketDelay = 0x00,
    /// wish: 0 main processor, 1 MCP
    Checksum32 = 0x01,
    /// wish: 0 full flash, 1..=9 partition, 10..=12 range reads
    Md5 = 0x02,
    /// wish: 0 full flash, 1..=9 partition
    McpMd5 = 0x03,
    StartSecondaryBootloader = 0x04,
    MarrySecondaryProcessor = 0x05,
    /// wish: pin number
    ReadAdc = 0x06,
}

impl LegionCommand {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Commands that compute a 16-byte digest and need polling until ready
    pub fn has_result_block(self) -> bool {
        matches!(self, LegionCommand::Md5 | LegionCommand::McpMd5)
    }
}

impl TryFrom<u8> for LegionCommand {
    type Error = T8Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => LegionCommand::ConfigurePacketDelay,
            0x01 => LegionCommand::Checksum32,
            0x02 => LegionCommand::Md5,
            0x03 => LegionCommand::McpMd5,
            0x04 => LegionCommand::StartSecondaryBootloader,
            0x05 => LegionCommand::MarrySecondaryProcessor,
            0x06 => LegionCommand::ReadAdc,
            other => {
                return Err(T8Error::Command {
                    command: "demand",
                    reason: format!("unknown command 0x{:02X}", other),
                })
            }
        })
    }
}

impl fmt::Display for LegionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LegionCommand::ConfigurePacketDelay => "configure packet delay",
            LegionCommand::Checksum32 => "checksum-32",
            LegionCommand::Md5 => "md5",
            LegionCommand::McpMd5 => "MCP md5",
            LegionCommand::StartSecondaryBootloader => "start secondary bootloader",
            LegionCommand::MarrySecondaryProcessor => "marry secondary processor",
            LegionCommand::ReadAdc => "read ADC",
        };
        f.write_str(name)
    }
}

impl T8Client {
    async fn legion_request(
        &self,
        cancel: &CancellationToken,
        payload: [u8; 8],
    ) -> Result<CanFrame, GmlanError> {
        self.gmlan
            .request(cancel, self.config.tx_id, self.config.rx_id, payload)
            .await
    }

    /// Check that the Legion bootloader is running
    pub async fn legion_ping(&self, cancel: &CancellationToken) -> Result<(), T8Error> {
        let reply = self.legion_request(cancel, PING).await?;
        if !reply.data().starts_with(&PING_REPLY) {
            return Err(T8Error::Command {
                command: "ping",
                reason: format!("unexpected reply {}", reply),
            });
        }
        debug!("Legion answered ping");
        Ok(())
    }

    /// Leave the bootloader and reset the ECU
    pub async fn legion_exit(&self, cancel: &CancellationToken) -> Result<(), T8Error> {
        let reply = self.legion_request(cancel, EXIT).await?;
        if reply.byte(0) != 0x01 || !matches!(reply.byte(1), 0x50 | 0x60) {
            return Err(T8Error::Command {
                command: "exit",
                reason: format!("unexpected reply {}", reply),
            });
        }
        info!("Legion exited");
        Ok(())
    }

    /// Switch the bootloader to its high speed transfer mode
    pub async fn legion_enable_high_speed(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), T8Error> {
        let reply = self.legion_request(cancel, HIGH_SPEED).await?;
        if reply.byte(3) != STATUS_READY {
            return Err(T8Error::Command {
                command: "high speed",
                reason: format!("not enabled, reply {}", reply),
            });
        }
        info!("Legion high speed enabled");
        Ok(())
    }

    /// Run a Legion "I demand" command
    ///
    /// Digest commands are polled until the bootloader reports the result
    /// ready, then the 16-byte result block is read back. Other commands
    /// return an empty vector once acknowledged. Not-ready replies, timeouts
    /// and busy NRCs are retried within the retry policy; any other NRC and
    /// cancellation end the poll at once.
    pub async fn legion_demand(
        &self,
        cancel: &CancellationToken,
        command: LegionCommand,
        wish: u16,
    ) -> Result<Vec<u8>, T8Error> {
        let w = wish.to_be_bytes();
        let payload = [0x02, 0xA5, command.code(), 0x00, 0x00, 0x00, w[0], w[1]];
        debug!(%command, wish, "Legion demand");

        let result = retry(
            &self.retry,
            cancel,
            |e: &T8Error| match e {
                T8Error::NotReady { .. } => true,
                T8Error::Gmlan(g) => g.is_retryable(),
                _ => false,
            },
            |attempt| self.demand_once(cancel, command, payload, attempt),
        )
        .await;

        match result {
            Ok(data) => Ok(data),
            Err(RetryError::Cancelled { .. }) => Err(TransportError::Cancelled.into()),
            Err(RetryError::Exhausted { last, .. }) | Err(RetryError::Fatal(last)) => Err(last),
        }
    }

    async fn demand_once(
        &self,
        cancel: &CancellationToken,
        command: LegionCommand,
        payload: [u8; 8],
        attempt: u32,
    ) -> Result<Vec<u8>, T8Error> {
        let reply = self.legion_request(cancel, payload).await?;
        if !command.has_result_block() {
            return Ok(Vec::new());
        }
        if reply.byte(3) != STATUS_READY {
            return Err(T8Error::NotReady {
                command,
                attempts: attempt,
            });
        }

        let data = self
            .gmlan
            .read_data_by_local_identifier(
                cancel,
                self.config.tx_id,
                self.config.rx_id,
                RESULT_LOCAL_ID,
                0,
                RESULT_LEN,
            )
            .await?;
        info!(%command, result = %hex::encode(&data), "Legion demand complete");
        Ok(data)
    }
}
