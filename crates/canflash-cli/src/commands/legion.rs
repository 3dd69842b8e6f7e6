//! Legion vendor commands

use anyhow::{Context, Result};
use canflash::{LegionCommand, T8Client};
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;

use crate::output::OutputContext;

/// Demand commands as named on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DemandKind {
    /// Configure packet delay (wish: delay)
    PacketDelay,
    /// Full checksum-32 (wish: 0 main, 1 MCP)
    Checksum32,
    /// Main processor md5 (wish: 0 full, 1-9 partition)
    Md5,
    /// MCP md5 (wish: 0 full, 1-9 partition)
    McpMd5,
    /// Start secondary bootloader
    StartSecondary,
    /// Marry secondary processor
    MarrySecondary,
    /// Read ADC pin (wish: pin)
    ReadAdc,
}

impl From<DemandKind> for LegionCommand {
    fn from(kind: DemandKind) -> Self {
        match kind {
            DemandKind::PacketDelay => LegionCommand::ConfigurePacketDelay,
            DemandKind::Checksum32 => LegionCommand::Checksum32,
            DemandKind::Md5 => LegionCommand::Md5,
            DemandKind::McpMd5 => LegionCommand::McpMd5,
            DemandKind::StartSecondary => LegionCommand::StartSecondaryBootloader,
            DemandKind::MarrySecondary => LegionCommand::MarrySecondaryProcessor,
            DemandKind::ReadAdc => LegionCommand::ReadAdc,
        }
    }
}

pub async fn ping(t8: &T8Client, cancel: &CancellationToken, ctx: &OutputContext) -> Result<()> {
    t8.legion_ping(cancel).await.context("Legion ping failed")?;
    ctx.success("Legion is running");
    Ok(())
}

pub async fn exit(t8: &T8Client, cancel: &CancellationToken, ctx: &OutputContext) -> Result<()> {
    t8.legion_exit(cancel).await.context("Legion exit failed")?;
    ctx.success("Left bootloader");
    Ok(())
}

pub async fn high_speed(
    t8: &T8Client,
    cancel: &CancellationToken,
    ctx: &OutputContext,
) -> Result<()> {
    t8.legion_enable_high_speed(cancel)
        .await
        .context("Failed to enable high speed")?;
    ctx.success("High speed enabled");
    Ok(())
}

pub async fn demand(
    t8: &T8Client,
    cancel: &CancellationToken,
    command: LegionCommand,
    wish: u16,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!("Demanding {} (wish {})...", command, wish));
    let result = t8
        .legion_demand(cancel, command, wish)
        .await
        .with_context(|| format!("Legion {} failed", command))?;

    if result.is_empty() {
        ctx.success(&format!("{} acknowledged", command));
    } else {
        ctx.value(&command.to_string(), &hex::encode_upper(&result));
    }
    Ok(())
}
