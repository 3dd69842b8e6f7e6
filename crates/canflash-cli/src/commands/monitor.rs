//! Monitor command - passive bus traffic

use anyhow::Result;
use canflash::{Client, TransportError};
use tokio_util::sync::CancellationToken;

use crate::output::OutputContext;

/// Print unclaimed frames until Ctrl+C
pub async fn monitor(
    client: &Client,
    cancel: &CancellationToken,
    id: Option<u32>,
    ctx: &OutputContext,
) -> Result<()> {
    let mut frames = client.subscribe();
    ctx.info("Press Ctrl+C to stop");

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };
        match frame {
            Ok(frame) if id.map_or(true, |id| frame.id() == id) => println!("{}", frame),
            Ok(_) => {}
            Err(TransportError::Closed) => {
                ctx.info("Bus closed");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    ctx.success("Monitor stopped");
    Ok(())
}
