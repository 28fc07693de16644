//! TCP endpoint: newline JSON frames with automatic reconnection

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::reconnect::ReconnectHelper;
use super::{pump_frames, LinkEnd, WorkerContext};
use crate::domain::EndpointKey;
use crate::error::{Result, SensorSrvError};

/// Connect with a bounded wait
pub(crate) async fn open(key: &EndpointKey, addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    debug!("{}: connecting to {}", key, addr);
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("TCP_NODELAY: {}", e);
            }
            Ok(stream)
        },
        Ok(Err(e)) => Err(SensorSrvError::connect(key.as_str(), e)),
        Err(_) => Err(SensorSrvError::connect(
            key.as_str(),
            format!("timed out after {}ms", connect_timeout.as_millis()),
        )),
    }
}

/// Worker: pump frames, and on loss back off and reconnect until cancelled
pub(crate) async fn run(ctx: WorkerContext, stream: TcpStream, addr: String) {
    let mut helper = ReconnectHelper::new(ctx.settings.reconnect.clone());
    let mut stream = stream;

    loop {
        match pump_frames(&ctx, stream).await {
            LinkEnd::Cancelled => return,
            LinkEnd::Lost(reason) => ctx.link_lost(&reason),
        }

        stream = loop {
            let Some(delay) = helper.begin_attempt() else {
                error!(
                    "{}: giving up after {} reconnect attempts",
                    ctx.key,
                    helper.current_attempt()
                );
                return;
            };
            debug!("{}: reconnect #{} in {:?}", ctx.key, helper.current_attempt(), delay);

            tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {},
            }

            let attempt = tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                attempt = open(&ctx.key, &addr, ctx.settings.connect_timeout) => attempt,
            };
            match attempt {
                Ok(stream) => break stream,
                Err(e) => warn!("{}: reconnect failed: {}", ctx.key, e),
            }
        };

        helper.mark_connected();
        ctx.set_connected(true);
        info!("{}: reconnected", ctx.key);
    }
}
