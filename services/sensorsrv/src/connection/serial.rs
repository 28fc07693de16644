//! Serial endpoint: newline JSON frames, no auto-reconnect
//!
//! A port written as `host:port` is a serial line bridged over TCP and is
//! opened as a socket; everything else goes through `tokio-serial`.

use tokio::io::AsyncRead;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use super::{pump_frames, tcp, ConnectionSettings, LinkEnd, WorkerContext};
use crate::domain::EndpointKey;
use crate::error::{Result, SensorSrvError};

pub(crate) type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// `Some(addr)` when the port names a TCP bridge rather than a device
pub(crate) fn bridged_address(port: &str) -> Option<&str> {
    if port.starts_with('/') {
        return None;
    }
    let (host, tcp_port) = port.rsplit_once(':')?;
    if host.is_empty() || tcp_port.parse::<u16>().is_err() {
        return None;
    }
    Some(port)
}

pub(crate) async fn open(
    key: &EndpointKey,
    port: &str,
    baudrate: u32,
    settings: &ConnectionSettings,
) -> Result<ByteStream> {
    if let Some(addr) = bridged_address(port) {
        debug!("{}: serial bridge over TCP {}", key, addr);
        let stream = tcp::open(key, addr, settings.connect_timeout).await?;
        return Ok(Box::new(stream));
    }

    debug!("{}: opening {} @{}baud", key, port, baudrate);
    let stream = tokio_serial::new(port, baudrate)
        .timeout(settings.read_timeout)
        .open_native_async()
        .map_err(|e| SensorSrvError::connect(key.as_str(), e))?;
    Ok(Box::new(stream))
}

/// Worker: pump frames until cancelled; device loss ends the worker
pub(crate) async fn run(ctx: WorkerContext, stream: ByteStream) {
    if let LinkEnd::Lost(reason) = pump_frames(&ctx, stream).await {
        ctx.link_lost(&reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridged_address_detection() {
        assert_eq!(bridged_address("localhost:5001"), Some("localhost:5001"));
        assert_eq!(bridged_address("10.0.0.2:7000"), Some("10.0.0.2:7000"));
        assert_eq!(bridged_address("/dev/ttyUSB0"), None);
        assert_eq!(bridged_address("COM3"), None);
        assert_eq!(bridged_address(":5001"), None);
        assert_eq!(bridged_address("host:notaport"), None);
    }
}
