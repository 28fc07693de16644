//! Modbus/TCP endpoint
//!
//! On every poll tick each bound sensor gets one FC03 request for its unit
//! id and register. A timeout, exception or malformed response faults that
//! sensor only; a socket error or a stream that lost frame sync ends the
//! worker and faults all of them.

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::{tcp, ConnectionSettings, WorkerContext};
use crate::domain::{EndpointKey, ModbusAddress};
use crate::error::{Result, SensorSrvError};
use crate::protocols::modbus::constants::MBAP_PREFIX_LEN;
use crate::protocols::modbus::{MbapHeader, ModbusCodec};
use crate::protocols::RawReading;

/// Connect, retrying a fixed number of times
pub(crate) async fn open(
    key: &EndpointKey,
    addr: &str,
    settings: &ConnectionSettings,
) -> Result<TcpStream> {
    let attempts = settings.modbus_connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        match tcp::open(key, addr, settings.connect_timeout).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                warn!("{}: connect {}/{}: {}", key, attempt, attempts, e);
                attempt += 1;
                tokio::time::sleep(settings.modbus_retry_delay).await;
            },
        }
    }
}

/// One full MBAP frame, read no further than its declared length
///
/// Nothing received by `deadline` is a timeout. A bad prefix or a frame cut
/// off by the deadline leaves the stream out of sync, so both are transport
/// errors.
async fn read_frame(stream: &mut TcpStream, deadline: Instant) -> Result<Vec<u8>> {
    let mut frame = vec![0u8; MBAP_PREFIX_LEN];
    let mut filled = 0;
    let mut have_prefix = false;

    while filled < frame.len() {
        let n = match timeout_at(deadline, stream.read(&mut frame[filled..])).await {
            Ok(Ok(0)) => return Err(SensorSrvError::transport("closed by peer")),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(SensorSrvError::transport(format!("receive: {e}"))),
            Err(_) if filled == 0 => return Err(SensorSrvError::timeout("no response")),
            Err(_) => {
                return Err(SensorSrvError::transport(format!(
                    "incomplete frame: {filled} of {} bytes",
                    frame.len()
                )))
            },
        };
        filled += n;

        if !have_prefix && filled == MBAP_PREFIX_LEN {
            let mut prefix = [0u8; MBAP_PREFIX_LEN];
            prefix.copy_from_slice(&frame[..MBAP_PREFIX_LEN]);
            let body_len = MbapHeader::body_len(&prefix)
                .map_err(|e| SensorSrvError::transport(format!("bad MBAP prefix: {e}")))?;
            frame.resize(MBAP_PREFIX_LEN + body_len, 0);
            have_prefix = true;
        }
    }
    Ok(frame)
}

/// Request one register and wait for the matching response
pub(crate) async fn poll_register(
    stream: &mut TcpStream,
    transaction_id: u16,
    address: ModbusAddress,
    settings: &ConnectionSettings,
) -> Result<u16> {
    let request =
        ModbusCodec::encode_read_request(transaction_id, address.unit_id, address.register)?;
    stream
        .write_all(&request)
        .await
        .map_err(|e| SensorSrvError::transport(format!("send: {e}")))?;

    let deadline = Instant::now() + settings.response_timeout;
    loop {
        let frame = read_frame(stream, deadline).await.map_err(|e| match e {
            SensorSrvError::TimeoutError(_) => SensorSrvError::timeout(format!(
                "no response from unit {} register {} within {}ms",
                address.unit_id,
                address.register,
                settings.response_timeout.as_millis()
            )),
            other => other,
        })?;

        let (header, pdu) = ModbusCodec::split_frame(&frame)?;
        if header.transaction_id != transaction_id {
            // Late answer to an earlier, timed-out request
            debug!(
                "Stale response: tid {} (waiting for {})",
                header.transaction_id, transaction_id
            );
            continue;
        }
        if header.unit_id != address.unit_id {
            return Err(SensorSrvError::decode(format!(
                "Unit mismatch: expected {}, got {}",
                address.unit_id, header.unit_id
            )));
        }
        return ModbusCodec::parse_read_response(&pdu);
    }
}

/// Worker: poll every bound sensor once per tick until cancelled or the link drops
pub(crate) async fn run(ctx: WorkerContext, mut stream: TcpStream) {
    let mut ticker = tokio::time::interval(ctx.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut transaction_id: u16 = 0;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            _ = ticker.tick() => {},
        }

        for binding in ctx.bindings() {
            let Some(address) = binding.modbus else {
                continue;
            };
            transaction_id = transaction_id.wrapping_add(1);

            let result = tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                result = poll_register(&mut stream, transaction_id, address, &ctx.settings) => result,
            };

            match result {
                Ok(raw) => ctx.publish_reading(RawReading {
                    sensor_id: binding.sensor_id,
                    sensor_name: String::new(),
                    value: ModbusCodec::decode_register(raw),
                    unit: String::new(),
                    timestamp: Utc::now(),
                }),
                Err(e) if e.is_link_loss() => {
                    ctx.link_lost(&e.to_string());
                    return;
                },
                Err(e) => {
                    if matches!(e, SensorSrvError::DecodeError(_)) {
                        ctx.record_decode_error(&e.to_string());
                    } else {
                        warn!("{}: sensor {}: {}", ctx.key, binding.sensor_id, e);
                    }
                    ctx.fault(vec![binding.sensor_id], e.to_string());
                },
            }
        }
    }
}
