//! In-process Modbus/TCP server for tests and demos
//!
//! Serves FC03 from holding registers keyed by (unit id, address). Missing
//! registers answer with an illegal-data-address exception; muted units
//! never answer, which lets callers exercise response timeouts.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::codec::{MbapHeader, ModbusCodec};
use super::constants::{
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_FUNCTION, FC_READ_HOLDING_REGISTERS,
    MBAP_PREFIX_LEN,
};
use crate::error::Result;

#[derive(Default)]
struct SimulatorState {
    holding_registers: HashMap<(u8, u16), u16>,
    muted_units: HashSet<u8>,
}

/// Cloneable handle; all clones share registers and lifetime
#[derive(Clone, Default)]
pub struct ModbusSimulator {
    state: Arc<RwLock<SimulatorState>>,
    shutdown: CancellationToken,
}

impl ModbusSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind and serve until `stop()`; returns the bound address
    pub async fn start(&self, bind: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(bind).await?;
        let local_addr = listener.local_addr()?;
        info!("Modbus simulator: {}", local_addr);

        let sim = self.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = sim.shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("Simulator client: {}", peer);
                        let sim = sim.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = sim.shutdown.cancelled() => {},
                                _ = sim.serve(stream) => {},
                            }
                        });
                    },
                    Err(e) => {
                        debug!("Simulator accept: {}", e);
                        break;
                    },
                }
            }
        });

        Ok(local_addr)
    }

    /// Close the listener and every client connection
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub async fn set_register(&self, unit_id: u8, register: u16, raw: u16) {
        self.state
            .write()
            .await
            .holding_registers
            .insert((unit_id, register), raw);
    }

    /// Store a business value using the 1/10 register scaling
    pub async fn set_value(&self, unit_id: u8, register: u16, value: f64) -> Result<()> {
        let raw = ModbusCodec::encode_value(value)?;
        self.set_register(unit_id, register, raw).await;
        Ok(())
    }

    pub async fn get_register(&self, unit_id: u8, register: u16) -> Option<u16> {
        self.state
            .read()
            .await
            .holding_registers
            .get(&(unit_id, register))
            .copied()
    }

    /// Stop answering requests for this unit
    pub async fn mute_unit(&self, unit_id: u8) {
        self.state.write().await.muted_units.insert(unit_id);
    }

    pub async fn unmute_unit(&self, unit_id: u8) {
        self.state.write().await.muted_units.remove(&unit_id);
    }

    async fn serve(&self, mut stream: TcpStream) {
        loop {
            let mut prefix = [0u8; MBAP_PREFIX_LEN];
            if stream.read_exact(&mut prefix).await.is_err() {
                break;
            }
            let body_len = match MbapHeader::body_len(&prefix) {
                Ok(len) => len,
                Err(e) => {
                    debug!("Simulator drop: {}", e);
                    break;
                },
            };
            let mut frame = prefix.to_vec();
            frame.resize(MBAP_PREFIX_LEN + body_len, 0);
            if stream.read_exact(&mut frame[MBAP_PREFIX_LEN..]).await.is_err() {
                break;
            }

            let Some(response) = self.respond(&frame).await else {
                continue;
            };
            if let Err(e) = stream.write_all(&response).await {
                debug!("Simulator TX: {}", e);
                break;
            }
        }
    }

    async fn respond(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let (header, pdu) = ModbusCodec::split_frame(frame).ok()?;
        let tid = header.transaction_id;
        let unit = header.unit_id;

        let state = self.state.read().await;
        if state.muted_units.contains(&unit) {
            return None;
        }

        let fc = pdu.function_code()?;
        let response = if fc == FC_READ_HOLDING_REGISTERS {
            let register = pdu.read_u16(1).ok()?;
            match state.holding_registers.get(&(unit, register)) {
                Some(raw) => ModbusCodec::encode_read_response(tid, unit, *raw),
                None => ModbusCodec::encode_exception(tid, unit, fc, EXCEPTION_ILLEGAL_DATA_ADDRESS),
            }
        } else {
            ModbusCodec::encode_exception(tid, unit, fc, EXCEPTION_ILLEGAL_FUNCTION)
        };
        response.ok()
    }
}
