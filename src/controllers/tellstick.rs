// controllers/tellstick.rs
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::{debug, warn};

use super::Controller;
use crate::{error::ControllerError, methods::Methods, protocols::Signal};

const MAX_ACK_LEN: usize = 32;

pub trait Port: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Port for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TellStickModel {
    /// Only carries `S` pulse frames.
    Classic,
    /// Also carries compressed `T` frames.
    Duo,
}

impl TellStickModel {
    /// Line speed of the transceiver's USB serial bridge.
    pub fn baud_rate(self) -> u32 {
        match self {
            TellStickModel::Classic => 4800,
            TellStickModel::Duo => 9600,
        }
    }
}

/// Serial RF transceiver. Sends are serialized on the port mutex and each
/// one is bounded by the configured timeout.
pub struct TellStick {
    id: i32,
    priority: i32,
    model: TellStickModel,
    methods: Methods,
    path: Option<PathBuf>,
    timeout: Duration,
    await_ack: bool,
    port: Mutex<Option<Box<dyn Port>>>,
}

impl TellStick {
    pub fn new(
        id: i32,
        priority: i32,
        model: TellStickModel,
        path: Option<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            priority,
            model,
            methods: Methods::all(),
            path,
            timeout,
            await_ack: true,
            port: Mutex::new(None),
        }
    }

    /// Uses an already open stream instead of a device path.
    pub fn with_port(mut self, port: Box<dyn Port>) -> Self {
        self.port = Mutex::new(Some(port));
        self
    }

    pub fn with_methods(mut self, methods: Methods) -> Self {
        self.methods = methods;
        self
    }

    pub fn with_ack(mut self, await_ack: bool) -> Self {
        self.await_ack = await_ack;
        self
    }

    async fn open(&self) -> Result<Box<dyn Port>, ControllerError> {
        let path = self.path.as_ref().ok_or(ControllerError::Unavailable(self.id))?;
        let baud = self.model.baud_rate();
        let port = tokio_serial::new(path.to_string_lossy(), baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
            .map_err(|e| match e.kind {
                tokio_serial::ErrorKind::NoDevice => ControllerError::Unavailable(self.id),
                _ => ControllerError::Io(e.into()),
            })?;
        debug!(controller = self.id, path = %path.display(), baud, "Opened transceiver");
        Ok(Box::new(port))
    }

    async fn transmit(&self, port: &mut Box<dyn Port>, signal: &Signal) -> Result<(), ControllerError> {
        port.write_all(signal.as_bytes()).await?;
        port.flush().await?;
        if !self.await_ack {
            return Ok(());
        }

        let mut line = Vec::with_capacity(8);
        while line.len() < MAX_ACK_LEN {
            let byte = port.read_u8().await?;
            if byte == b'\n' {
                break;
            }
            if byte != b'\r' {
                line.push(byte);
            }
        }
        match (line.first(), line.get(1).map(|b| *b as char), signal.kind()) {
            (Some(b'+'), Some(echo), Some(kind)) if echo == kind => Ok(()),
            _ => Err(ControllerError::Rejected(
                String::from_utf8_lossy(&line).into_owned(),
            )),
        }
    }
}

#[async_trait]
impl Controller for TellStick {
    fn id(&self) -> i32 {
        self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn supported_methods(&self) -> Methods {
        self.methods
    }

    async fn send(&self, signal: &Signal) -> Result<(), ControllerError> {
        if signal.kind() == Some('T') && self.model == TellStickModel::Classic {
            return Err(ControllerError::UnsupportedFrame {
                controller: self.id,
                kind: 'T',
            });
        }

        let mut guard = self.port.lock().await;
        let mut port = match guard.take() {
            Some(port) => port,
            None => self.open().await?,
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.transmit(&mut port, signal)).await;
        metrics::histogram!("rf_transmit_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(Ok(())) => {
                *guard = Some(port);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(controller = self.id, error = %e, "Transmit failed, closing port");
                Err(e)
            }
            Err(_) => {
                warn!(controller = self.id, "Transmit timed out, closing port");
                Err(ControllerError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}
