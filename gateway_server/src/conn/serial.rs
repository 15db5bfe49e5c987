//! Serial transport backing [`Connection`](super::Connection), mapping
//! the connection's configured baud/parity/stop-bits onto
//! `tokio_serial`'s builder.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: tokio_serial::Error,
    },
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialParity {
    None,
    Odd,
    Even,
}

impl From<SerialParity> for Parity {
    fn from(p: SerialParity) -> Self {
        match p {
            SerialParity::None => Parity::None,
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SerialParams {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: SerialParity,
    pub read_timeout: Duration,
}

pub struct Serial {
    port: SerialStream,
}

impl Serial {
    pub fn open(params: &SerialParams) -> Result<Self, SerialError> {
        let data_bits = match params.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match params.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let port = tokio_serial::new(&params.device, params.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(params.parity.into())
            .timeout(params.read_timeout)
            .open_native_async()
            .map_err(|source| SerialError::Open {
                device: params.device.clone(),
                source,
            })?;

        Ok(Serial { port })
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), SerialError> {
        self.port.write_all(data).await.map_err(SerialError::Io)
    }

    /// Reads one chunk, returning `0` on the device's configured
    /// read-timeout so callers can re-poll rather than treating it as
    /// an error.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize, SerialError> {
        match self.port.read(out).await {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(SerialError::Io(e)),
        }
    }
}
