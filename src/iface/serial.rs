//! Serial transport for the framed radio driver.

use crate::error::IngestError;
use crate::iface::stream::StreamInterface;
use crate::iface::MeshInterface;
use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;

/// Baud rate of the Meshtastic serial console.
const BAUD_RATE: u32 = 115_200;

/// Opens `path` and starts the stream driver on it.
pub async fn open_serial(path: &str) -> Result<Box<dyn MeshInterface>, IngestError> {
    let port = tokio_serial::new(path, BAUD_RATE)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .timeout(Duration::from_secs(5))
        .open_native_async()
        .map_err(|err| IngestError::SerialPortError(err.to_string()))?;
    let iface = StreamInterface::start(port, path.to_string()).await?;
    Ok(Box::new(iface))
}
