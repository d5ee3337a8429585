//! TCP transport for the framed radio driver.

use crate::error::IngestError;
use crate::iface::stream::StreamInterface;
use crate::iface::MeshInterface;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Bound on the initial TCP connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to `host:port` and starts the stream driver on the socket.
pub async fn open_tcp(host: IpAddr, port: u16) -> Result<Box<dyn MeshInterface>, IngestError> {
    let address = std::net::SocketAddr::new(host, port);
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
        .await
        .map_err(|_| IngestError::TcpError(format!("connect to {address} timed out")))?
        .map_err(|err| IngestError::TcpError(err.to_string()))?;
    let iface = StreamInterface::start(stream, format!("tcp://{address}")).await?;
    Ok(Box::new(iface))
}
