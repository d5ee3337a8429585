//! # Ingestor Error Handling
//!
//! This module defines the IngestError enum, which represents the different
//! error types that can occur while talking to the radio and the dashboard.

/// Represents the different error types that can occur in the ingestor.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// Indicates an error on the TCP transport.
    #[error("TCP transport error: {0}")]
    TcpError(String),

    /// Indicates a BLE target was requested but the transport is unavailable.
    #[error(
        "BLE interface requested but no BLE transport is available in this build; \
         connect the radio via serial or TCP instead"
    )]
    BleUnavailable,

    /// Indicates the radio stream produced an unparsable frame.
    #[error("Error parsing radio frame: {0}")]
    FrameParseError(String),

    /// Indicates a protobuf payload could not be decoded.
    #[error("Protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),

    /// Indicates auto-discovery exhausted every candidate interface.
    #[error("no mesh interface available ({0})")]
    NoAvailableInterface(String),

    /// Indicates a POST to the dashboard API failed.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Indicates a malformed configuration value.
    #[error("Invalid configuration for {name}: {value}")]
    InvalidConfig { name: &'static str, value: String },

    /// Indicates an I/O failure outside the transports.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything that does not fit the variants above.
    #[error("Other error: {0}")]
    Other(String),
}
