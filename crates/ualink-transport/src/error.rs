/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed (DNS, TCP or the WebSocket handshake).
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Opening the connection did not finish within the connect timeout.
    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),
}
