use crate::*;

/// Possible types of event that might occur on a given connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventDetail {
    /// The connection was accepted or dialed, and its tasks are starting
    Connected,
    /// The connection has been torn down; carries the reason
    Disconnected(ConnectionError),
    /// Writing a frame failed. A `Disconnected` event always follows
    SendFailed(ConnectionError),
}

/// An event notified via a server's or client's event channel.
///
/// For any one connection, `Connected` is always delivered before any other
/// event, and exactly one `Disconnected` is delivered last.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// The connection ID to which this event relates
    pub source: ConnectionId,
    /// Handle to the connection itself
    pub connection: Connection,
    /// The type of event and its content
    pub detail: ConnectionEventDetail,
}

impl ConnectionEvent {
    pub(crate) fn connected(connection: Connection) -> Self {
        Self::new(connection, ConnectionEventDetail::Connected)
    }

    pub(crate) fn disconnected(connection: Connection, error: ConnectionError) -> Self {
        Self::new(connection, ConnectionEventDetail::Disconnected(error))
    }

    pub(crate) fn send_failed(connection: Connection, error: ConnectionError) -> Self {
        Self::new(connection, ConnectionEventDetail::SendFailed(error))
    }

    fn new(connection: Connection, detail: ConnectionEventDetail) -> Self {
        Self {
            source: connection.id(),
            connection,
            detail,
        }
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self.detail, ConnectionEventDetail::Disconnected(_))
    }
}
