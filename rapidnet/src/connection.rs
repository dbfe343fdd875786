use crate::*;

use parking_lot::Mutex;
use std::{
    fmt,
    hash::{Hash, Hasher},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
};
use tokio::sync::{
    mpsc::{channel, Receiver, Sender},
    watch,
};

/// Lifecycle of a [`Connection`]. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    /// Shutdown has been requested; the connection's tasks are stopping
    Disconnecting,
    /// Both tasks have exited and the socket has been released
    Closed,
}

impl ConnectionState {
    fn from_u8(val: u8) -> Self {
        match val {
            0 => Self::Active,
            1 => Self::Disconnecting,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Disconnecting => 1,
            Self::Closed => 2,
        }
    }
}

struct ConnectionShared {
    id: ConnectionId,
    remote_addr: SocketAddr,
    overflow_policy: OverflowPolicy,
    state: AtomicU8,
    /// Latch guarding the Active -> Disconnecting transition
    closing: AtomicBool,
    cause: Mutex<Option<ConnectionError>>,
    stop: watch::Sender<bool>,
    outbound: Sender<Frame>,
    inbound: Mutex<Option<Receiver<Frame>>>,
}

/// The halves of a connection's channels owned by its receive and send tasks.
pub(crate) struct ConnectionChannels {
    pub inbound: Sender<Frame>,
    pub outbound: Receiver<Frame>,
    pub stop: watch::Receiver<bool>,
}

/// A handle to one live socket conversation.
///
/// Handles are cheap to clone, and all clones refer to the same connection.
/// Equality is identity: two handles are equal only if they refer to the same
/// connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        settings: &ConnectionSettings,
    ) -> (Self, ConnectionChannels) {
        let (inbound_send, inbound_recv) = channel(settings.inbound_queue_len);
        let (outbound_send, outbound_recv) = channel(settings.outbound_queue_len);
        let (stop_send, stop_recv) = watch::channel(false);

        let connection = Self {
            shared: Arc::new(ConnectionShared {
                id,
                remote_addr,
                overflow_policy: settings.overflow_policy,
                state: AtomicU8::new(ConnectionState::Active.as_u8()),
                closing: AtomicBool::new(false),
                cause: Mutex::new(None),
                stop: stop_send,
                outbound: outbound_send,
                inbound: Mutex::new(Some(inbound_recv)),
            }),
        };

        let channels = ConnectionChannels {
            inbound: inbound_send,
            outbound: outbound_recv,
            stop: stop_recv,
        };

        (connection, channels)
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Take the channel on which decoded frames are delivered, in wire order.
    ///
    /// Only the first call returns the channel. It yields `None` once the
    /// connection has shut down and every queued frame has been read. While
    /// the channel is full, the connection stops reading from its socket.
    pub fn take_receive_channel(&self) -> Option<Receiver<Frame>> {
        self.shared.inbound.lock().take()
    }

    /// Queue a frame for sending, without waiting.
    ///
    /// If the outbound queue is full the frame is refused with
    /// [`ConnectionError::SendQueueFull`]; under [`OverflowPolicy::Disconnect`]
    /// the connection is torn down as well.
    pub fn send(&self, frame: impl Into<Frame>) -> Result<(), ConnectionError> {
        if !self.is_active() {
            return Err(ConnectionError::NotConnected);
        }

        match self.shared.outbound.try_send(frame.into()) {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = ConnectionError::from(e);
                if err == ConnectionError::SendQueueFull {
                    tracing::warn!(connection = %self.id(), "Outbound queue full");
                    if self.shared.overflow_policy == OverflowPolicy::Disconnect {
                        self.disconnect_with(ConnectionError::SendQueueFull);
                    }
                }
                Err(err)
            }
        }
    }

    /// Close the connection.
    ///
    /// Safe to call any number of times from any number of tasks; only the
    /// first call has an effect, and only that call returns `true`.
    pub fn disconnect(&self) -> bool {
        self.disconnect_with(ConnectionError::LocalClose)
    }

    pub(crate) fn disconnect_with(&self, cause: ConnectionError) -> bool {
        if self
            .shared
            .closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        tracing::debug!(connection = %self.id(), %cause, "Disconnecting");

        *self.shared.cause.lock() = Some(cause);
        self.shared
            .state
            .store(ConnectionState::Disconnecting.as_u8(), Ordering::Release);
        self.shared.stop.send_replace(true);
        true
    }

    pub(crate) fn take_cause(&self) -> Option<ConnectionError> {
        self.shared.cause.lock().take()
    }

    pub(crate) fn mark_closed(&self) {
        self.shared
            .state
            .store(ConnectionState::Closed.as_u8(), Ordering::Release);
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shared.id.hash(state)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("remote_addr", &self.shared.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}
