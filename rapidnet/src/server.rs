use crate::connection::ConnectionChannels;
use crate::internal::*;
use crate::*;

use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::{
        mpsc::{channel, Receiver, Sender},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::instrument;

/// A listening TCP server.
///
/// Connections are admitted up to the configured maximum; beyond that the
/// accept loop waits for a live connection to close, leaving new peers in the
/// operating system's backlog. Events for every connection are delivered on
/// the single channel returned from [`start`](Self::start).
pub struct TcpServer {
    endpoint: EndpointId,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown_send: Option<oneshot::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
}

impl TcpServer {
    /// Listen on `address` with default settings and the default codec.
    pub async fn start(
        address: &str,
        max_connections: usize,
    ) -> Result<(Self, Receiver<ConnectionEvent>), ListenerError> {
        Self::start_with_config(ServerConfig::new(address, max_connections)).await
    }

    /// Listen using the default codec, configured from `config.connection`.
    pub async fn start_with_config(
        config: ServerConfig,
    ) -> Result<(Self, Receiver<ConnectionEvent>), ListenerError> {
        let factory = DefaultPacketHandlerFactory::shared(&config.connection);
        Self::start_with(config, factory).await
    }

    /// Listen, binding every accepted socket to a codec built by `factory`.
    pub async fn start_with(
        config: ServerConfig,
        factory: SharedPacketHandlerFactory,
    ) -> Result<(Self, Receiver<ConnectionEvent>), ListenerError> {
        config.validate()?;

        let address = resolve(&config.address)
            .await
            .ok_or_else(|| ListenerError::InvalidAddress(config.address.clone()))?;
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;

        let endpoint = EndpointId::next();
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let (event_send, event_recv) = channel(config.event_queue_len);
        let (shutdown_send, shutdown_recv) = oneshot::channel();

        tracing::info!(%local_addr, max_connections = config.max_connections, "Listening");

        let accept_loop = AcceptLoop {
            endpoint,
            listener,
            registry: Arc::clone(&registry),
            factory,
            settings: config.connection,
            events: event_send,
            id_generator: ConnectionIdGenerator::new(endpoint, 1),
        };
        let accept_task = tokio::spawn(accept_loop.run(shutdown_recv));

        let server = Self {
            endpoint,
            local_addr,
            registry,
            shutdown_send: Some(shutdown_send),
            accept_task: Some(accept_task),
        };

        Ok((server, event_recv))
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// The bound address, with the real port if port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn available_slots(&self) -> usize {
        self.registry.available_permits()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.registry.get(id)
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.registry.connections()
    }

    /// Close every live connection. Each still reports its own `Disconnected`.
    pub fn disconnect_all(&self) {
        for connection in self.registry.connections() {
            connection.disconnect_with(ConnectionError::Shutdown);
        }
    }

    /// Stop accepting connections, returning once the accept loop has exited
    /// and the listening socket is closed. Established connections are left
    /// running; see [`disconnect_all`](Self::disconnect_all).
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown_send.take() {
            let _ = shutdown.send(());
        }

        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                tracing::error!("Accept loop failed: {}", e);
            }
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown_send.take() {
            let _ = shutdown.send(());
        }
    }
}

struct AcceptLoop {
    endpoint: EndpointId,
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    factory: SharedPacketHandlerFactory,
    settings: ConnectionSettings,
    events: Sender<ConnectionEvent>,
    id_generator: ConnectionIdGenerator,
}

impl AcceptLoop {
    #[instrument(skip_all, fields(endpoint = self.endpoint.value()))]
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            let permit = select! {
                biased;
                _ = &mut shutdown => break,
                permit = self.registry.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        tracing::error!("Can't admit connections: {}", e);
                        break;
                    }
                }
            };

            let (stream, remote_addr) = select! {
                biased;
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) if is_transient_accept_error(&e) => {
                        tracing::debug!("Transient accept error: {}", e);
                        permit.release();
                        continue;
                    }
                    Err(e) => {
                        tracing::error!("Listener failed: {}", e);
                        break;
                    }
                }
            };

            let (connection, handler, channels) = self.register(stream, remote_addr, permit);
            if !self.announce(connection, handler, channels, &mut shutdown).await {
                break;
            }
        }

        self.registry.close();
        tracing::info!("Accept loop exiting");
    }

    fn register(
        &self,
        stream: TcpStream,
        remote_addr: SocketAddr,
        permit: AdmissionPermit,
    ) -> (Connection, PacketHandler, ConnectionChannels) {
        configure_stream(&stream, &self.settings);

        let id = self.id_generator.next();
        let (connection, channels) = Connection::new(id, remote_addr, &self.settings);
        let handler = self.factory.create(stream);
        self.registry.add(connection.clone(), permit);

        tracing::debug!(connection = %id, %remote_addr, "Accepted connection");

        (connection, handler, channels)
    }

    /// Emit `Connected` for a registered connection, then start its tasks.
    /// Returns false if shutdown was requested while announcing it.
    async fn announce(
        &self,
        connection: Connection,
        handler: PacketHandler,
        channels: ConnectionChannels,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> bool {
        select! {
            biased;
            _ = shutdown => {
                // Never announced, so it goes without any events
                connection.disconnect_with(ConnectionError::Shutdown);
                connection.mark_closed();
                self.registry.remove(connection.id());
                return false;
            }
            result = self.events.send(ConnectionEvent::connected(connection.clone())) => {
                if result.is_err() {
                    tracing::debug!("Event receiver gone; dropping connect event");
                }
            }
        }

        ConnectionTask::new(
            connection,
            handler,
            channels,
            self.events.clone(),
            Some(Arc::clone(&self.registry)),
        )
        .spawn();

        true
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}
