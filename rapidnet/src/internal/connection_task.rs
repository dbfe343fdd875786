use crate::connection::ConnectionChannels;
use crate::*;

use std::sync::Arc;
use tokio::{
    select,
    sync::{
        mpsc::{Receiver, Sender},
        watch,
    },
    task::JoinHandle,
};
use tracing::{instrument, Instrument};

/// Drives one connection: spawns its receive and send tasks, then tears the
/// connection down once both have exited.
pub(crate) struct ConnectionTask {
    connection: Connection,
    handler: PacketHandler,
    channels: ConnectionChannels,
    events: Sender<ConnectionEvent>,
    registry: Option<Arc<ConnectionRegistry>>,
}

impl ConnectionTask {
    pub fn new(
        connection: Connection,
        handler: PacketHandler,
        channels: ConnectionChannels,
        events: Sender<ConnectionEvent>,
        registry: Option<Arc<ConnectionRegistry>>,
    ) -> Self {
        Self {
            connection,
            handler,
            channels,
            events,
            registry,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    #[instrument(skip_all, fields(connection = %self.connection.id(), remote_addr = %self.connection.remote_addr()))]
    async fn run(self) {
        let Self {
            connection,
            handler,
            channels,
            events,
            registry,
        } = self;

        let (reader, writer) = handler.into_parts();
        let ConnectionChannels {
            inbound,
            outbound,
            stop,
        } = channels;

        let receive_task = tokio::spawn(
            receive_loop(connection.clone(), reader, inbound, stop.clone()).in_current_span(),
        );
        let send_task = tokio::spawn(
            send_loop(connection.clone(), writer, outbound, stop, events.clone()).in_current_span(),
        );

        if let Err(e) = receive_task.await {
            tracing::error!("Receive task failed: {}", e);
        }

        match send_task.await {
            Ok(mut writer) => {
                if let Err(e) = writer.close().await {
                    tracing::debug!("Error shutting down socket: {}", e);
                }
            }
            Err(e) => tracing::error!("Send task failed: {}", e),
        }

        // Both halves of the socket have been dropped by now
        connection.mark_closed();

        if let Some(registry) = registry {
            registry.remove(connection.id());
        }

        let cause = connection
            .take_cause()
            .unwrap_or(ConnectionError::InternalError);
        tracing::info!(%cause, "Connection closed");

        if events
            .send(ConnectionEvent::disconnected(connection, cause))
            .await
            .is_err()
        {
            tracing::debug!("Event receiver gone; dropping disconnect event");
        }
    }
}

/// Makes sure a task that exits abnormally still stops its sibling.
struct StopOnExit<'a>(&'a Connection);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        self.0.disconnect_with(ConnectionError::InternalError);
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

async fn receive_loop(
    connection: Connection,
    mut reader: Box<dyn FrameReader>,
    inbound: Sender<Frame>,
    mut stop: watch::Receiver<bool>,
) {
    let _guard = StopOnExit(&connection);

    loop {
        let frame = select! {
            biased;
            _ = stopped(&mut stop) => break,
            result = reader.receive() => match result {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!("Receive failed: {}", e);
                    connection.disconnect_with(e.into());
                    break;
                }
            }
        };

        tracing::trace!(len = frame.len(), "Received frame");

        // Blocks while the application isn't draining frames
        select! {
            biased;
            _ = stopped(&mut stop) => break,
            result = inbound.send(frame) => {
                if result.is_err() {
                    tracing::trace!("Receive channel dropped; discarding frame");
                }
            }
        }
    }
    // Dropping `inbound` here closes the application's receive channel
}

async fn send_loop(
    connection: Connection,
    mut writer: Box<dyn FrameWriter>,
    mut outbound: Receiver<Frame>,
    mut stop: watch::Receiver<bool>,
    events: Sender<ConnectionEvent>,
) -> Box<dyn FrameWriter> {
    let _guard = StopOnExit(&connection);

    loop {
        let frame = select! {
            biased;
            _ = stopped(&mut stop) => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            }
        };

        if let Err(e) = writer.send(&frame).await {
            let err = ConnectionError::from(e);
            tracing::warn!("Send failed: {}", err);

            // Stop taking frames before the event queue gets a chance to block us
            connection.disconnect_with(err.clone());

            if events
                .send(ConnectionEvent::send_failed(connection.clone(), err.clone()))
                .await
                .is_err()
            {
                tracing::debug!("Event receiver gone; dropping send failure event");
            }
            break;
        }
    }

    writer
}
