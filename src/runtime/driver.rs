//! Single-task connection driver.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::timers::TokioTimers;
use crate::connection::{AppNotification, Connection, ConnectionConfig, ConnectionEvent};
use crate::core::{ConnectionError, ConnectionResult, PathTransport, SubflowId, TimerId};
use crate::subflow::SubflowOptions;

type Reply<T> = oneshot::Sender<ConnectionResult<T>>;

enum DriverCommand {
    Event(ConnectionEvent),
    AddSubflow {
        transport: Box<dyn PathTransport>,
        options: SubflowOptions,
        reply: Reply<SubflowId>,
    },
    Send {
        data: Bytes,
        reply: Reply<usize>,
    },
    Recv {
        max: usize,
        reply: Reply<Bytes>,
    },
    Close {
        reply: Reply<()>,
    },
}

/// Owns a connection and serializes everything that touches it.
pub struct ConnectionDriver {
    conn: Connection<TokioTimers>,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    expirations: mpsc::UnboundedReceiver<TimerId>,
    notifications: mpsc::UnboundedSender<AppNotification>,
    finished: bool,
}

impl ConnectionDriver {
    /// Create a driver, a handle to it and the application notification
    /// stream. Nothing happens until [`ConnectionDriver::run`] is polled.
    pub fn new(
        config: ConnectionConfig,
    ) -> ConnectionResult<(Self, DriverHandle, mpsc::UnboundedReceiver<AppNotification>)> {
        let (timers, expirations) = TokioTimers::new();
        let conn = Connection::new(config, timers)?;
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (notifications, notification_rx) = mpsc::unbounded_channel();

        let driver = Self {
            conn,
            commands,
            expirations,
            notifications,
            finished: false,
        };
        let handle = DriverHandle {
            commands: command_tx,
        };
        Ok((driver, handle, notification_rx))
    }

    /// Handle commands and timers until the connection closes or every
    /// handle is dropped.
    ///
    /// Returns the fatal error if the connection was poisoned.
    pub async fn run(mut self) -> ConnectionResult<()> {
        info!(conn = %self.conn.token(), "connection driver started");

        while !self.finished {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.execute(command),
                    None => {
                        debug!(conn = %self.conn.token(), "all handles dropped");
                        break;
                    }
                },
                Some(id) = self.expirations.recv() => {
                    if let Err(e) = self.conn.handle_event(ConnectionEvent::TimerFired(id)) {
                        debug!(error = %e, "timer handling failed");
                    }
                }
            }

            self.forward_notifications();
            if self.conn.is_poisoned() {
                return Err(ConnectionError::Poisoned);
            }
        }

        info!(conn = %self.conn.token(), state = %self.conn.state(), "connection driver stopped");
        Ok(())
    }

    fn execute(&mut self, command: DriverCommand) {
        // A dropped reply receiver just means the caller stopped waiting.
        match command {
            DriverCommand::Event(event) => {
                if let Err(e) = self.conn.handle_event(event) {
                    debug!(error = %e, "event handling failed");
                }
            }
            DriverCommand::AddSubflow {
                transport,
                options,
                reply,
            } => {
                let _ = reply.send(self.conn.add_subflow(transport, options));
            }
            DriverCommand::Send { data, reply } => {
                let _ = reply.send(self.conn.send(&data));
            }
            DriverCommand::Recv { max, reply } => {
                let _ = reply.send(self.conn.recv(max));
            }
            DriverCommand::Close { reply } => {
                let _ = reply.send(self.conn.close());
            }
        }
    }

    fn forward_notifications(&mut self) {
        while let Some(notification) = self.conn.poll_notification() {
            if matches!(
                notification,
                AppNotification::Closed | AppNotification::ConnectionFailed
            ) {
                self.finished = true;
            }
            let _ = self.notifications.send(notification);
        }
    }
}

/// Cloneable handle for the path manager and the application.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    commands: mpsc::UnboundedSender<DriverCommand>,
}

impl DriverHandle {
    /// Queue a path event.
    pub fn event(&self, event: ConnectionEvent) -> ConnectionResult<()> {
        self.commands
            .send(DriverCommand::Event(event))
            .map_err(|_| ConnectionError::DriverStopped)
    }

    /// Register a subflow.
    pub async fn add_subflow(
        &self,
        transport: Box<dyn PathTransport>,
        options: SubflowOptions,
    ) -> ConnectionResult<SubflowId> {
        self.request(|reply| DriverCommand::AddSubflow {
            transport,
            options,
            reply,
        })
        .await
    }

    /// Queue application data.
    pub async fn send(&self, data: impl Into<Bytes>) -> ConnectionResult<usize> {
        let data = data.into();
        self.request(|reply| DriverCommand::Send { data, reply }).await
    }

    /// Read up to `max` in-order bytes.
    pub async fn recv(&self, max: usize) -> ConnectionResult<Bytes> {
        self.request(|reply| DriverCommand::Recv { max, reply }).await
    }

    /// Close the sending direction.
    pub async fn close(&self) -> ConnectionResult<()> {
        self.request(|reply| DriverCommand::Close { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> DriverCommand,
    ) -> ConnectionResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ConnectionError::DriverStopped)?;
        response.await.map_err(|_| ConnectionError::DriverStopped)?
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::TcpState;
    use crate::testing::MockPath;

    #[tokio::test(start_paused = true)]
    async fn test_driver_runs_close_to_completion() {
        let config = ConnectionConfig::builder()
            .msl(Duration::from_secs(1))
            .build()
            .unwrap();
        let (driver, handle, mut notes) = ConnectionDriver::new(config).unwrap();
        let task = tokio::spawn(driver.run());

        let (path, master_path) = MockPath::new(10, 64_000);
        let master = handle
            .add_subflow(Box::new(path), SubflowOptions::master(TcpState::Established))
            .await
            .unwrap();
        assert_eq!(notes.recv().await, Some(AppNotification::Connected));

        assert_eq!(handle.send(Bytes::from_static(b"ping")).await.unwrap(), 4);
        assert_eq!(master_path.sent_bytes(), 4);
        handle
            .event(ConnectionEvent::DataAck {
                subflow: master,
                dack: 4,
            })
            .unwrap();

        handle.close().await.unwrap();
        for event in [
            ConnectionEvent::DataAck {
                subflow: master,
                dack: 5,
            },
            ConnectionEvent::DataFin {
                subflow: master,
                dsn: 0,
            },
            ConnectionEvent::SubflowStateChanged {
                subflow: master,
                old: TcpState::Established,
                new: TcpState::FinWait1,
            },
            ConnectionEvent::SubflowStateChanged {
                subflow: master,
                old: TcpState::FinWait1,
                new: TcpState::Closed,
            },
        ] {
            handle.event(event).unwrap();
        }

        // TIME_WAIT elapses on the paused clock.
        assert_eq!(notes.recv().await, Some(AppNotification::Closed));
        task.await.unwrap().unwrap();
        assert!(master_path.is_closed());

        assert!(matches!(
            handle.recv(10).await,
            Err(ConnectionError::DriverStopped)
        ));
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_driver() {
        let (driver, handle, _notes) = ConnectionDriver::new(ConnectionConfig::default()).unwrap();
        let task = tokio::spawn(driver.run());
        drop(handle);
        task.await.unwrap().unwrap();
    }
}
