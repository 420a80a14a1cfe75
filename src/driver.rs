//! Driver runs the per-session event loop

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::gatt::GattClient;
use crate::session::{SessionAction, SessionInput, Shared};
use crate::transport::TransportEvent;
use crate::types::{PolarDeviceName, SessionState};

/// Requests from the session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    Open,
    Close,
}

/// Driver owns the event loop of one device session.
///
/// Transport events and session commands are handled one at a time in the
/// order they arrive, so lifecycle state never sees two concurrent mutations.
/// Client initialization runs in short-lived spawned tasks so notifications
/// keep flowing while ready sequences wait on the device.
pub(crate) struct Driver;

impl Driver {
    /// Spawn the event loop for `shared`. Cancel the returned token to stop it.
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> CancellationToken {
        let cancel = CancellationToken::new();
        let cancel_loop = cancel.clone();
        tokio::spawn(async move {
            Self::event_loop(shared, events, commands, cancel_loop).await;
        });
        cancel
    }

    async fn event_loop(
        shared: Arc<Shared>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        cancel: CancellationToken,
    ) {
        info!(address = shared.address(), "Session driver started");
        let mut event_count = 0u64;

        loop {
            tokio::select! {
                biased;

                // Commands queued before cancellation still run
                Some(command) = commands.recv() => {
                    let input = match command {
                        SessionCommand::Open => SessionInput::OpenRequested,
                        SessionCommand::Close => SessionInput::CloseRequested,
                    };
                    Self::apply(&shared, input).await;
                }
                _ = cancel.cancelled() => {
                    info!(address = shared.address(), "Session driver cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        event_count += 1;
                        Self::handle_event(&shared, event).await;
                    }
                    None => {
                        debug!(address = shared.address(), "Transport event channel closed");
                        break;
                    }
                },
            }
        }

        Self::shutdown(&shared).await;
        info!(address = shared.address(), events = event_count, "Session driver stopped");
    }

    async fn handle_event(shared: &Arc<Shared>, event: TransportEvent) {
        match event {
            TransportEvent::Connected => Self::apply(shared, SessionInput::Connected).await,
            TransportEvent::ConnectionFailed { reason } => {
                warn!(address = shared.address(), reason = %reason, "Connection failed");
                Self::apply(shared, SessionInput::ConnectionFailed).await;
            }
            TransportEvent::Disconnected { reason } => {
                info!(address = shared.address(), reason = ?reason, "Link down");
                shared.link_lost().await;
                Self::apply(shared, SessionInput::Disconnected).await;
            }
            TransportEvent::ServicesDiscovered(services) => {
                if !matches!(shared.state(), SessionState::Opening | SessionState::Open) {
                    warn!(address = shared.address(), state = ?shared.state(), "Service discovery outside a connection ignored");
                    return;
                }
                let clients = shared.attach_clients(&services);
                let task = tokio::spawn({
                    let shared = shared.clone();
                    async move { Self::initialize_clients(&shared, clients).await }
                });
                shared.track_initialization(task);
            }
            TransportEvent::Notification(notification) => shared.route(&notification),
            TransportEvent::Advertisement { local_name, rssi } => {
                trace!(address = shared.address(), name = %local_name, rssi, "Advertisement");
                if let Some(name) = PolarDeviceName::parse(&local_name) {
                    shared.set_device_name(name);
                }
                Self::apply(shared, SessionInput::AdvertisementSeen).await;
            }
            TransportEvent::MtuChanged(mtu) => {
                debug!(address = shared.address(), mtu, "MTU changed");
                shared.set_mtu(mtu);
            }
        }
    }

    /// Feed `input` to the state machine and carry out the resulting transport calls.
    ///
    /// A transport call that fails immediately is fed back as the matching
    /// failure input.
    async fn apply(shared: &Shared, input: SessionInput) {
        let mut next = Some(input);
        while let Some(input) = next.take() {
            match shared.apply(input) {
                Some(SessionAction::Connect) => {
                    debug!(address = shared.address(), "Connecting");
                    if let Err(e) = shared.link.transport().connect(shared.address()).await {
                        error!(address = shared.address(), error = %e, "Connect request failed");
                        next = Some(SessionInput::ConnectionFailed);
                    }
                }
                Some(SessionAction::Disconnect) => {
                    debug!(address = shared.address(), "Disconnecting");
                    if let Err(e) = shared.link.transport().disconnect(shared.address()).await {
                        error!(address = shared.address(), error = %e, "Disconnect request failed");
                        shared.link_lost().await;
                        next = Some(SessionInput::Disconnected);
                    }
                }
                None => {}
            }
        }
    }

    async fn initialize_clients(shared: &Shared, clients: Vec<GattClient>) {
        for client in &clients {
            if let Err(e) = client.as_service().initialize().await {
                warn!(address = shared.address(), client = ?client, error = %e, "Client initialization failed");
            }
        }
        shared.refresh_ready();
        debug!(address = shared.address(), ready = shared.clients_ready(), "Client initialization finished");
    }

    /// Release the link, fail pending operations and settle in `Closed`.
    ///
    /// The driver no longer sees transport events at this point, so the
    /// close is completed here instead of waiting for `Disconnected`.
    async fn shutdown(shared: &Shared) {
        if shared.apply(SessionInput::CloseRequested) == Some(SessionAction::Disconnect) {
            if let Err(e) = shared.link.transport().disconnect(shared.address()).await {
                warn!(address = shared.address(), error = %e, "Disconnect on shutdown failed");
            }
        }
        shared.link_lost().await;
        shared.force_closed();
    }
}
