//! PFTP request client
//!
//! The device cannot multiplex, so a client runs at most one exchange. A
//! request is written as RFC76 fragments and completes when the final
//! response fragment arrives. Background scanning stays paused meanwhile.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::operation::{self, Command, DirectoryEntry, DiskSpace, Operation, QUERY_GET_DISK_SPACE};
use super::rfc76::{self, Reassembler};
use super::{PFTP_MTU_CHARACTERISTIC, PFTP_SERVICE};
use crate::config::{MIN_MTU, SdkConfig};
use crate::gatt::{GattLink, ServiceClient};
use crate::transport::Notification;
use crate::{BleError, Result};

enum State {
    Idle,
    Requesting { generation: u64, reply: oneshot::Sender<Result<Bytes>>, reassembler: Reassembler },
}

struct Inner {
    state: State,
    generation: u64,
}

/// File and query requests over the PFTP service.
pub struct PftpClient {
    link: GattLink,
    inner: Mutex<Inner>,
    timeout: Duration,
    mtu: AtomicU16,
    notifying: AtomicBool,
}

impl PftpClient {
    pub fn new(link: GattLink, config: &SdkConfig) -> Self {
        Self {
            link,
            inner: Mutex::new(Inner { state: State::Idle, generation: 0 }),
            timeout: config.pftp_timeout(),
            mtu: AtomicU16::new(config.mtu.max(MIN_MTU)),
            notifying: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.lock().state, State::Idle)
    }

    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Acquire)
    }

    /// Apply a newly negotiated ATT MTU to subsequent requests.
    pub fn set_mtu(&self, mtu: u16) {
        self.mtu.store(mtu.max(MIN_MTU), Ordering::Release);
    }

    /// Send one raw message and return the reassembled response.
    pub async fn request(&self, payload: &[u8]) -> Result<Bytes> {
        if !self.notifying.load(Ordering::Acquire) {
            return Err(BleError::NotifyNotEnabled { uuid: PFTP_MTU_CHARACTERISTIC });
        }
        let (generation, reply) = self.begin()?;
        let _reset = ResetOnExit { client: self, generation };
        let _scan = self.link.pause_scanning();

        let exchange = async {
            let fragments = rfc76::fragment(payload, rfc76::fragment_payload_size(self.mtu()));
            debug!(
                address = self.link.address(),
                len = payload.len(),
                fragments = fragments.len(),
                "Sending PFTP request"
            );
            for fragment in &fragments {
                self.link.write(PFTP_SERVICE, PFTP_MTU_CHARACTERISTIC, fragment, true).await?;
            }
            reply.await.unwrap_or_else(|_| Err(BleError::disconnected(self.link.address())))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(address = self.link.address(), timeout = ?self.timeout, "PFTP request timed out");
                Err(BleError::Timeout { duration: self.timeout })
            }
        }
    }

    /// Run a query and return its payload.
    pub async fn query(&self, id: u16, params: &[u8]) -> Result<Bytes> {
        let message = operation::encode_query(id, params)?;
        operation::decode_response(self.request(&message).await?)
    }

    /// Download a file.
    pub async fn get(&self, path: &str) -> Result<Bytes> {
        self.operation(Command::Get, path, &[]).await
    }

    /// Upload a file.
    pub async fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        self.operation(Command::Put, path, data).await.map(|_| ())
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        self.operation(Command::Remove, path, &[]).await.map(|_| ())
    }

    /// List a directory; `path` must end with `/`.
    pub async fn list_directory(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        if !path.ends_with('/') {
            return Err(BleError::invalid_argument(format!("directory path {:?} must end with '/'", path)));
        }
        let listing = self.get(path).await?;
        operation::decode_directory(&listing)
    }

    pub async fn disk_space(&self) -> Result<DiskSpace> {
        let payload = self.query(QUERY_GET_DISK_SPACE, &[]).await?;
        DiskSpace::decode(&payload)
    }

    async fn operation(&self, command: Command, path: &str, data: &[u8]) -> Result<Bytes> {
        let header = Operation::new(command, path).encode();
        let message = operation::encode_request(&header, data)?;
        trace!(address = self.link.address(), ?command, path, "PFTP operation");
        operation::decode_response(self.request(&message).await?)
    }

    fn begin(&self) -> Result<(u64, oneshot::Receiver<Result<Bytes>>)> {
        let mut inner = self.lock();
        if !matches!(inner.state, State::Idle) {
            return Err(BleError::OperationPending { operation: "PFTP request" });
        }
        inner.generation += 1;
        let generation = inner.generation;
        let (reply, rx) = oneshot::channel();
        inner.state = State::Requesting { generation, reply, reassembler: Reassembler::new() };
        Ok((generation, rx))
    }

    fn complete(inner: &mut Inner, result: Result<Bytes>) {
        if let State::Requesting { reply, .. } = std::mem::replace(&mut inner.state, State::Idle) {
            let _ = reply.send(result);
        }
    }

    fn fail_pending(&self, error: BleError) {
        let mut inner = self.lock();
        if matches!(inner.state, State::Requesting { .. }) {
            debug!(address = self.link.address(), error = %error, "Failing pending PFTP request");
            Self::complete(&mut inner, Err(error));
        }
    }

    fn reset(&self, generation: u64) {
        let mut inner = self.lock();
        if matches!(inner.state, State::Requesting { generation: g, .. } if g == generation) {
            inner.state = State::Idle;
        }
    }
}

struct ResetOnExit<'a> {
    client: &'a PftpClient,
    generation: u64,
}

impl Drop for ResetOnExit<'_> {
    fn drop(&mut self) {
        self.client.reset(self.generation);
    }
}

#[async_trait]
impl ServiceClient for PftpClient {
    fn service(&self) -> Uuid {
        PFTP_SERVICE
    }

    fn handles(&self, characteristic: Uuid) -> bool {
        characteristic == PFTP_MTU_CHARACTERISTIC
    }

    fn on_notification(&self, notification: &Notification) {
        if notification.status != 0 || !notification.is_notifying {
            self.notifying.store(notification.is_notifying, Ordering::Release);
            let error = if notification.is_notifying {
                BleError::transport_failed(format!("ATT status {}", notification.status))
            } else {
                BleError::NotifyNotEnabled { uuid: notification.characteristic }
            };
            self.fail_pending(error);
            return;
        }

        let mut inner = self.lock();
        let State::Requesting { reassembler, .. } = &mut inner.state else {
            warn!(address = self.link.address(), len = notification.data.len(), "PFTP fragment with no request, dropped");
            return;
        };

        match reassembler.push(&notification.data) {
            Ok(None) => trace!(address = self.link.address(), buffered = reassembler.len(), "PFTP fragment"),
            Ok(Some(message)) => {
                debug!(address = self.link.address(), len = message.len(), "PFTP response complete");
                Self::complete(&mut inner, Ok(message.freeze()));
            }
            Err(e) => {
                warn!(address = self.link.address(), error = %e, "PFTP response failed");
                Self::complete(&mut inner, Err(e));
            }
        }
    }

    async fn initialize(&self) -> Result<()> {
        self.link.set_notify(PFTP_SERVICE, PFTP_MTU_CHARACTERISTIC, true).await?;
        self.notifying.store(true, Ordering::Release);
        debug!(address = self.link.address(), mtu = self.mtu(), "PFTP client ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.notifying.load(Ordering::Acquire)
    }

    fn on_disconnected(&self) {
        self.notifying.store(false, Ordering::Release);
        self.fail_pending(BleError::disconnected(self.link.address()));
    }
}
