//! The transport adapter: a thin mapping from the message algebra to UDP
//! datagrams with a discriminated (JSON) serialization.
//!
//! The core elector depends only on the [`Transport`] trait, so tests can
//! swap in an in-memory transport instead of opening real sockets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::address::PeerAddress;
use crate::error::{ElectorError, Result};
use crate::message::Message;

/// Best-effort, non-blocking datagram transport for the message algebra.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `msg` to `dest`. Returns [`ElectorError::IncompleteSend`] if the
    /// underlying transport reports fewer bytes written than encoded.
    async fn send_to(&self, dest: PeerAddress, msg: &Message) -> Result<()>;

    /// Waits for and decodes the next datagram, returning its sender and
    /// decoded message. Returns [`ElectorError::Malformed`] for datagrams
    /// that fail to decode instead of terminating the stream, so the
    /// dispatcher loop can log and keep going.
    async fn recv(&self) -> Result<(PeerAddress, Message)>;

    /// This transport's own bound local address, used to seed membership.
    fn local_addr(&self) -> PeerAddress;
}

/// UDP implementation of [`Transport`], one datagram per message.
pub struct UdpTransport {
    socket: UdpSocket,
    local: PeerAddress,
}

impl UdpTransport {
    pub async fn bind(local: PeerAddress) -> Result<Self> {
        let socket = UdpSocket::bind(local.socket_addr()).await?;
        let bound = PeerAddress::new(socket.local_addr()?);
        Ok(UdpTransport {
            socket,
            local: bound,
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, dest: PeerAddress, msg: &Message) -> Result<()> {
        let payload = serde_json::to_vec(msg)
            .map_err(|e| ElectorError::Malformed {
                src: self.local.socket_addr(),
                reason: e.to_string(),
            })?;
        let sent = self.socket.send_to(&payload, dest.socket_addr()).await?;
        if sent != payload.len() {
            return Err(ElectorError::IncompleteSend {
                dest: dest.socket_addr(),
                sent,
                total: payload.len(),
            });
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(PeerAddress, Message)> {
        let mut buf = vec![0u8; 64 * 1024];
        let (len, src) = self.socket.recv_from(&mut buf).await?;
        let src = PeerAddress::new(src);
        let msg = serde_json::from_slice(&buf[..len]).map_err(|e| ElectorError::Malformed {
            src: src.socket_addr(),
            reason: e.to_string(),
        })?;
        Ok((src, msg))
    }

    fn local_addr(&self) -> PeerAddress {
        self.local
    }
}

/// An in-memory [`Transport`] backed by a shared registry of channels,
/// letting tests wire up several in-process electors without opening real
/// sockets. Messages sent to an address not registered in the switch are
/// silently dropped, modeling an unreachable peer.
#[derive(Clone)]
pub struct ChannelSwitch {
    lines: Arc<Mutex<HashMap<PeerAddress, mpsc::UnboundedSender<(PeerAddress, Message)>>>>,
}

impl ChannelSwitch {
    pub fn new() -> Self {
        ChannelSwitch {
            lines: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers `addr` and returns a [`Transport`] for it.
    pub fn connect(&self, addr: PeerAddress) -> ChannelTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lines.lock().unwrap().insert(addr, tx);
        ChannelTransport {
            switch: self.clone(),
            local: addr,
            rx: AsyncMutex::new(rx),
        }
    }

    /// Removes `addr` from the switch, simulating the peer going offline:
    /// further sends to it succeed at the sender (best-effort, as UDP would)
    /// but are never delivered.
    pub fn disconnect(&self, addr: PeerAddress) {
        self.lines.lock().unwrap().remove(&addr);
    }
}

impl Default for ChannelSwitch {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChannelTransport {
    switch: ChannelSwitch,
    local: PeerAddress,
    rx: AsyncMutex<mpsc::UnboundedReceiver<(PeerAddress, Message)>>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_to(&self, dest: PeerAddress, msg: &Message) -> Result<()> {
        let line = self.switch.lines.lock().unwrap().get(&dest).cloned();
        if let Some(tx) = line {
            let _ = tx.send((self.local, msg.clone()));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(PeerAddress, Message)> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(ElectorError::SocketClosed)
    }

    fn local_addr(&self) -> PeerAddress {
        self.local
    }
}
