//! UDP front end and request dispatch.
//!
//! One socket per port (authentication and accounting), one spawned
//! task per datagram. Everything that fails before a packet is
//! attributed to a known NAS is dropped without a response; RADIUS
//! treats silence as the only safe answer to traffic it cannot trust.

use crate::cache::{CacheCheck, RequestKey, ResponseCache};
use crate::config::{Config, ConfigError};
use crate::engine::{AcctEngine, AuthEngine};
use crate::events::EventBus;
use crate::registry::{AccountRegistry, NasRegistry};
use crate::store::SessionStore;
use aaa_proto::auth::{calculate_response_authenticator, verify_accounting_request_authenticator};
use aaa_proto::{Code, Packet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortKind {
    Auth,
    Acct,
}

impl PortKind {
    fn expected_code(self) -> Code {
        match self {
            PortKind::Auth => Code::AccessRequest,
            PortKind::Acct => Code::AccountingRequest,
        }
    }
}

struct Inner {
    nas: Arc<dyn NasRegistry>,
    auth: AuthEngine,
    acct: AcctEngine,
    cache: Arc<ResponseCache>,
}

pub struct AaaServer {
    auth_socket: Arc<UdpSocket>,
    acct_socket: Arc<UdpSocket>,
    inner: Arc<Inner>,
}

impl AaaServer {
    /// Bind both ports and wire up the engines.
    pub async fn bind(
        config: &Config,
        nas: Arc<dyn NasRegistry>,
        accounts: Arc<dyn AccountRegistry>,
        store: Arc<SessionStore>,
        events: EventBus,
    ) -> Result<Self, ServerError> {
        let auth_socket = UdpSocket::bind(config.auth_socket_addr()?).await?;
        let acct_socket = UdpSocket::bind(config.acct_socket_addr()?).await?;
        info!(
            auth = %auth_socket.local_addr()?,
            acct = %acct_socket.local_addr()?,
            "listening"
        );

        let cache = Arc::new(ResponseCache::new(
            Duration::from_secs(config.duplicate_window),
            4096,
        ));
        let auth = AuthEngine::new(
            accounts.clone(),
            store.clone(),
            events.clone(),
            config.interim_interval,
        );
        let acct = AcctEngine::new(accounts, store, events);

        Ok(AaaServer {
            auth_socket: Arc::new(auth_socket),
            acct_socket: Arc::new(acct_socket),
            inner: Arc::new(Inner {
                nas,
                auth,
                acct,
                cache,
            }),
        })
    }

    pub fn auth_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.auth_socket.local_addr()?)
    }

    pub fn acct_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.acct_socket.local_addr()?)
    }

    /// Shared with the reaper so cache expiry rides the same
    /// maintenance tick.
    pub fn cache(&self) -> Arc<ResponseCache> {
        self.inner.cache.clone()
    }

    /// Serve both ports until an IO error takes a socket down.
    pub async fn run(&self) -> Result<(), ServerError> {
        tokio::try_join!(
            Self::run_socket(self.auth_socket.clone(), self.inner.clone(), PortKind::Auth),
            Self::run_socket(self.acct_socket.clone(), self.inner.clone(), PortKind::Acct),
        )?;
        Ok(())
    }

    async fn run_socket(
        socket: Arc<UdpSocket>,
        inner: Arc<Inner>,
        kind: PortKind,
    ) -> Result<(), ServerError> {
        let mut buf = vec![0u8; Packet::MAX_PACKET_SIZE];
        loop {
            let (len, peer) = socket.recv_from(&mut buf).await?;
            let datagram = buf[..len].to_vec();
            let socket = socket.clone();
            let inner = inner.clone();
            tokio::spawn(async move {
                Self::handle_datagram(inner, socket, datagram, peer, kind).await;
            });
        }
    }

    async fn handle_datagram(
        inner: Arc<Inner>,
        socket: Arc<UdpSocket>,
        datagram: Vec<u8>,
        peer: SocketAddr,
        kind: PortKind,
    ) {
        let Some(nas) = inner.nas.lookup_by_ip(peer.ip()) else {
            warn!(peer = %peer, "dropping packet from unknown NAS");
            return;
        };

        // Accounting requests carry a keyed authenticator; a mismatch
        // means a wrong secret or a spoofed source.
        if kind == PortKind::Acct
            && !verify_accounting_request_authenticator(&datagram, nas.secret())
        {
            warn!(peer = %peer, nas = %nas.identifier, "dropping packet with bad request authenticator");
            return;
        }

        let packet = match Packet::decode(&datagram) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(peer = %peer, nas = %nas.identifier, %err, "dropping malformed packet");
                return;
            }
        };

        if packet.code != kind.expected_code() {
            warn!(
                peer = %peer,
                code = ?packet.code,
                "dropping packet with wrong code for this port"
            );
            return;
        }

        let key = RequestKey::new(peer.ip(), packet.identifier, packet.code);
        match inner.cache.check(key) {
            CacheCheck::Replay(response) => {
                debug!(peer = %peer, identifier = packet.identifier, "replaying cached response");
                Self::send(&socket, &response, peer).await;
                return;
            }
            CacheCheck::InFlight => {
                debug!(peer = %peer, identifier = packet.identifier, "dropping in-flight retransmission");
                return;
            }
            CacheCheck::New => {}
        }

        let result = match kind {
            PortKind::Auth => inner.auth.handle(&packet, &nas).await,
            PortKind::Acct => inner.acct.handle(&packet, &nas),
        };
        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(peer = %peer, %err, "failed to build response");
                inner.cache.forget(&key);
                return;
            }
        };

        response.authenticator =
            calculate_response_authenticator(&response, &packet.authenticator, nas.secret());
        let bytes = match response.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(peer = %peer, %err, "failed to encode response");
                inner.cache.forget(&key);
                return;
            }
        };

        inner.cache.store(key, bytes.clone());
        Self::send(&socket, &bytes, peer).await;
    }

    async fn send(socket: &UdpSocket, bytes: &[u8], peer: SocketAddr) {
        if let Err(err) = socket.send_to(bytes, peer).await {
            warn!(peer = %peer, %err, "failed to send response");
        }
    }
}
