//! End-to-end tests over real UDP sockets: a test NAS on loopback
//! talking to a server bound to OS-assigned ports.

use aaa_proto::auth::{
    calculate_response_authenticator, encrypt_user_password, generate_request_authenticator,
    sign_accounting_request,
};
use aaa_proto::{AcctStatusType, Attribute, AttributeType, Code, Packet};
use aaa_server::config::{AccountConfig, Config, NasClientConfig};
use aaa_server::events::EventBus;
use aaa_server::registry::{StaticAccountRegistry, StaticNasRegistry};
use aaa_server::server::AaaServer;
use aaa_server::store::SessionStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const SECRET: &[u8] = b"integration-secret";
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    auth_addr: SocketAddr,
    acct_addr: SocketAddr,
    client: UdpSocket,
}

fn account(username: &str, password: &str) -> AccountConfig {
    AccountConfig {
        username: username.to_string(),
        credential: format!("ctp:{password}"),
        active: true,
        expires_at: None,
        max_sessions: 1,
        quota_bytes: None,
        consumed_bytes: 0,
    }
}

async fn harness(accounts: Vec<AccountConfig>) -> Harness {
    harness_with_nas_ip(accounts, "127.0.0.1").await
}

async fn harness_with_nas_ip(accounts: Vec<AccountConfig>, nas_ip: &str) -> Harness {
    let config = Config {
        bind_address: "127.0.0.1".to_string(),
        auth_port: 0,
        acct_port: 0,
        nas_clients: vec![NasClientConfig {
            identifier: "test-nas".to_string(),
            ip_address: nas_ip.to_string(),
            shared_secret: String::from_utf8(SECRET.to_vec()).unwrap(),
            auth_port: 1812,
            acct_port: 1813,
            active: true,
            description: String::new(),
        }],
        accounts,
        ..Config::default()
    };

    let nas = Arc::new(StaticNasRegistry::from_config(&config).unwrap());
    let registry = Arc::new(StaticAccountRegistry::from_config(&config));
    let store = Arc::new(SessionStore::new(Duration::from_secs(
        config.reservation_ttl,
    )));

    let server = AaaServer::bind(&config, nas, registry, store, EventBus::default())
        .await
        .unwrap();
    let auth_addr = server.auth_addr().unwrap();
    let acct_addr = server.acct_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    Harness {
        auth_addr,
        acct_addr,
        client: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
    }
}

fn build_access_request(identifier: u8, username: &str, password: &str) -> (Vec<u8>, [u8; 16]) {
    let authenticator = generate_request_authenticator();
    let mut packet = Packet::new(Code::AccessRequest, identifier, authenticator);
    packet.add_attribute(Attribute::string(AttributeType::UserName, username).unwrap());
    packet.add_attribute(
        Attribute::new(
            AttributeType::UserPassword as u8,
            encrypt_user_password(password, SECRET, &authenticator),
        )
        .unwrap(),
    );
    (packet.encode().unwrap(), authenticator)
}

fn build_acct_request(
    identifier: u8,
    status: AcctStatusType,
    session_id: &str,
    username: &str,
    counters: Option<(u32, u32, u32)>,
) -> Vec<u8> {
    let mut packet = Packet::new(Code::AccountingRequest, identifier, [0u8; 16]);
    packet.add_attribute(
        Attribute::integer(AttributeType::AcctStatusType, status.as_u32()).unwrap(),
    );
    packet.add_attribute(Attribute::string(AttributeType::AcctSessionId, session_id).unwrap());
    packet.add_attribute(Attribute::string(AttributeType::UserName, username).unwrap());
    if let Some((input, output, time)) = counters {
        packet
            .add_attribute(Attribute::integer(AttributeType::AcctInputOctets, input).unwrap());
        packet
            .add_attribute(Attribute::integer(AttributeType::AcctOutputOctets, output).unwrap());
        packet
            .add_attribute(Attribute::integer(AttributeType::AcctSessionTime, time).unwrap());
    }

    let mut bytes = packet.encode().unwrap();
    sign_accounting_request(&mut bytes, SECRET).unwrap();
    bytes
}

impl Harness {
    async fn send_recv(&self, addr: SocketAddr, bytes: &[u8]) -> Option<Vec<u8>> {
        self.client.send_to(bytes, addr).await.unwrap();
        let mut buf = vec![0u8; 4096];
        match timeout(RECV_TIMEOUT, self.client.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
            _ => None,
        }
    }

    async fn login(&self, identifier: u8, username: &str, password: &str) -> Packet {
        let (bytes, _) = build_access_request(identifier, username, password);
        let response = self
            .send_recv(self.auth_addr, &bytes)
            .await
            .expect("no auth response");
        Packet::decode(&response).unwrap()
    }

    async fn acct(
        &self,
        identifier: u8,
        status: AcctStatusType,
        session_id: &str,
        username: &str,
        counters: Option<(u32, u32, u32)>,
    ) -> Packet {
        let bytes = build_acct_request(identifier, status, session_id, username, counters);
        let response = self
            .send_recv(self.acct_addr, &bytes)
            .await
            .expect("no acct response");
        Packet::decode(&response).unwrap()
    }
}

#[tokio::test]
async fn single_slot_user_lifecycle() {
    let harness = harness(vec![account("alice", "hunter2")]).await;

    // First login succeeds.
    let accept = harness.login(1, "alice", "hunter2").await;
    assert_eq!(accept.code, Code::AccessAccept);

    // The NAS opens the session.
    let ack = harness
        .acct(1, AcctStatusType::Start, "alice-s1", "alice", None)
        .await;
    assert_eq!(ack.code, Code::AccountingResponse);

    // A second device is over the single-session limit.
    let reject = harness.login(2, "alice", "hunter2").await;
    assert_eq!(reject.code, Code::AccessReject);

    // First device disconnects.
    let ack = harness
        .acct(
            2,
            AcctStatusType::Stop,
            "alice-s1",
            "alice",
            Some((1000, 2000, 300)),
        )
        .await;
    assert_eq!(ack.code, Code::AccountingResponse);

    // The slot is free again.
    let accept = harness.login(3, "alice", "hunter2").await;
    assert_eq!(accept.code, Code::AccessAccept);
}

#[tokio::test]
async fn quota_is_enforced_lazily_at_next_login() {
    let mut bob = account("bob", "pw");
    bob.quota_bytes = Some(1_000_000);
    let harness = harness(vec![bob]).await;

    assert_eq!(harness.login(10, "bob", "pw").await.code, Code::AccessAccept);
    harness
        .acct(10, AcctStatusType::Start, "bob-s1", "bob", None)
        .await;

    // Interim updates push consumption past the quota; the live
    // session is never cut.
    let ack = harness
        .acct(
            11,
            AcctStatusType::InterimUpdate,
            "bob-s1",
            "bob",
            Some((600_000, 600_000, 600)),
        )
        .await;
    assert_eq!(ack.code, Code::AccountingResponse);

    let ack = harness
        .acct(
            12,
            AcctStatusType::InterimUpdate,
            "bob-s1",
            "bob",
            Some((700_000, 700_000, 1200)),
        )
        .await;
    assert_eq!(ack.code, Code::AccountingResponse);

    harness
        .acct(
            13,
            AcctStatusType::Stop,
            "bob-s1",
            "bob",
            Some((700_000, 700_000, 1500)),
        )
        .await;

    // 1.4 MB consumed against a 1 MB quota: the next login loses.
    let reject = harness.login(20, "bob", "pw").await;
    assert_eq!(reject.code, Code::AccessReject);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let harness = harness(vec![account("alice", "hunter2")]).await;
    let reject = harness.login(5, "alice", "wrong").await;
    assert_eq!(reject.code, Code::AccessReject);
    assert_eq!(
        reject
            .find_attribute(AttributeType::ReplyMessage as u8)
            .and_then(|a| a.as_string())
            .as_deref(),
        Some("Authentication failed")
    );
}

#[tokio::test]
async fn accept_carries_valid_response_authenticator() {
    let harness = harness(vec![account("alice", "hunter2")]).await;

    let (bytes, request_auth) = build_access_request(7, "alice", "hunter2");
    let response = harness.send_recv(harness.auth_addr, &bytes).await.unwrap();
    let packet = Packet::decode(&response).unwrap();

    assert_eq!(packet.code, Code::AccessAccept);
    let expected = calculate_response_authenticator(&packet, &request_auth, SECRET);
    assert_eq!(packet.authenticator, expected);
}

#[tokio::test]
async fn retransmitted_request_gets_identical_response_bytes() {
    let harness = harness(vec![account("alice", "hunter2")]).await;

    let (bytes, _) = build_access_request(42, "alice", "hunter2");
    let first = harness.send_recv(harness.auth_addr, &bytes).await.unwrap();
    // Same datagram again: answered from the cache, byte for byte.
    let second = harness.send_recv(harness.auth_addr, &bytes).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(Packet::decode(&first).unwrap().code, Code::AccessAccept);
}

#[tokio::test]
async fn retransmitted_stop_releases_slot_once() {
    let harness = harness(vec![account("alice", "hunter2")]).await;

    harness.login(1, "alice", "hunter2").await;
    harness
        .acct(1, AcctStatusType::Start, "s1", "alice", None)
        .await;

    let stop = build_acct_request(
        2,
        AcctStatusType::Stop,
        "s1",
        "alice",
        Some((100, 100, 60)),
    );
    let first = harness.send_recv(harness.acct_addr, &stop).await.unwrap();
    let second = harness.send_recv(harness.acct_addr, &stop).await.unwrap();
    assert_eq!(first, second);

    // Exactly one slot came back.
    let accept = harness.login(3, "alice", "hunter2").await;
    assert_eq!(accept.code, Code::AccessAccept);
}

#[tokio::test]
async fn unknown_nas_is_silently_dropped() {
    // The only registered NAS is on a different address, so the
    // loopback client is a stranger.
    let harness = harness_with_nas_ip(vec![account("alice", "hunter2")], "192.0.2.1").await;

    let (bytes, _) = build_access_request(1, "alice", "hunter2");
    assert!(harness.send_recv(harness.auth_addr, &bytes).await.is_none());
}

#[tokio::test]
async fn unsigned_accounting_request_is_silently_dropped() {
    let harness = harness(vec![account("alice", "hunter2")]).await;

    let mut packet = Packet::new(Code::AccountingRequest, 1, [0u8; 16]);
    packet.add_attribute(
        Attribute::integer(AttributeType::AcctStatusType, AcctStatusType::Start.as_u32())
            .unwrap(),
    );
    packet.add_attribute(Attribute::string(AttributeType::AcctSessionId, "s1").unwrap());
    packet.add_attribute(Attribute::string(AttributeType::UserName, "alice").unwrap());
    // Encoded but never signed: the authenticator is all zeros.
    let bytes = packet.encode().unwrap();

    assert!(harness.send_recv(harness.acct_addr, &bytes).await.is_none());
}

#[tokio::test]
async fn wrong_code_for_port_is_silently_dropped() {
    let harness = harness(vec![account("alice", "hunter2")]).await;

    // A signed Accounting-Request aimed at the authentication port.
    let bytes = build_acct_request(1, AcctStatusType::Start, "s1", "alice", None);
    assert!(harness.send_recv(harness.auth_addr, &bytes).await.is_none());
}

#[tokio::test]
async fn concurrent_logins_admit_exactly_the_limit() {
    let mut carol = account("carol", "pw");
    carol.max_sessions = 3;
    let harness = Arc::new(harness(vec![carol]).await);

    let mut handles = Vec::new();
    for i in 0..8u8 {
        let auth_addr = harness.auth_addr;
        handles.push(tokio::spawn(async move {
            // Each simulated device uses its own socket and identifier.
            let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let (bytes, _) = build_access_request(100 + i, "carol", "pw");
            client.send_to(&bytes, auth_addr).await.unwrap();

            let mut buf = vec![0u8; 4096];
            match timeout(RECV_TIMEOUT, client.recv_from(&mut buf)).await {
                Ok(Ok((len, _))) => {
                    Packet::decode(&buf[..len]).unwrap().code == Code::AccessAccept
                }
                _ => false,
            }
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 3);
}
