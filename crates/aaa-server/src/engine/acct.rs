//! Accounting-Request processing.
//!
//! A verified Accounting-Request is always acknowledged, whatever its
//! content; anomalies (unknown sessions, counter regressions,
//! retransmitted stops) are logged and otherwise ignored, because a
//! NAS that never gets its acknowledgement will retransmit forever.

use crate::events::{AaaEvent, EventBus, EventKind, EventResult};
use crate::registry::{AccountRegistry, NasClient};
use crate::store::{
    Counters, SessionStart, SessionStore, StartOutcome, StopOutcome, UpdateOutcome,
};
use aaa_proto::{
    AcctStatusType, AcctTerminateCause, AttributeType, Code, Packet, PacketError,
};
use std::sync::Arc;
use tracing::{info, warn};

pub struct AcctEngine {
    accounts: Arc<dyn AccountRegistry>,
    store: Arc<SessionStore>,
    events: EventBus,
}

impl AcctEngine {
    pub fn new(
        accounts: Arc<dyn AccountRegistry>,
        store: Arc<SessionStore>,
        events: EventBus,
    ) -> Self {
        AcctEngine {
            accounts,
            store,
            events,
        }
    }

    pub fn handle(&self, request: &Packet, nas: &NasClient) -> Result<Packet, PacketError> {
        let username = string_attr(request, AttributeType::UserName);
        let session_id = string_attr(request, AttributeType::AcctSessionId);

        match status_type(request) {
            Some(AcctStatusType::Start) => self.on_start(request, nas, session_id, username.clone()),
            Some(AcctStatusType::InterimUpdate) => self.on_interim(request, nas, session_id),
            Some(AcctStatusType::Stop) => self.on_stop(request, nas, session_id),
            Some(AcctStatusType::AccountingOn) => {
                self.on_nas_transition(nas, AcctTerminateCause::NasReboot, "Accounting-On")
            }
            Some(AcctStatusType::AccountingOff) => {
                self.on_nas_transition(nas, AcctTerminateCause::NasRequest, "Accounting-Off")
            }
            None => {
                warn!(
                    nas = %nas.identifier,
                    "Accounting-Request with missing or unknown Acct-Status-Type"
                );
            }
        }

        self.events.publish(AaaEvent::new(
            EventKind::Acct,
            EventResult::Ack,
            username.as_deref(),
            &nas.identifier,
        ));

        // Per RFC 2866 the response carries no attributes.
        Ok(Packet::new(
            Code::AccountingResponse,
            request.identifier,
            [0u8; 16],
        ))
    }

    fn on_start(
        &self,
        request: &Packet,
        nas: &NasClient,
        session_id: Option<String>,
        username: Option<String>,
    ) {
        let (Some(session_id), Some(username)) = (session_id, username) else {
            warn!(
                nas = %nas.identifier,
                "Accounting-Start without Acct-Session-Id or User-Name"
            );
            return;
        };

        let start = SessionStart {
            session_id: session_id.clone(),
            username: username.clone(),
            nas_identifier: nas.identifier.clone(),
            nas_ip: nas.ip_address,
            framed_ip: request
                .find_attribute(AttributeType::FramedIpAddress as u8)
                .and_then(|a| a.as_ipv4()),
            calling_station: string_attr(request, AttributeType::CallingStationId),
        };

        match self.store.start_session(start) {
            StartOutcome::Created {
                reservation_consumed,
                displaced,
            } => {
                if !reservation_consumed {
                    warn!(
                        session_id = %session_id,
                        username = %username,
                        "Accounting-Start without a matching Access-Accept"
                    );
                }
                for old in displaced {
                    warn!(
                        session_id = %old.session_id,
                        username = %username,
                        "closed stale session after framed IP reuse"
                    );
                }
                info!(session_id = %session_id, username = %username, nas = %nas.identifier, "session started");
            }
            StartOutcome::Duplicate => {
                warn!(session_id = %session_id, "duplicate Accounting-Start ignored");
            }
        }
    }

    fn on_interim(&self, request: &Packet, nas: &NasClient, session_id: Option<String>) {
        let Some(session_id) = session_id else {
            warn!(nas = %nas.identifier, "Interim-Update without Acct-Session-Id");
            return;
        };
        let counters = counters(request);

        match self.store.update_session(&session_id, counters) {
            UpdateOutcome::Applied { delta } => {
                self.tally(&session_id, delta);
            }
            UpdateOutcome::Regressed => {
                warn!(
                    session_id = %session_id,
                    input = counters.input_octets,
                    output = counters.output_octets,
                    "counter regression in Interim-Update, report discarded"
                );
            }
            UpdateOutcome::AlreadyStopped => {
                warn!(session_id = %session_id, "Interim-Update for a stopped session");
            }
            UpdateOutcome::NotFound => {
                warn!(session_id = %session_id, "Interim-Update for an unknown session");
            }
        }
    }

    fn on_stop(&self, request: &Packet, nas: &NasClient, session_id: Option<String>) {
        let Some(session_id) = session_id else {
            warn!(nas = %nas.identifier, "Accounting-Stop without Acct-Session-Id");
            return;
        };
        let counters = counters(request);
        let cause = request
            .find_attribute(AttributeType::AcctTerminateCause as u8)
            .and_then(|a| a.as_u32())
            .and_then(AcctTerminateCause::from_u32)
            .unwrap_or(AcctTerminateCause::UserRequest);

        match self.store.stop_session(&session_id, counters, cause) {
            StopOutcome::Stopped { delta } => {
                self.tally(&session_id, delta);
                info!(
                    session_id = %session_id,
                    cause = ?cause,
                    session_time = counters.session_time,
                    "session stopped"
                );
            }
            StopOutcome::AlreadyStopped => {
                warn!(session_id = %session_id, "retransmitted Accounting-Stop ignored");
            }
            StopOutcome::NotFound => {
                warn!(session_id = %session_id, "Accounting-Stop for an unknown session");
            }
        }
    }

    fn on_nas_transition(&self, nas: &NasClient, cause: AcctTerminateCause, label: &str) {
        let stopped = self.store.stop_all_for_nas(nas.ip_address, cause);
        info!(
            nas = %nas.identifier,
            sessions_closed = stopped.len(),
            "{label} closed all sessions for NAS"
        );
    }

    /// Fold a traffic delta into the owning account's consumption.
    fn tally(&self, session_id: &str, delta: u64) {
        if delta == 0 {
            return;
        }
        if let Some(session) = self.store.get_session(session_id) {
            self.accounts.add_consumed_bytes(&session.username, delta);
        }
    }
}

fn string_attr(request: &Packet, attr_type: AttributeType) -> Option<String> {
    request
        .find_attribute(attr_type as u8)
        .and_then(|a| a.as_string())
}

fn status_type(request: &Packet) -> Option<AcctStatusType> {
    request
        .find_attribute(AttributeType::AcctStatusType as u8)
        .and_then(|a| a.as_u32())
        .and_then(AcctStatusType::from_u32)
}

fn counters(request: &Packet) -> Counters {
    let int = |attr_type: AttributeType| {
        request
            .find_attribute(attr_type as u8)
            .and_then(|a| a.as_u32())
            .unwrap_or(0)
    };
    Counters {
        input_octets: u64::from(int(AttributeType::AcctInputOctets)),
        output_octets: u64::from(int(AttributeType::AcctOutputOctets)),
        session_time: int(AttributeType::AcctSessionTime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NasClientConfig;
    use crate::registry::{Account, AccountRegistry, Credential, StaticAccountRegistry};
    use aaa_proto::Attribute;
    use std::time::Duration;

    fn nas() -> NasClient {
        NasClient::try_from(&NasClientConfig {
            identifier: "vpn1".to_string(),
            ip_address: "10.0.0.1".to_string(),
            shared_secret: "s3cret".to_string(),
            auth_port: 1812,
            acct_port: 1813,
            active: true,
            description: String::new(),
        })
        .unwrap()
    }

    fn engine() -> (AcctEngine, Arc<SessionStore>, Arc<StaticAccountRegistry>) {
        let registry = Arc::new(StaticAccountRegistry::default());
        registry.insert(Account {
            username: "alice".to_string(),
            credential: Credential::parse("ctp:pw"),
            active: true,
            expires_at: None,
            max_sessions: 1,
            quota_bytes: None,
            consumed_bytes: 0,
        });
        let store = Arc::new(SessionStore::new(Duration::from_secs(10)));
        let engine = AcctEngine::new(registry.clone(), store.clone(), EventBus::default());
        (engine, store, registry)
    }

    fn acct_request(status: AcctStatusType, session_id: &str, username: &str) -> Packet {
        let mut request = Packet::new(Code::AccountingRequest, 9, [0u8; 16]);
        request.add_attribute(
            Attribute::integer(AttributeType::AcctStatusType, status.as_u32()).unwrap(),
        );
        request.add_attribute(
            Attribute::string(AttributeType::AcctSessionId, session_id).unwrap(),
        );
        request.add_attribute(Attribute::string(AttributeType::UserName, username).unwrap());
        request
    }

    fn with_counters(mut request: Packet, input: u32, output: u32, time: u32) -> Packet {
        request.add_attribute(
            Attribute::integer(AttributeType::AcctInputOctets, input).unwrap(),
        );
        request.add_attribute(
            Attribute::integer(AttributeType::AcctOutputOctets, output).unwrap(),
        );
        request.add_attribute(
            Attribute::integer(AttributeType::AcctSessionTime, time).unwrap(),
        );
        request
    }

    #[test]
    fn start_creates_session_and_acks() {
        let (engine, store, _) = engine();
        let response = engine
            .handle(&acct_request(AcctStatusType::Start, "s1", "alice"), &nas())
            .unwrap();

        assert_eq!(response.code, Code::AccountingResponse);
        assert!(response.attributes.is_empty());
        assert_eq!(store.active_count("alice"), 1);
    }

    #[test]
    fn interim_tallies_consumption() {
        let (engine, _, accounts) = engine();
        let nas = nas();
        engine
            .handle(&acct_request(AcctStatusType::Start, "s1", "alice"), &nas)
            .unwrap();

        let interim = with_counters(
            acct_request(AcctStatusType::InterimUpdate, "s1", "alice"),
            1000,
            2000,
            60,
        );
        engine.handle(&interim, &nas).unwrap();

        assert_eq!(accounts.lookup("alice").unwrap().consumed_bytes, 3000);
    }

    #[test]
    fn stop_then_retransmitted_stop_counts_once() {
        let (engine, store, accounts) = engine();
        let nas = nas();
        engine
            .handle(&acct_request(AcctStatusType::Start, "s1", "alice"), &nas)
            .unwrap();

        let stop = with_counters(
            acct_request(AcctStatusType::Stop, "s1", "alice"),
            500,
            500,
            120,
        );
        engine.handle(&stop, &nas).unwrap();
        assert_eq!(store.active_count("alice"), 0);
        assert_eq!(accounts.lookup("alice").unwrap().consumed_bytes, 1000);

        // Retransmission is acknowledged but not double-counted.
        let response = engine.handle(&stop, &nas).unwrap();
        assert_eq!(response.code, Code::AccountingResponse);
        assert_eq!(accounts.lookup("alice").unwrap().consumed_bytes, 1000);
    }

    #[test]
    fn stop_then_late_interim_does_not_resurrect() {
        let (engine, store, accounts) = engine();
        let nas = nas();
        engine
            .handle(&acct_request(AcctStatusType::Start, "s1", "alice"), &nas)
            .unwrap();
        engine
            .handle(
                &with_counters(acct_request(AcctStatusType::Stop, "s1", "alice"), 100, 100, 60),
                &nas,
            )
            .unwrap();

        let late = with_counters(
            acct_request(AcctStatusType::InterimUpdate, "s1", "alice"),
            9999,
            9999,
            90,
        );
        engine.handle(&late, &nas).unwrap();

        assert_eq!(store.active_count("alice"), 0);
        assert_eq!(accounts.lookup("alice").unwrap().consumed_bytes, 200);
    }

    #[test]
    fn counter_regression_is_discarded() {
        let (engine, _, accounts) = engine();
        let nas = nas();
        engine
            .handle(&acct_request(AcctStatusType::Start, "s1", "alice"), &nas)
            .unwrap();
        engine
            .handle(
                &with_counters(
                    acct_request(AcctStatusType::InterimUpdate, "s1", "alice"),
                    1000,
                    1000,
                    60,
                ),
                &nas,
            )
            .unwrap();
        // Counters went backwards.
        engine
            .handle(
                &with_counters(
                    acct_request(AcctStatusType::InterimUpdate, "s1", "alice"),
                    10,
                    10,
                    120,
                ),
                &nas,
            )
            .unwrap();

        assert_eq!(accounts.lookup("alice").unwrap().consumed_bytes, 2000);
    }

    #[test]
    fn accounting_on_closes_nas_sessions() {
        let (engine, store, _) = engine();
        let nas = nas();
        engine
            .handle(&acct_request(AcctStatusType::Start, "s1", "alice"), &nas)
            .unwrap();

        let mut on = Packet::new(Code::AccountingRequest, 3, [0u8; 16]);
        on.add_attribute(
            Attribute::integer(
                AttributeType::AcctStatusType,
                AcctStatusType::AccountingOn.as_u32(),
            )
            .unwrap(),
        );
        let response = engine.handle(&on, &nas).unwrap();

        assert_eq!(response.code, Code::AccountingResponse);
        assert_eq!(store.active_count("alice"), 0);
        assert_eq!(
            store.get_session("s1").unwrap().terminate_cause,
            Some(AcctTerminateCause::NasReboot)
        );
    }

    #[test]
    fn unknown_status_type_is_still_acked() {
        let (engine, store, _) = engine();
        let mut request = Packet::new(Code::AccountingRequest, 4, [0u8; 16]);
        request.add_attribute(
            // 4 is Accounting status "not in our set".
            Attribute::integer(AttributeType::AcctStatusType, 4).unwrap(),
        );

        let response = engine.handle(&request, &nas()).unwrap();
        assert_eq!(response.code, Code::AccountingResponse);
        assert!(store.active_sessions().is_empty());
    }

    #[test]
    fn stop_for_unknown_session_is_acked() {
        let (engine, _, _) = engine();
        let stop = acct_request(AcctStatusType::Stop, "ghost", "alice");
        let response = engine.handle(&stop, &nas()).unwrap();
        assert_eq!(response.code, Code::AccountingResponse);
    }
}
