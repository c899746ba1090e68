//! In-memory session store with per-user admission control.
//!
//! All state transitions for one username are serialized through that
//! user's DashMap entry lock, which is what makes the
//! reserve-then-start handshake race-free: two concurrent
//! Access-Requests for the same user cannot both pass the concurrency
//! check, because each reservation is taken while holding the entry.
//!
//! A reservation is a short-lived hold on a concurrency slot, created
//! when an Access-Accept is issued and consumed by the matching
//! Accounting-Start. Reservations that are never followed by a Start
//! expire after a TTL so an abandoned accept cannot pin a slot.

use aaa_proto::AcctTerminateCause;
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Stopped,
}

/// One accounting session, live or recently stopped.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub username: String,
    pub nas_identifier: String,
    pub nas_ip: IpAddr,
    pub framed_ip: Option<Ipv4Addr>,
    pub calling_station: Option<String>,
    pub status: SessionStatus,
    /// Cumulative counters as last reported by the NAS.
    pub input_octets: u64,
    pub output_octets: u64,
    pub session_time: u32,
    pub started_at: u64,
    pub last_update: u64,
    pub stopped_at: Option<u64>,
    pub terminate_cause: Option<AcctTerminateCause>,
    /// Monotonic liveness clock for the stale sweep.
    last_seen: Instant,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Parameters of an Accounting-Start.
#[derive(Debug, Clone)]
pub struct SessionStart {
    pub session_id: String,
    pub username: String,
    pub nas_identifier: String,
    pub nas_ip: IpAddr,
    pub framed_ip: Option<Ipv4Addr>,
    pub calling_station: Option<String>,
}

/// Cumulative counters carried by an Interim-Update or Stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub input_octets: u64,
    pub output_octets: u64,
    pub session_time: u32,
}

/// Slot hold handed out at authentication time. Dropping the handle
/// does not release the slot; the hold either converts into a session
/// or times out.
#[derive(Debug)]
pub struct Reservation {
    pub username: String,
    id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveDenied {
    /// Sessions currently accounted as active.
    pub active: usize,
    /// Unexpired reservations not yet converted by a Start.
    pub pending: usize,
}

#[derive(Debug)]
pub enum StartOutcome {
    Created {
        /// False when no reservation was pending, meaning the NAS
        /// started accounting without a recent Access-Accept.
        reservation_consumed: bool,
        /// Same-user sessions force-stopped because the NAS reused
        /// their framed IP without a Stop.
        displaced: Vec<Session>,
    },
    /// Session id already known; the packet is a retransmission.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied { delta: u64 },
    /// Counters went backwards; nothing was applied.
    Regressed,
    AlreadyStopped,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { delta: u64 },
    AlreadyStopped,
    NotFound,
}

struct PendingReservation {
    id: u64,
    created_at: Instant,
}

#[derive(Default)]
struct UserState {
    sessions: HashMap<String, Session>,
    reservations: Vec<PendingReservation>,
}

impl UserState {
    fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    fn purge_expired_reservations(&mut self, ttl: Duration) {
        let now = Instant::now();
        self.reservations
            .retain(|r| now.duration_since(r.created_at) < ttl);
    }
}

pub struct SessionStore {
    users: DashMap<String, UserState>,
    /// session id -> username, so stop/update can find the owning
    /// entry without scanning.
    owners: DashMap<String, String>,
    reservation_ttl: Duration,
    next_reservation: AtomicU64,
}

impl SessionStore {
    pub fn new(reservation_ttl: Duration) -> Self {
        SessionStore {
            users: DashMap::new(),
            owners: DashMap::new(),
            reservation_ttl,
            next_reservation: AtomicU64::new(1),
        }
    }

    /// Claim a concurrency slot for `username`, or report why not.
    ///
    /// Both live sessions and pending reservations count against the
    /// limit, so an accept that has not yet produced its
    /// Accounting-Start still occupies its slot.
    pub fn reserve(
        &self,
        username: &str,
        max_sessions: u32,
    ) -> Result<Reservation, ReserveDenied> {
        let mut state = self.users.entry(username.to_string()).or_default();
        state.purge_expired_reservations(self.reservation_ttl);

        let active = state.active_count();
        let pending = state.reservations.len();
        if active + pending >= max_sessions as usize {
            return Err(ReserveDenied { active, pending });
        }

        let id = self.next_reservation.fetch_add(1, Ordering::Relaxed);
        state.reservations.push(PendingReservation {
            id,
            created_at: Instant::now(),
        });
        Ok(Reservation {
            username: username.to_string(),
            id,
        })
    }

    /// Give a slot back without a session, for accepts that are known
    /// to have failed downstream.
    pub fn release(&self, reservation: &Reservation) {
        if let Some(mut state) = self.users.get_mut(&reservation.username) {
            state.reservations.retain(|r| r.id != reservation.id);
        }
    }

    /// Record an Accounting-Start. Consumes one pending reservation
    /// if any exists; an identical session id is acknowledged as a
    /// duplicate without touching state.
    pub fn start_session(&self, start: SessionStart) -> StartOutcome {
        let mut state = self.users.entry(start.username.clone()).or_default();

        if state.sessions.contains_key(&start.session_id) {
            return StartOutcome::Duplicate;
        }

        state.purge_expired_reservations(self.reservation_ttl);
        let reservation_consumed = !state.reservations.is_empty();
        if reservation_consumed {
            state.reservations.remove(0);
        }

        // A NAS that crashed mid-session can hand the same framed IP
        // to a fresh session without ever sending a Stop. The old
        // record is force-closed so the slot is not leaked.
        let mut displaced = Vec::new();
        if let Some(framed_ip) = start.framed_ip {
            let stale_ids: Vec<String> = state
                .sessions
                .values()
                .filter(|s| s.is_active() && s.framed_ip == Some(framed_ip))
                .map(|s| s.session_id.clone())
                .collect();
            for id in stale_ids {
                if let Some(session) = state.sessions.get_mut(&id) {
                    close(session, AcctTerminateCause::NasRequest);
                    displaced.push(session.clone());
                }
            }
        }

        let now = now_secs();
        let session = Session {
            session_id: start.session_id.clone(),
            username: start.username.clone(),
            nas_identifier: start.nas_identifier,
            nas_ip: start.nas_ip,
            framed_ip: start.framed_ip,
            calling_station: start.calling_station,
            status: SessionStatus::Active,
            input_octets: 0,
            output_octets: 0,
            session_time: 0,
            started_at: now,
            last_update: now,
            stopped_at: None,
            terminate_cause: None,
            last_seen: Instant::now(),
        };
        state.sessions.insert(start.session_id.clone(), session);
        self.owners.insert(start.session_id, start.username);

        StartOutcome::Created {
            reservation_consumed,
            displaced,
        }
    }

    /// Apply Interim-Update counters. Counters are cumulative, so any
    /// regression means a NAS reset or an out-of-order retransmission
    /// and the report is discarded. The session is still considered
    /// alive either way.
    pub fn update_session(&self, session_id: &str, counters: Counters) -> UpdateOutcome {
        let Some(username) = self.owner_of(session_id) else {
            return UpdateOutcome::NotFound;
        };
        let Some(mut state) = self.users.get_mut(&username) else {
            return UpdateOutcome::NotFound;
        };
        let Some(session) = state.sessions.get_mut(session_id) else {
            return UpdateOutcome::NotFound;
        };

        if !session.is_active() {
            return UpdateOutcome::AlreadyStopped;
        }

        session.last_seen = Instant::now();
        session.last_update = now_secs();

        match counter_delta(session, counters) {
            Some(delta) => {
                apply_counters(session, counters);
                UpdateOutcome::Applied { delta }
            }
            None => UpdateOutcome::Regressed,
        }
    }

    /// Close a session on Accounting-Stop. The concurrency slot is
    /// released exactly once; a retransmitted Stop reports
    /// `AlreadyStopped` and changes nothing.
    pub fn stop_session(
        &self,
        session_id: &str,
        counters: Counters,
        cause: AcctTerminateCause,
    ) -> StopOutcome {
        let Some(username) = self.owner_of(session_id) else {
            return StopOutcome::NotFound;
        };
        let Some(mut state) = self.users.get_mut(&username) else {
            return StopOutcome::NotFound;
        };
        let Some(session) = state.sessions.get_mut(session_id) else {
            return StopOutcome::NotFound;
        };

        if !session.is_active() {
            return StopOutcome::AlreadyStopped;
        }

        // Final counters fold in like an interim; a regressed final
        // report keeps the last good values.
        let delta = match counter_delta(session, counters) {
            Some(delta) => {
                apply_counters(session, counters);
                delta
            }
            None => 0,
        };
        close(session, cause);

        StopOutcome::Stopped { delta }
    }

    /// Administrative force-stop, used by the reaper and by session
    /// kick. Counters stay at their last reported values.
    pub fn terminate(&self, session_id: &str, cause: AcctTerminateCause) -> Option<Session> {
        let username = self.owner_of(session_id)?;
        let mut state = self.users.get_mut(&username)?;
        let session = state.sessions.get_mut(session_id)?;
        if !session.is_active() {
            return None;
        }
        close(session, cause);
        Some(session.clone())
    }

    /// Close every active session behind a NAS, for Accounting-On/Off.
    pub fn stop_all_for_nas(&self, nas_ip: IpAddr, cause: AcctTerminateCause) -> Vec<Session> {
        let mut stopped = Vec::new();
        for mut entry in self.users.iter_mut() {
            for session in entry.value_mut().sessions.values_mut() {
                if session.is_active() && session.nas_ip == nas_ip {
                    close(session, cause);
                    stopped.push(session.clone());
                }
            }
        }
        stopped
    }

    /// Force-stop active sessions that have not reported for longer
    /// than `stale_after`, and drop expired reservations while at it.
    pub fn sweep_stale(&self, stale_after: Duration) -> Vec<Session> {
        let now = Instant::now();
        let mut reaped = Vec::new();
        for mut entry in self.users.iter_mut() {
            let state = entry.value_mut();
            state.purge_expired_reservations(self.reservation_ttl);
            for session in state.sessions.values_mut() {
                if session.is_active() && now.duration_since(session.last_seen) >= stale_after {
                    close(session, AcctTerminateCause::SessionTimeout);
                    reaped.push(session.clone());
                }
            }
        }
        reaped
    }

    /// Drop the oldest stopped sessions beyond `retain`, returning how
    /// many were removed. Active sessions are never touched.
    pub fn prune_stopped(&self, retain: usize) -> usize {
        let mut stopped: Vec<(u64, String, String)> = Vec::new();
        for entry in self.users.iter() {
            for session in entry.value().sessions.values() {
                if !session.is_active() {
                    stopped.push((
                        session.stopped_at.unwrap_or(0),
                        session.username.clone(),
                        session.session_id.clone(),
                    ));
                }
            }
        }
        if stopped.len() <= retain {
            return 0;
        }

        // Oldest first.
        stopped.sort();
        let excess = stopped.len() - retain;
        for (_, username, session_id) in stopped.into_iter().take(excess) {
            if let Some(mut state) = self.users.get_mut(&username) {
                state.sessions.remove(&session_id);
            }
            self.owners.remove(&session_id);
        }
        excess
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        let username = self.owner_of(session_id)?;
        let state = self.users.get(&username)?;
        state.sessions.get(session_id).cloned()
    }

    pub fn active_count(&self, username: &str) -> usize {
        self.users
            .get(username)
            .map(|state| state.active_count())
            .unwrap_or(0)
    }

    pub fn active_sessions(&self) -> Vec<Session> {
        let mut sessions = Vec::new();
        for entry in self.users.iter() {
            sessions.extend(entry.value().sessions.values().filter(|s| s.is_active()).cloned());
        }
        sessions
    }

    fn owner_of(&self, session_id: &str) -> Option<String> {
        self.owners.get(session_id).map(|owner| owner.clone())
    }
}

/// Delta of cumulative counters, or None on regression.
fn counter_delta(session: &Session, counters: Counters) -> Option<u64> {
    if counters.input_octets < session.input_octets
        || counters.output_octets < session.output_octets
    {
        return None;
    }
    Some(
        (counters.input_octets - session.input_octets)
            + (counters.output_octets - session.output_octets),
    )
}

fn apply_counters(session: &mut Session, counters: Counters) {
    session.input_octets = counters.input_octets;
    session.output_octets = counters.output_octets;
    session.session_time = counters.session_time;
}

fn close(session: &mut Session, cause: AcctTerminateCause) {
    session.status = SessionStatus::Stopped;
    session.stopped_at = Some(now_secs());
    session.terminate_cause = Some(cause);
}
