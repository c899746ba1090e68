//! Accounting enums (RFC 2866).

/// Acct-Status-Type values (RFC 2866 Section 5.1).
///
/// `from_u32` returns `None` for values outside this set; the
/// accounting engine acknowledges those without any state change, as
/// the protocol requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AcctStatusType {
    /// Start (1) - session has begun
    Start = 1,
    /// Stop (2) - session has ended
    Stop = 2,
    /// Interim-Update (3) - periodic counter report for a live session
    InterimUpdate = 3,
    /// Accounting-On (7) - NAS came up
    AccountingOn = 7,
    /// Accounting-Off (8) - NAS is shutting down
    AccountingOff = 8,
}

impl AcctStatusType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(AcctStatusType::Start),
            2 => Some(AcctStatusType::Stop),
            3 => Some(AcctStatusType::InterimUpdate),
            7 => Some(AcctStatusType::AccountingOn),
            8 => Some(AcctStatusType::AccountingOff),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Acct-Terminate-Cause values the server records (RFC 2866
/// Section 5.10 subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AcctTerminateCause {
    /// User Request (1)
    UserRequest = 1,
    /// Idle Timeout (4)
    IdleTimeout = 4,
    /// Session Timeout (5) - also used by the stale-session reaper
    SessionTimeout = 5,
    /// Admin Reset (6) - administrative session kick
    AdminReset = 6,
    /// NAS Request (10) - NAS shut down (Accounting-Off)
    NasRequest = 10,
    /// NAS Reboot (11) - NAS restarted (Accounting-On)
    NasReboot = 11,
}

impl AcctTerminateCause {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(AcctTerminateCause::UserRequest),
            4 => Some(AcctTerminateCause::IdleTimeout),
            5 => Some(AcctTerminateCause::SessionTimeout),
            6 => Some(AcctTerminateCause::AdminReset),
            10 => Some(AcctTerminateCause::NasRequest),
            11 => Some(AcctTerminateCause::NasReboot),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}
