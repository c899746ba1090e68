/// The attribute types this server reads or writes (RFC 2865/2866).
///
/// This is deliberately not the full registry: the server needs user
/// identification, password transport, NAS identification and the
/// accounting counters, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttributeType {
    /// User-Name (1)
    UserName = 1,
    /// User-Password (2) - obfuscated per RFC 2865 Section 5.2
    UserPassword = 2,
    /// NAS-IP-Address (4)
    NasIpAddress = 4,
    /// Service-Type (6)
    ServiceType = 6,
    /// Framed-Protocol (7)
    FramedProtocol = 7,
    /// Framed-IP-Address (8)
    FramedIpAddress = 8,
    /// Reply-Message (18)
    ReplyMessage = 18,
    /// Calling-Station-Id (31)
    CallingStationId = 31,
    /// NAS-Identifier (32)
    NasIdentifier = 32,
    /// Acct-Status-Type (40)
    AcctStatusType = 40,
    /// Acct-Input-Octets (42)
    AcctInputOctets = 42,
    /// Acct-Output-Octets (43)
    AcctOutputOctets = 43,
    /// Acct-Session-Id (44)
    AcctSessionId = 44,
    /// Acct-Session-Time (46)
    AcctSessionTime = 46,
    /// Acct-Terminate-Cause (49)
    AcctTerminateCause = 49,
    /// Acct-Interim-Interval (85) - RFC 2869
    AcctInterimInterval = 85,
}
