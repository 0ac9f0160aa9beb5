//! Bolt protocol versions and handshake proposals.

use std::fmt;

/// A negotiated Bolt protocol version.
///
/// On the wire a version occupies 4 bytes `[0x00, range, minor, major]`,
/// where `range` counts how many minor versions below `minor` are also
/// acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoltVersion {
    pub major: u8,
    pub minor: u8,
}

impl BoltVersion {
    pub const V4_0: BoltVersion = BoltVersion::new(4, 0);
    pub const V4_1: BoltVersion = BoltVersion::new(4, 1);
    pub const V4_2: BoltVersion = BoltVersion::new(4, 2);
    pub const V4_3: BoltVersion = BoltVersion::new(4, 3);
    pub const V4_4: BoltVersion = BoltVersion::new(4, 4);
    pub const V5_0: BoltVersion = BoltVersion::new(5, 0);
    pub const V5_1: BoltVersion = BoltVersion::new(5, 1);
    pub const V5_2: BoltVersion = BoltVersion::new(5, 2);
    pub const V5_4: BoltVersion = BoltVersion::new(5, 4);
    pub const V5_8: BoltVersion = BoltVersion::new(5, 8);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Decode the server's 4-byte agreement. All zeroes means no agreement.
    pub fn from_agreement(bytes: [u8; 4]) -> Option<Self> {
        if bytes == [0, 0, 0, 0] {
            return None;
        }
        Some(Self::new(bytes[3], bytes[2]))
    }

    /// ROUTE message instead of the routing procedure.
    pub fn supports_route_message(self) -> bool {
        self >= Self::V4_3
    }

    /// `imp_user` on BEGIN, RUN and ROUTE.
    pub fn supports_impersonation(self) -> bool {
        self >= Self::V4_4
    }

    /// Credentials travel in LOGON instead of HELLO.
    pub fn supports_logon(self) -> bool {
        self >= Self::V5_1
    }

    pub fn supports_notification_filters(self) -> bool {
        self >= Self::V5_2
    }

    pub fn supports_telemetry(self) -> bool {
        self >= Self::V5_4
    }

    /// Versions that negotiate the `utc` patch in HELLO.
    pub fn negotiates_utc_patch(self) -> bool {
        self.major == 4 && self >= Self::V4_3
    }

    /// Whether the server sends `hints` in the HELLO reply.
    pub fn supports_hints(self) -> bool {
        self >= Self::V4_3
    }

    /// Multiple databases and the `db` field.
    pub fn supports_multi_db(self) -> bool {
        self.major >= 4
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One handshake proposal: `version` and the `range` minors below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub version: BoltVersion,
    pub range: u8,
}

impl VersionRange {
    pub const fn new(version: BoltVersion, range: u8) -> Self {
        Self { version, range }
    }

    pub const fn exact(version: BoltVersion) -> Self {
        Self { version, range: 0 }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [0x00, self.range, self.version.minor, self.version.major]
    }

    pub fn contains(self, version: BoltVersion) -> bool {
        version.major == self.version.major
            && version.minor <= self.version.minor
            && version.minor >= self.version.minor.saturating_sub(self.range)
    }
}

/// The four ranges a client proposes, newest first.
pub const DEFAULT_PROPOSALS: [VersionRange; 4] = [
    VersionRange::new(BoltVersion::V5_8, 8),
    VersionRange::new(BoltVersion::V4_4, 2),
    VersionRange::exact(BoltVersion::V4_1),
    VersionRange::exact(BoltVersion::V4_0),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let range = VersionRange::new(BoltVersion::V5_8, 8);
        assert_eq!(range.to_bytes(), [0x00, 0x08, 0x08, 0x05]);
        assert_eq!(
            BoltVersion::from_agreement([0x00, 0x00, 0x04, 0x05]),
            Some(BoltVersion::new(5, 4))
        );
        assert_eq!(BoltVersion::from_agreement([0, 0, 0, 0]), None);
    }

    #[test]
    fn test_ordering_and_gates() {
        assert!(BoltVersion::V5_0 > BoltVersion::V4_4);
        assert!(!BoltVersion::V5_0.supports_logon());
        assert!(BoltVersion::V5_1.supports_logon());
        assert!(BoltVersion::V4_3.supports_route_message());
        assert!(!BoltVersion::V4_2.supports_route_message());
        assert!(BoltVersion::V4_4.negotiates_utc_patch());
        assert!(!BoltVersion::V5_0.negotiates_utc_patch());
    }

    #[test]
    fn test_range_contains() {
        let range = VersionRange::new(BoltVersion::V4_4, 2);
        assert!(range.contains(BoltVersion::V4_2));
        assert!(range.contains(BoltVersion::V4_4));
        assert!(!range.contains(BoltVersion::V4_1));
        assert!(!range.contains(BoltVersion::V5_2));
    }

    #[test]
    fn test_every_proposal_is_distinct() {
        for (i, a) in DEFAULT_PROPOSALS.iter().enumerate() {
            for b in &DEFAULT_PROPOSALS[i + 1..] {
                assert!(a.version > b.version);
            }
        }
    }
}
