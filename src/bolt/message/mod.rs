//! Bolt protocol messages.

pub mod request;
pub mod response;

pub use request::{
    AccessMode, HelloMessage, Request, RouteMessage, RunMessage, StreamMessage, TransactionExtra, ALL,
    LAST_QUERY,
};
pub use response::{Response, SuccessMessage};

/// Message signature bytes.
pub mod tag {
    pub const HELLO: u8 = 0x01;
    pub const GOODBYE: u8 = 0x02;
    pub const RESET: u8 = 0x0F;
    pub const RUN: u8 = 0x10;
    pub const BEGIN: u8 = 0x11;
    pub const COMMIT: u8 = 0x12;
    pub const ROLLBACK: u8 = 0x13;
    pub const DISCARD: u8 = 0x2F;
    pub const PULL: u8 = 0x3F;
    /// Bolt 4.3+
    pub const ROUTE: u8 = 0x66;
    /// Bolt 5.1+
    pub const LOGON: u8 = 0x6A;
    /// Bolt 5.1+
    pub const LOGOFF: u8 = 0x6B;
    /// Bolt 5.4+
    pub const TELEMETRY: u8 = 0x54;

    pub const SUCCESS: u8 = 0x70;
    pub const RECORD: u8 = 0x71;
    pub const IGNORED: u8 = 0x7E;
    pub const FAILURE: u8 = 0x7F;

    pub fn request_name(tag: u8) -> &'static str {
        match tag {
            HELLO => "HELLO",
            GOODBYE => "GOODBYE",
            RESET => "RESET",
            RUN => "RUN",
            BEGIN => "BEGIN",
            COMMIT => "COMMIT",
            ROLLBACK => "ROLLBACK",
            DISCARD => "DISCARD",
            PULL => "PULL",
            ROUTE => "ROUTE",
            LOGON => "LOGON",
            LOGOFF => "LOGOFF",
            TELEMETRY => "TELEMETRY",
            _ => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tag::*;

    #[test]
    fn test_request_names() {
        assert_eq!(request_name(PULL), "PULL");
        assert_eq!(request_name(ROUTE), "ROUTE");
        assert_eq!(request_name(0x00), "UNKNOWN");
    }
}
