//! Bolt handshake.
//!
//! 1. Client sends the 4-byte magic preamble `0x6060B017`
//! 2. Client sends four 4-byte version proposals, newest first
//! 3. Server answers with the 4-byte version it picked, or zeroes

mod version;

pub use version::{BoltVersion, VersionRange, DEFAULT_PROPOSALS};

pub use super::error::HandshakeError;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Bolt protocol magic number.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Magic plus four proposals.
pub const HANDSHAKE_SIZE: usize = 20;

pub const HANDSHAKE_RESPONSE_SIZE: usize = 4;

/// Build the 20-byte client handshake.
pub fn handshake_bytes(proposals: &[VersionRange; 4]) -> [u8; HANDSHAKE_SIZE] {
    let mut out = [0u8; HANDSHAKE_SIZE];
    out[..4].copy_from_slice(&BOLT_MAGIC);
    for (i, proposal) in proposals.iter().enumerate() {
        let start = 4 + i * 4;
        out[start..start + 4].copy_from_slice(&proposal.to_bytes());
    }
    out
}

/// Check the server's reply against what was proposed.
pub fn agreed_version(
    reply: [u8; HANDSHAKE_RESPONSE_SIZE],
    proposals: &[VersionRange; 4],
) -> Result<BoltVersion, HandshakeError> {
    // "HTTP" in ASCII.
    if reply == [0x48, 0x54, 0x54, 0x50] {
        return Err(HandshakeError::InvalidData(
            "server responded with HTTP; make sure the Bolt port is used".to_string(),
        ));
    }
    let version = BoltVersion::from_agreement(reply).ok_or(HandshakeError::NoCompatibleVersion)?;
    if proposals.iter().any(|p| p.contains(version)) {
        Ok(version)
    } else {
        Err(HandshakeError::UnexpectedVersion(version))
    }
}

/// Run the client side of the handshake over a freshly connected stream.
pub async fn perform<S>(stream: &mut S, proposals: &[VersionRange; 4]) -> Result<BoltVersion, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = handshake_bytes(proposals);
    stream.write_all(&request).await.map_err(HandshakeError::io)?;
    stream.flush().await.map_err(HandshakeError::io)?;
    debug!("C: [HANDSHAKE] {}", hex(&request));

    let mut reply = [0u8; HANDSHAKE_RESPONSE_SIZE];
    stream.read_exact(&mut reply).await.map_err(HandshakeError::io)?;
    let version = agreed_version(reply, proposals)?;
    debug!("S: [HANDSHAKE] {}", version);
    Ok(version)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}
