//! Typed query commands for the Heliotherm controller.

use std::fmt;

/// A query command understood by the controller.
///
/// Commands are short ASCII strings terminated by `;`. Process values (`MP`)
/// are live measurements, parameters (`SP`) are settings and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `LIN;` - open a session. The controller answers `OK;`.
    Login,
    /// `LOUT;` - close the session. The controller answers `OK;`.
    Logout,
    /// `MP,NR=<n>;` - read process value `n`.
    ReadProcessValue(u16),
    /// `SP,NR=<n>;` - read parameter `n`.
    ReadParameter(u16),
}

impl Command {
    /// Render the ASCII wire form of this command.
    pub fn wire_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Login => write!(f, "LIN;"),
            Command::Logout => write!(f, "LOUT;"),
            Command::ReadProcessValue(nr) => write!(f, "MP,NR={};", nr),
            Command::ReadParameter(nr) => write!(f, "SP,NR={};", nr),
        }
    }
}

/// Modem wake-up string.
///
/// Some gateways only start relaying after seeing a modem-style connect
/// banner. Sent once when the first login attempt gets no reply at all.
pub const CONNECT_STRING: &[u8] = b"\r\nCONNECT 19200\r\n";

/// Payload the controller sends for an accepted `LIN;`/`LOUT;`.
pub const RESPONSE_SUCCESS: &[u8] = b"OK;";
