//! Control commands understood by the simulation server.

use std::fmt;

/// Outbound control command. Sent as its plain-text wire name; the server
/// answers `Start` and `Step` with a fresh snapshot and sends no
/// acknowledgement otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Reset the model and send the initial snapshot.
    Start,
    /// Advance the model one step and send the resulting snapshot.
    Step,
    Stop,
}

impl Command {
    /// Wire text for this command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Step => "step",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
