use crate::error::UPSError;

// The UPS uses ASCII characters for communication.
pub const TERMINATOR: u8 = 13; // Carriage return

const MAX_SHUTDOWN_MINUTES: f32 = 10.0;
const MAX_RESTORE_MINUTES: u32 = 9999;

/// Every request the client knows how to send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Query,
    /// Ten second self test.
    Test,
    TestFor { minutes: u32 },
    TestUntilLow,
    CancelTest,
    ToggleBeeper,
    Shutdown { delay: f32 },
    ShutdownRestore { delay: f32, restore: u32 },
    CancelShutdown,
    Info,
    Rating,
}

// The UPS only takes delays to one decimal place, so range checks apply to what goes on the wire.
fn tenths(minutes: f32) -> f32 {
    (minutes * 10.0).round() / 10.0
}

impl Command {
    /// Validates the parameters and returns the bytes to write, terminator included.
    pub fn encode(&self) -> Result<Vec<u8>, UPSError> {
        let body = match *self {
            Command::Query => "Q1".to_string(),
            Command::Test => "T".to_string(),
            Command::TestFor { minutes } => format!("T{:02}", minutes),
            Command::TestUntilLow => "TL".to_string(),
            Command::CancelTest => "CT".to_string(),
            // Shares the first byte with the query, unconfirmed against device docs.
            Command::ToggleBeeper => "Q".to_string(),
            Command::Shutdown { delay } => {
                let delay = tenths(delay);
                if !(delay > 0.0 && delay <= MAX_SHUTDOWN_MINUTES) {
                    return Err(UPSError::invalid(
                        "shutdown delay",
                        format!("{} is not within (0, {}]", delay, MAX_SHUTDOWN_MINUTES),
                    ));
                }
                format!("S{:.1}", delay)
            }
            Command::ShutdownRestore { delay, restore } => {
                let delay = tenths(delay);
                if !(delay >= 0.0 && delay <= MAX_SHUTDOWN_MINUTES) {
                    return Err(UPSError::invalid(
                        "shutdown delay",
                        format!("{} is not within [0, {}]", delay, MAX_SHUTDOWN_MINUTES),
                    ));
                }
                if restore > MAX_RESTORE_MINUTES {
                    return Err(UPSError::invalid(
                        "restore minutes",
                        format!("{} exceeds {}", restore, MAX_RESTORE_MINUTES),
                    ));
                }
                format!("S{:.1}C{:04}", delay, restore)
            }
            Command::CancelShutdown => "C".to_string(),
            Command::Info => "I".to_string(),
            Command::Rating => "F".to_string(),
        };

        let mut bytes = body.into_bytes();
        bytes.push(TERMINATOR);
        Ok(bytes)
    }
}
