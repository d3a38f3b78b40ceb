use std::io;

use serde::Serialize;
use serialport::SerialPort;

use crate::{
    command::Command,
    error::UPSError,
    frame::FrameReader,
    status::{self, DeviceInfo, QueryResult, Rating},
    transport::{PortSettings, Transport},
};

/// What the UPS gave back for a command.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Reply {
    Ack,
    Status(QueryResult),
    Info(DeviceInfo),
    Rating(Rating),
}

/// A Megatec UPS on an exclusively owned transport.
///
/// One command is in flight at a time: every call writes a request and, where
/// the UPS answers, reads exactly one frame back before returning.
pub struct UPS<T: Transport> {
    transport: Option<T>,
    frames: FrameReader,
}

impl UPS<Box<dyn SerialPort>> {
    pub fn open(settings: &PortSettings) -> Result<Self, UPSError> {
        Ok(UPS::new(settings.open()?))
    }
}

impl<T: Transport> UPS<T> {
    pub fn new(transport: T) -> UPS<T> {
        UPS {
            transport: Some(transport),
            frames: FrameReader::new(),
        }
    }

    /// Releases the transport. Safe to call more than once.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            log::debug!("UPS transport released.");
        }
    }

    /// Runs one command through a full request/response cycle.
    pub fn execute(&mut self, command: Command) -> Result<Reply, UPSError> {
        let ack = |res: Result<(), UPSError>| res.map(|_| Reply::Ack);
        match command {
            Command::Query => self.query().map(Reply::Status),
            Command::Info => self.info().map(Reply::Info),
            Command::Rating => self.rating().map(Reply::Rating),
            Command::Test => ack(self.test()),
            Command::TestFor { minutes } => ack(self.test_for(minutes)),
            Command::TestUntilLow => ack(self.test_until_low()),
            Command::CancelTest => ack(self.cancel_test()),
            Command::ToggleBeeper => ack(self.toggle_beeper()),
            Command::Shutdown { delay } => ack(self.shutdown(delay)),
            Command::ShutdownRestore { delay, restore } => ack(self.shutdown_restore(delay, restore)),
            Command::CancelShutdown => ack(self.cancel_shutdown()),
        }
    }

    pub fn query(&mut self) -> Result<QueryResult, UPSError> {
        let line = self.exchange(&Command::Query)?;
        status::decode_query(&line)
    }

    pub fn info(&mut self) -> Result<DeviceInfo, UPSError> {
        let line = self.exchange(&Command::Info)?;
        status::decode_info(&line)
    }

    pub fn rating(&mut self) -> Result<Rating, UPSError> {
        let line = self.exchange(&Command::Rating)?;
        status::decode_rating(&line)
    }

    pub fn test(&mut self) -> Result<(), UPSError> {
        self.send_command(&Command::Test)
    }

    pub fn test_for(&mut self, minutes: u32) -> Result<(), UPSError> {
        self.send_command(&Command::TestFor { minutes })
    }

    pub fn test_until_low(&mut self) -> Result<(), UPSError> {
        self.send_command(&Command::TestUntilLow)
    }

    pub fn cancel_test(&mut self) -> Result<(), UPSError> {
        self.send_command(&Command::CancelTest)
    }

    pub fn toggle_beeper(&mut self) -> Result<(), UPSError> {
        self.send_command(&Command::ToggleBeeper)
    }

    pub fn shutdown(&mut self, delay: f32) -> Result<(), UPSError> {
        self.send_command(&Command::Shutdown { delay })
    }

    pub fn shutdown_restore(&mut self, delay: f32, restore: u32) -> Result<(), UPSError> {
        self.send_command(&Command::ShutdownRestore { delay, restore })
    }

    pub fn cancel_shutdown(&mut self) -> Result<(), UPSError> {
        self.send_command(&Command::CancelShutdown)
    }

    fn exchange(&mut self, command: &Command) -> Result<String, UPSError> {
        self.send_command(command)?;
        let frame = self.read_frame()?;
        if !frame.is_ascii() {
            return Err(UPSError::malformed(
                &String::from_utf8_lossy(&frame),
                "not ASCII",
            ));
        }
        Ok(frame.iter().map(|&c| c as char).collect())
    }

    fn send_command(&mut self, command: &Command) -> Result<(), UPSError> {
        // Validate before anything touches the wire.
        let message = command.encode()?;

        let transport = self.transport.as_mut().ok_or_else(not_connected)?;

        // Drop any stale partial messages so the answer lines up with this request.
        self.frames.reset();
        match write_message(transport, &message) {
            Ok(()) => {
                log::trace!("SEND {:?}", String::from_utf8_lossy(&message));
                Ok(())
            }
            Err(e) => Err(self.release(e.into())),
        }
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, UPSError> {
        let transport = self.transport.as_mut().ok_or_else(not_connected)?;
        match self.frames.read_frame(transport) {
            Ok(frame) => Ok(frame),
            Err(e) if e.is_recoverable() => Err(e),
            Err(e) => Err(self.release(e)),
        }
    }

    // The transport is of no further use after an I/O failure.
    fn release(&mut self, err: UPSError) -> UPSError {
        log::warn!("Releasing UPS transport after failure: {}", err);
        self.close();
        err
    }
}

fn write_message<T: Transport>(transport: &mut T, message: &[u8]) -> io::Result<()> {
    transport.discard_input()?;
    transport.write_all(message)?;
    transport.flush()
}

fn not_connected() -> UPSError {
    UPSError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "UPS transport is closed",
    ))
}
