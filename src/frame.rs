use std::io::{self, Read};

use crate::{command::TERMINATOR, error::UPSError};

// Responses are well under this; anything longer is line noise.
const MAX_FRAME_LENGTH: usize = 256;
const CHUNK_SIZE: usize = 64;

/// Accumulates bytes from the transport into terminator delimited frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    // Everything before this index is known to hold no terminator.
    scanned: usize,
}

impl FrameReader {
    pub fn new() -> FrameReader {
        FrameReader::default()
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pops the next complete frame, without its terminator.
    pub fn take_frame(&mut self) -> Option<Vec<u8>> {
        let found = self.buffer[self.scanned..]
            .iter()
            .position(|&c| c == TERMINATOR);
        match found {
            Some(offset) => {
                let end = self.scanned + offset;
                let mut frame: Vec<u8> = self.buffer.drain(..=end).collect();
                frame.pop();
                self.scanned = 0;
                Some(frame)
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    /// Reads from `source` until a full frame is buffered.
    ///
    /// The source's own read timeout bounds the wait for each delivery. A timeout
    /// or failure drops whatever was buffered so the next command starts clean.
    pub fn read_frame<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<Vec<u8>, UPSError> {
        loop {
            if let Some(frame) = self.take_frame() {
                log::trace!("READ {:?}", String::from_utf8_lossy(&frame));
                return Ok(frame);
            }

            if self.buffer.len() > MAX_FRAME_LENGTH {
                let partial = String::from_utf8_lossy(&self.buffer).into_owned();
                self.reset();
                return Err(UPSError::malformed(
                    &partial,
                    format!("no terminator within {} bytes", MAX_FRAME_LENGTH),
                ));
            }

            let mut chunk: [u8; CHUNK_SIZE] = [0; CHUNK_SIZE];
            match source.read(&mut chunk) {
                Ok(0) => {
                    self.reset();
                    return Err(UPSError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream closed before terminator",
                    )));
                }
                Ok(n) => self.push(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    if !self.buffer.is_empty() {
                        log::debug!(
                            "Dropping partial frame {:?}.",
                            String::from_utf8_lossy(&self.buffer)
                        );
                    }
                    self.reset();
                    return Err(UPSError::Timeout);
                }
                Err(e) => {
                    self.reset();
                    return Err(e.into());
                }
            }
        }
    }
}
