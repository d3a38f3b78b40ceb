use std::{
    io::{self, Read, Write},
    time::Duration,
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, SerialPort, StopBits};

use crate::error::UPSError;

// Megatec units talk 2400 8N1 out of the box.
const DEVICE: &str = "/dev/ttyUSB0";
const BAUD_RATE: u32 = 2400;
const DATA_BITS: u8 = 8;
const STOP_BITS: u8 = 1;
const TIMEOUT_MS: u64 = 1000; // Inter-character read timeout.

/// The byte stream the client talks over.
pub trait Transport: Read + Write {
    /// Drops anything the UPS sent that nobody asked for.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> serialport::Parity {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PortSettings {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub timeout_ms: u64,
}

impl Default for PortSettings {
    fn default() -> Self {
        PortSettings {
            device: DEVICE.to_string(),
            baud_rate: BAUD_RATE,
            data_bits: DATA_BITS,
            stop_bits: STOP_BITS,
            parity: Parity::None,
            timeout_ms: TIMEOUT_MS,
        }
    }
}

impl PortSettings {
    fn data_bits(&self) -> Result<DataBits, UPSError> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            n => Err(UPSError::invalid(
                "data bits",
                format!("{} is not one of 5, 6, 7 or 8", n),
            )),
        }
    }

    fn stop_bits(&self) -> Result<StopBits, UPSError> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            n => Err(UPSError::invalid(
                "stop bits",
                format!("{} is not 1 or 2", n),
            )),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Opens and configures the serial port.
    pub fn open(&self) -> Result<Box<dyn SerialPort>, UPSError> {
        let port = serialport::new(&self.device, self.baud_rate)
            .data_bits(self.data_bits()?)
            .stop_bits(self.stop_bits()?)
            .parity(self.parity.into())
            .timeout(self.timeout())
            .open()?;

        log::debug!(
            "Opened {} at {} baud ({} data, {} stop, {:?} parity).",
            self.device,
            self.baud_rate,
            self.data_bits,
            self.stop_bits,
            self.parity
        );
        Ok(port)
    }
}
