//! CM4 Serial Bootloader.
//!
//! Host side driver for a CRC framed UART bootloader. Commands are sent as
//! `[code][len][payload][crc32]` packets and answered with an ACK/NACK byte
//! followed by a length prefixed reply.

use core::marker::PhantomData;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod commands;
pub mod crc;
pub mod dispatch;
pub mod packet;
pub mod protocol;
pub mod transfer;

pub use crc::{compute_checksum, Checksum};
pub use dispatch::{Action, Dispatcher, Outcome, Prompt};
pub use packet::{Packet, PacketBuilder};
pub use protocol::*;
pub use transfer::{Chunk, WriteJob};

/// Byte oriented serial transport
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {}

impl<T, E> SerialPort<E> for T where T: Write<u8, Error = E> + Read<u8, Error = E> {}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    /// Bootloader is accepting commands
    Connected,
    /// Device has jumped to the application, the session is over
    Released,
}

/// Why a bulk write chunk did not complete
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Rejection {
    #[error("nack")]
    Nack,
    #[error("write failed")]
    Failed,
    #[error("response timeout")]
    Timeout,
    #[error("invalid ack value 0x{0:02x}")]
    InvalidAck(u8),
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
    #[error("serial error: {0}")]
    Serial(String),
}

impl Rejection {
    /// Classify the error returned while writing a chunk
    pub(crate) fn from_error<E: core::fmt::Debug>(e: Error<E>) -> Self {
        match e {
            Error::Nack => Rejection::Nack,
            Error::OperationFailed(_) => Rejection::Failed,
            Error::ResponseTimeout => Rejection::Timeout,
            Error::InvalidAck(v) => Rejection::InvalidAck(v),
            Error::InvalidResponse(r) => Rejection::InvalidResponse(r),
            Error::Serial(e) => Rejection::Serial(format!("{:?}", e)),
            other => Rejection::Serial(other.to_string()),
        }
    }
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),

    #[error("bootloader returned NACK")]
    Nack,

    #[error("invalid ack value 0x{0:02x}")]
    InvalidAck(u8),

    #[error("timeout awaiting bootloader response")]
    ResponseTimeout,

    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),

    #[error("{0} failed")]
    OperationFailed(Command),

    #[error("invalid argument: {0}")]
    Invalid(Invalid),

    #[error("chunk {index} at 0x{address:08x} rejected: {reason}")]
    Chunk {
        index: usize,
        address: u32,
        reason: Rejection,
    },

    #[error("device has left the bootloader")]
    SessionEnded,

    #[error("invalid input: {0}")]
    Input(String),
}

impl<SerialError> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout to wait for each bootloader response byte
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "5000"))]
    pub response_timeout_ms: u32,

    /// Period to poll for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Packet checksum algorithm (mpeg2 or word)
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "mpeg2"))]
    pub checksum: Checksum,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5000,
            poll_delay_ms: 1,
            checksum: Checksum::Mpeg2,
        }
    }
}

pub struct Programmer<P, D, E> {
    state: State,
    options: Options,
    port: P,
    delay: D,
    _err: PhantomData<E>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            state: State::Connected,
            options,
            port,
            delay,
            _err: PhantomData,
        }
    }

    /// Fetch the programmer state
    pub fn state(&self) -> State {
        self.state
    }

    /// Access the underlying transport
    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    /// Start a packet for `command` sealed with the configured checksum
    pub(crate) fn packet(&self, command: Command, len: u8) -> PacketBuilder {
        PacketBuilder::command(command, len, self.options.checksum)
    }

    pub(crate) fn ensure_connected(&self) -> Result<(), Error<E>> {
        match self.state {
            State::Connected => Ok(()),
            State::Released => Err(Error::SessionEnded),
        }
    }

    pub(crate) fn release(&mut self) {
        debug!("Session released");
        self.state = State::Released;
    }

    /// Write a complete packet to the port
    pub fn write_packet(&mut self, packet: &Packet) -> Result<(), Error<E>> {
        trace!("Write: {:02x?}", packet.as_bytes());

        for b in packet.as_bytes() {
            block!(self.port.write(*b))?;
        }
        block!(self.port.flush())?;

        Ok(())
    }

    /// Send a packet and await the ACK/NACK byte
    pub(crate) fn transact(&mut self, packet: &Packet) -> Result<(), Error<E>> {
        debug!("Sending command 0x{:02x} ({} bytes)", packet.code(), packet.len());

        self.write_packet(packet)?;
        self.await_ack()
    }

    fn await_ack(&mut self) -> Result<(), Error<E>> {
        match self.read_byte()? {
            BL_ACK => {
                debug!("Received bootloader ack");
                Ok(())
            }
            BL_NACK => {
                debug!("Received bootloader nack");
                Err(Error::Nack)
            }
            v => {
                debug!("Received unexpected value: 0x{:x}", v);
                Err(Error::InvalidAck(v))
            }
        }
    }

    /// Read a single byte, polling until the response timeout elapses
    pub(crate) fn read_byte(&mut self) -> Result<u8, Error<E>> {
        let mut t: u32 = 0;

        loop {
            // Attempt to read from serial port
            match self.port.read() {
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(e.into()),
                Ok(v) => return Ok(v),
            };

            // Wait for delay period
            self.delay.delay_ms(self.options.poll_delay_ms);
            t = t.saturating_add(self.options.poll_delay_ms.max(1));

            if t >= self.options.response_timeout_ms {
                error!("Receive timeout");
                return Err(Error::ResponseTimeout);
            }
        }
    }

    pub(crate) fn read_exact(&mut self, data: &mut [u8]) -> Result<(), Error<E>> {
        for d in data.iter_mut() {
            *d = self.read_byte()?;
        }
        Ok(())
    }

    /// Read a length prefixed reply
    pub(crate) fn read_reply(&mut self) -> Result<Vec<u8>, Error<E>> {
        let len = self.read_byte()? as usize;

        let mut reply = vec![0u8; len];
        self.read_exact(&mut reply)?;
        trace!("Reply: {:02x?}", reply);

        Ok(reply)
    }

    /// Read the length field of a reply that carries no data
    pub(crate) fn read_empty_reply(&mut self, command: Command) -> Result<(), Error<E>> {
        let len = self.read_byte()?;
        if len != 0 {
            warn!("{} reply declared {} unexpected bytes", command, len);
        }
        Ok(())
    }

    /// Read a length prefixed success flag, any non-zero value is success
    pub(crate) fn read_status(&mut self, command: Command) -> Result<(), Error<E>> {
        let reply = self.read_reply()?;

        if reply.iter().any(|b| *b != 0) {
            Ok(())
        } else {
            Err(Error::OperationFailed(command))
        }
    }
}
