//! Bootloader command executors.
//!
//! Each executor builds and sends one packet then decodes the reply. A NACK
//! returns `Error::Nack` straight after the ack byte, without further reads.

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::*;
use crate::{Error, Programmer, SerialPort};

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Send a command with no payload and ack it
    fn simple(&mut self, command: Command) -> Result<(), Error<E>> {
        self.ensure_connected()?;

        let p = self.packet(command, 0).finalize();
        self.transact(&p)
    }

    /// Fetch the command codes supported by the bootloader
    pub fn get_commands(&mut self) -> Result<Vec<u8>, Error<E>> {
        self.simple(Command::GetCmd)?;
        self.read_reply()
    }

    /// Fetch the bootloader version string
    pub fn get_version(&mut self) -> Result<String, Error<E>> {
        self.simple(Command::GetVersion)?;
        let reply = self.read_reply()?;

        if !reply.is_ascii() {
            return Err(Error::InvalidResponse("version is not ASCII"));
        }

        Ok(reply.iter().map(|c| *c as char).collect())
    }

    /// Fetch the chip ID
    pub fn chip_id(&mut self) -> Result<ChipId, Error<E>> {
        self.simple(Command::GetId)?;
        let reply = self.read_reply()?;

        ChipId::from_bytes(&reply).ok_or(Error::InvalidResponse("chip id length"))
    }

    /// Fetch the flash read protection level
    pub fn protection_level(&mut self) -> Result<ProtectionStatus, Error<E>> {
        self.simple(Command::GetProtectLevel)?;
        let reply = self.read_reply()?;

        match reply.as_slice() {
            [v] => {
                let status = ProtectionStatus::from(*v);
                if let ProtectionStatus::Unrecognized(v) = status {
                    warn!("Unrecognized protection level value 0x{:02x}", v);
                }
                Ok(status)
            }
            _ => Err(Error::InvalidResponse("protection level length")),
        }
    }

    /// Read `data.len()` (1 ~ 256) bytes of memory starting at `address`
    pub fn read_mem(&mut self, address: u32, data: &mut [u8]) -> Result<(), Error<E>> {
        if data.is_empty() || data.len() > MAX_READ {
            return Err(Error::Invalid(Invalid::ReadLength(data.len())));
        }
        self.ensure_connected()?;

        // Length is sent as n - 1 so 256 fits in a byte
        let p = self
            .packet(Command::ReadMem, 5)
            .u32(address)
            .u8((data.len() - 1) as u8)
            .finalize();
        self.transact(&p)?;

        // Length field doubles as the success flag
        if self.read_byte()? == 0 {
            return Err(Error::OperationFailed(Command::ReadMem));
        }

        self.read_exact(data)
    }

    /// Jump to the application, ending the bootloader session
    pub fn jump_to_app(&mut self) -> Result<(), Error<E>> {
        self.simple(Command::JumpToApp)?;

        // The device is leaving the bootloader once the ack is sent
        self.release();

        match self.read_empty_reply(Command::JumpToApp) {
            Err(Error::ResponseTimeout) => {
                warn!("No reply length after jump, device already left the bootloader");
                Ok(())
            }
            res => res,
        }
    }

    /// Write a single chunk of up to 250 bytes at `address`
    pub fn write_mem(&mut self, address: u32, chunk: &[u8]) -> Result<(), Error<E>> {
        if chunk.len() > MAX_CHUNK {
            return Err(Error::Invalid(Invalid::ChunkLength(chunk.len())));
        }
        self.ensure_connected()?;

        let p = self
            .packet(Command::WriteMem, write_mem_len(chunk.len()))
            .u32(address)
            .u8(chunk.len() as u8)
            .bytes(chunk)
            .finalize();
        self.transact(&p)?;

        self.read_status(Command::WriteMem)
    }

    /// Erase a range of flash pages
    pub fn erase(&mut self, range: PageRange) -> Result<(), Error<E>> {
        self.ensure_connected()?;

        let p = self
            .packet(Command::EraseMem, 2)
            .u8(range.start())
            .u8(range.count())
            .finalize();
        self.transact(&p)?;

        self.read_status(Command::EraseMem)
    }

    /// Erase the whole flash
    pub fn mass_erase(&mut self) -> Result<(), Error<E>> {
        self.erase(PageRange::mass_erase())
    }

    /// Enable write protection for the listed pages
    pub fn write_protect(&mut self, pages: &PageList) -> Result<(), Error<E>> {
        self.ensure_connected()?;

        let pages = pages.pages();
        let p = self
            .packet(Command::WriteProtect, (pages.len() + 1) as u8)
            .u8(pages.len() as u8)
            .bytes(pages)
            .finalize();
        self.transact(&p)?;

        self.read_status(Command::WriteProtect)
    }

    /// Disable write protection for all pages
    pub fn write_unprotect(&mut self) -> Result<(), Error<E>> {
        self.simple(Command::WriteUnprotect)?;
        self.read_empty_reply(Command::WriteUnprotect)
    }

    /// Set the flash read protection level
    pub fn read_protect(&mut self, level: ProtectionLevel) -> Result<(), Error<E>> {
        self.ensure_connected()?;

        let p = self.packet(Command::ReadProtect, 1).u8(level as u8).finalize();
        self.transact(&p)?;

        self.read_status(Command::ReadProtect)
    }

    /// Disable read protection
    pub fn read_unprotect(&mut self) -> Result<(), Error<E>> {
        self.simple(Command::ReadUnprotect)?;
        self.read_empty_reply(Command::ReadUnprotect)
    }

    /// Reload the option bytes
    pub fn reload_option_bytes(&mut self) -> Result<(), Error<E>> {
        self.simple(Command::ReloadOptBytes)?;
        self.read_empty_reply(Command::ReloadOptBytes)
    }

    /// Send a product specific command, returning the raw reply
    pub fn special(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error<E>> {
        self.opaque(Command::Special, payload)
    }

    /// Send a product specific command with an extended payload
    pub fn special_ext(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error<E>> {
        self.opaque(Command::SpecialExt, payload)
    }

    fn opaque(&mut self, command: Command, payload: &[u8]) -> Result<Vec<u8>, Error<E>> {
        if payload.len() > u8::MAX as usize {
            return Err(Error::Invalid(Invalid::PayloadLength(payload.len())));
        }
        self.ensure_connected()?;

        let p = self
            .packet(command, payload.len() as u8)
            .bytes(payload)
            .finalize();
        self.transact(&p)?;

        self.read_reply()
    }
}
