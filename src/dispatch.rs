//! Operator command dispatch.
//!
//! Menu identifiers (index or symbolic name) resolve to a closed set of
//! [`Action`]s. Parameters are collected through a [`Prompt`] so the
//! dispatcher stays independent of the front-end.

use core::convert::TryFrom;
use core::fmt;

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::*;
use crate::transfer::Chunk;
use crate::{Error, Programmer, SerialPort};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Action {
    GetCmd,
    GetVersion,
    GetId,
    GetProtectLevel,
    ReadMem,
    JumpToApp,
    WriteMem,
    EraseMem,
    WriteProtect,
    WriteUnprotect,
    ReadProtect,
    ReadUnprotect,
    ReloadOptBytes,
    Exit,
    /// Unrecognised identifier
    Ignore,
}

/// Menu entries in display order, the index is the numeric identifier
pub const MENU: [(Action, &str); 14] = [
    (Action::GetCmd, "BL_GET_CMD"),
    (Action::GetVersion, "BL_GET_VERSION"),
    (Action::GetId, "BL_GET_ID"),
    (Action::GetProtectLevel, "BL_GET_PROTECT_LEVEL"),
    (Action::ReadMem, "BL_READ_MEM"),
    (Action::JumpToApp, "BL_JUMP_TO_APP"),
    (Action::WriteMem, "BL_WRITE_MEM"),
    (Action::EraseMem, "BL_ERASE_MEM"),
    (Action::WriteProtect, "BL_WRITE_PROTECT"),
    (Action::WriteUnprotect, "BL_WRITE_UNPROTECT"),
    (Action::ReadProtect, "BL_READ_PROTECT"),
    (Action::ReadUnprotect, "BL_READ_UNPROTECT"),
    (Action::ReloadOptBytes, "BL_RELOAD_OPT_BYTES"),
    (Action::Exit, "Exit"),
];

impl Action {
    /// Resolve a menu index or command name
    pub fn resolve(id: &str) -> Action {
        let id = id.trim();

        if let Ok(n) = id.parse::<usize>() {
            return MENU.get(n).map(|(a, _)| *a).unwrap_or(Action::Ignore);
        }

        let name = id.to_ascii_uppercase().replace('-', "_");
        let name = name.strip_prefix("BL_").unwrap_or(name.as_str());

        match name {
            "EXIT" | "QUIT" => return Action::Exit,
            "" => return Action::Ignore,
            _ => (),
        }

        MENU.iter()
            .find(|(_, n)| n.strip_prefix("BL_") == Some(name))
            .map(|(a, _)| *a)
            .unwrap_or(Action::Ignore)
    }

    pub fn name(&self) -> &'static str {
        MENU.iter()
            .find(|(a, _)| a == self)
            .map(|(_, n)| *n)
            .unwrap_or("Ignore")
    }
}

/// Operator supplied command parameters
pub trait Prompt {
    /// Memory address for read and write commands
    fn address(&mut self) -> Result<u32, String>;

    /// Number of bytes to read
    fn length(&mut self) -> Result<u32, String>;

    /// First page and number of pages to erase
    fn page_range(&mut self) -> Result<(u32, u32), String>;

    /// Pages to write protect
    fn pages(&mut self) -> Result<Vec<u32>, String>;

    fn protection_level(&mut self) -> Result<u32, String>;

    /// Contents to write to memory
    fn file(&mut self) -> Result<Vec<u8>, String>;

    /// Called after each chunk of a memory write is accepted
    fn chunk_sent(&mut self, _chunk: &Chunk, _total: usize) {}
}

/// Result of a dispatched command
#[derive(Clone, PartialEq, Debug)]
pub enum Outcome {
    Commands(Vec<u8>),
    Version(String),
    ChipId(ChipId),
    Protection(ProtectionStatus),
    Memory { address: u32, data: Vec<u8> },
    Written { address: u32, len: usize },
    Erased(PageRange),
    /// Command completed with no data
    Done(Command),
    /// Device left the bootloader, the session is over
    Jumped,
    Exit,
    Ignored,
}

impl Outcome {
    /// Whether the interactive session should stop
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Jumped | Outcome::Exit)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Commands(codes) => {
                write!(f, "Supported commands:")?;
                for c in codes {
                    match Command::from_code(*c) {
                        Some(cmd) => write!(f, " 0x{:02x} ({})", c, cmd)?,
                        None => write!(f, " 0x{:02x}", c)?,
                    }
                }
                Ok(())
            }
            Outcome::Version(v) => write!(f, "Bootloader version: {}", v),
            Outcome::ChipId(id) => write!(f, "{}", id),
            Outcome::Protection(p) => write!(f, "{}", p),
            Outcome::Memory { address, data } => {
                write!(f, "Read {} bytes at 0x{:08x}: {:02x?}", data.len(), address, data)
            }
            Outcome::Written { address, len } => {
                write!(f, "Wrote {} bytes at 0x{:08x}", len, address)
            }
            Outcome::Erased(r) => write!(f, "Erased {}", r),
            Outcome::Done(c) => write!(f, "{} success", c),
            Outcome::Jumped => write!(f, "Jumped to application"),
            Outcome::Exit => write!(f, "Exiting"),
            Outcome::Ignored => Ok(()),
        }
    }
}

/// Routes operator actions to the matching executor
pub struct Dispatcher<'a, P, D, E> {
    programmer: &'a mut Programmer<P, D, E>,
}

impl<'a, P, D, E> Dispatcher<'a, P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    pub fn new(programmer: &'a mut Programmer<P, D, E>) -> Self {
        Self { programmer }
    }

    /// Resolve and execute a single identifier
    pub fn dispatch<Q: Prompt>(&mut self, id: &str, prompt: &mut Q) -> Result<Outcome, Error<E>> {
        self.execute(Action::resolve(id), prompt)
    }

    pub fn execute<Q: Prompt>(
        &mut self,
        action: Action,
        prompt: &mut Q,
    ) -> Result<Outcome, Error<E>> {
        debug!("Command --> {}", action.name());

        let p = &mut *self.programmer;

        let outcome = match action {
            Action::GetCmd => Outcome::Commands(p.get_commands()?),
            Action::GetVersion => Outcome::Version(p.get_version()?),
            Action::GetId => Outcome::ChipId(p.chip_id()?),
            Action::GetProtectLevel => Outcome::Protection(p.protection_level()?),
            Action::ReadMem => {
                let address = prompt.address().map_err(Error::Input)?;
                let length = prompt.length().map_err(Error::Input)? as usize;
                if length == 0 || length > MAX_READ {
                    return Err(Error::Invalid(Invalid::ReadLength(length)));
                }

                let mut data = vec![0u8; length];
                p.read_mem(address, &mut data)?;
                Outcome::Memory { address, data }
            }
            Action::JumpToApp => {
                p.jump_to_app()?;
                Outcome::Jumped
            }
            Action::WriteMem => {
                let data = prompt.file().map_err(Error::Input)?;
                let address = prompt.address().map_err(Error::Input)?;

                let total = data.len();
                let len = p.send_file_with(address, &data, |c| prompt.chunk_sent(c, total))?;
                Outcome::Written { address, len }
            }
            Action::EraseMem => {
                let (start, count) = prompt.page_range().map_err(Error::Input)?;
                let range = PageRange::new(start, count).map_err(Error::Invalid)?;

                p.erase(range)?;
                Outcome::Erased(range)
            }
            Action::WriteProtect => {
                let pages = prompt.pages().map_err(Error::Input)?;
                let pages = PageList::new(&pages).map_err(Error::Invalid)?;

                p.write_protect(&pages)?;
                Outcome::Done(Command::WriteProtect)
            }
            Action::WriteUnprotect => {
                p.write_unprotect()?;
                Outcome::Done(Command::WriteUnprotect)
            }
            Action::ReadProtect => {
                let level = prompt.protection_level().map_err(Error::Input)?;
                let level = ProtectionLevel::try_from(level).map_err(Error::Invalid)?;

                p.read_protect(level)?;
                Outcome::Done(Command::ReadProtect)
            }
            Action::ReadUnprotect => {
                p.read_unprotect()?;
                Outcome::Done(Command::ReadUnprotect)
            }
            Action::ReloadOptBytes => {
                p.reload_option_bytes()?;
                Outcome::Done(Command::ReloadOptBytes)
            }
            Action::Exit => Outcome::Exit,
            Action::Ignore => Outcome::Ignored,
        };

        Ok(outcome)
    }
}
