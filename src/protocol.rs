
use core::fmt;
use core::convert::TryFrom;

use thiserror::Error;

pub const BL_ACK: u8 = 0;
pub const BL_NACK: u8 = 1;

/// Default UART baud rate of the bootloader
pub const BAUD_RATE: usize = 38400;

/// Maximum data bytes carried by a single write memory packet
pub const MAX_CHUNK: usize = 250;

/// Write memory payload bytes that precede the chunk data (address + length)
pub const WRITE_HEADER_LEN: usize = 5;

/// Declared length of a write memory packet carrying `chunk_len` data bytes
pub fn write_mem_len(chunk_len: usize) -> u8 {
    (chunk_len + WRITE_HEADER_LEN) as u8
}

/// Maximum bytes returned by a single read memory request
pub const MAX_READ: usize = 256;

/// Number of addressable flash pages
pub const PAGE_COUNT: u16 = 256;

/// Maximum pages accepted by one write protect request
pub const MAX_PROTECT_PAGES: usize = 32;

/// Start page the bootloader interprets as a mass erase
pub const MASS_ERASE_PAGE: u8 = 0xFF;

/// Size of the trailing packet checksum
pub const CRC_LEN: usize = 4;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Command {
    /// Gets the version and the allowed commands supported by the bootloader
    GetCmd = 0x00,

    /// Gets the bootloader version string
    GetVersion = 0x01,

    /// Gets the chip ID
    GetId = 0x02,

    /// Gets the flash read protection level
    GetProtectLevel = 0x03,

    /// Reads up to 256 bytes of memory starting from an address specified by the application.
    ReadMem = 0x11,

    /// Jumps to user application code located in the internal Flash memory or in the SRAM.
    JumpToApp = 0x21,

    /// Writes up to 250 bytes to the RAM or Flash memory starting from an address
    /// specified by the application.
    WriteMem = 0x31,

    /// Erases from one to all the Flash memory pages.
    EraseMem = 0x43,

    /// Erases Flash memory pages using two byte addressing mode.
    EraseMemExt = 0x44,

    /// Product specific command with a short payload
    Special = 0x50,

    /// Product specific command with an extended payload
    SpecialExt = 0x51,

    /// Enables the write protection for some pages.
    WriteProtect = 0x63,

    /// Disables the write protection for all Flash memory pages
    WriteUnprotect = 0x73,

    /// Enables the read protection
    ReadProtect = 0x82,

    /// Disables the read protection.
    ReadUnprotect = 0x92,

    /// Reloads the option bytes, resetting the device
    ReloadOptBytes = 0xA1,
}

/// Command code and the declared length of its fixed size form.
///
/// `len` is `None` for commands whose payload size is chosen per request.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CommandDescriptor {
    pub code: u8,
    pub len: Option<u8>,
}

impl Command {
    pub const ALL: [Command; 16] = [
        Command::GetCmd,
        Command::GetVersion,
        Command::GetId,
        Command::GetProtectLevel,
        Command::ReadMem,
        Command::JumpToApp,
        Command::WriteMem,
        Command::EraseMem,
        Command::EraseMemExt,
        Command::Special,
        Command::SpecialExt,
        Command::WriteProtect,
        Command::WriteUnprotect,
        Command::ReadProtect,
        Command::ReadUnprotect,
        Command::ReloadOptBytes,
    ];

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Look up a command by wire code
    pub fn from_code(code: u8) -> Option<Command> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    pub fn descriptor(&self) -> CommandDescriptor {
        use Command::*;

        let len = match self {
            GetCmd | GetVersion | GetId | GetProtectLevel => Some(0),
            JumpToApp | WriteUnprotect | ReadUnprotect | ReloadOptBytes => Some(0),
            ReadMem => Some(5),
            EraseMem => Some(2),
            ReadProtect => Some(1),
            WriteMem | EraseMemExt | Special | SpecialExt | WriteProtect => None,
        };

        CommandDescriptor { code: self.code(), len }
    }

    /// Protocol name of the command, e.g. `BL_GET_CMD`
    pub fn name(&self) -> &'static str {
        use Command::*;

        match self {
            GetCmd => "BL_GET_CMD",
            GetVersion => "BL_GET_VERSION",
            GetId => "BL_GET_ID",
            GetProtectLevel => "BL_GET_PROTECT_LEVEL",
            ReadMem => "BL_READ_MEM",
            JumpToApp => "BL_JUMP_TO_APP",
            WriteMem => "BL_WRITE_MEM",
            EraseMem => "BL_ERASE_MEM",
            EraseMemExt => "BL_ERASE_MEM_EXT",
            Special => "BL_SPECIAL",
            SpecialExt => "BL_SPECIAL_EXT",
            WriteProtect => "BL_WRITE_PROTECT",
            WriteUnprotect => "BL_WRITE_UNPROTECT",
            ReadProtect => "BL_READ_PROTECT",
            ReadUnprotect => "BL_READ_UNPROTECT",
            ReloadOptBytes => "BL_RELOAD_OPT_BYTES",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Caller side validation failures, raised before anything reaches the wire
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum Invalid {
    #[error("page range {start}+{count} exceeds {} pages", PAGE_COUNT)]
    PageRange { start: u32, count: u32 },

    #[error("page {} is reserved for mass erase", MASS_ERASE_PAGE)]
    MassErasePage,

    #[error("page number {0} out of range (0 ~ 255)")]
    PageNumber(u32),

    #[error("write protect page count {0} out of range (1 ~ {})", MAX_PROTECT_PAGES)]
    PageCount(usize),

    #[error("protection level {0} out of range (0 ~ 2)")]
    ProtectionLevel(u32),

    #[error("read length {0} out of range (1 ~ {})", MAX_READ)]
    ReadLength(usize),

    #[error("chunk length {0} exceeds {}", MAX_CHUNK)]
    ChunkLength(usize),

    #[error("payload length {0} exceeds 255")]
    PayloadLength(usize),

    #[error("{len} bytes at 0x{address:08x} overflow the address space")]
    AddressOverflow { address: u32, len: usize },
}

/// Contiguous block of flash pages for erase operations
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PageRange {
    start: u8,
    count: u8,
}

impl PageRange {
    /// Validate a page range, `start + count` may not pass the last page.
    ///
    /// A start of `MASS_ERASE_PAGE` erases the whole flash, use `mass_erase` for that.
    pub fn new(start: u32, count: u32) -> Result<Self, Invalid> {
        if start > 0xFF || count > 0xFF || start + count > PAGE_COUNT as u32 {
            return Err(Invalid::PageRange { start, count });
        }
        if start == MASS_ERASE_PAGE as u32 {
            return Err(Invalid::MassErasePage);
        }

        Ok(Self {
            start: start as u8,
            count: count as u8,
        })
    }

    /// Range that requests a whole flash erase
    pub fn mass_erase() -> Self {
        Self {
            start: MASS_ERASE_PAGE,
            count: 0,
        }
    }

    pub fn start(&self) -> u8 {
        self.start
    }

    pub fn count(&self) -> u8 {
        self.count
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::mass_erase() {
            return write!(f, "all pages");
        }
        write!(f, "pages {}..{}", self.start, self.start as u16 + self.count as u16)
    }
}

/// Page numbers for a write protect request
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PageList(Vec<u8>);

impl PageList {
    pub fn new(pages: &[u32]) -> Result<Self, Invalid> {
        if pages.is_empty() || pages.len() > MAX_PROTECT_PAGES {
            return Err(Invalid::PageCount(pages.len()));
        }

        let mut list = Vec::with_capacity(pages.len());
        for p in pages {
            let p = u8::try_from(*p).map_err(|_| Invalid::PageNumber(*p))?;
            list.push(p);
        }

        Ok(Self(list))
    }

    pub fn pages(&self) -> &[u8] {
        &self.0
    }
}

/// Flash read protection level
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ProtectionLevel {
    Level0 = 0,
    Level1 = 1,
    Level2 = 2,
}

impl TryFrom<u32> for ProtectionLevel {
    type Error = Invalid;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ProtectionLevel::Level0),
            1 => Ok(ProtectionLevel::Level1),
            2 => Ok(ProtectionLevel::Level2),
            _ => Err(Invalid::ProtectionLevel(v)),
        }
    }
}

impl fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Level {}", *self as u8)
    }
}

/// Protection level as reported by the device option byte
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ProtectionStatus {
    Level(ProtectionLevel),
    Unrecognized(u8),
}

impl From<u8> for ProtectionStatus {
    fn from(v: u8) -> Self {
        // RDPRT bits: 0b00 level 0, 0b01 level 1, 0b11 level 2
        match v {
            0 => ProtectionStatus::Level(ProtectionLevel::Level0),
            1 => ProtectionStatus::Level(ProtectionLevel::Level1),
            3 => ProtectionStatus::Level(ProtectionLevel::Level2),
            other => ProtectionStatus::Unrecognized(other),
        }
    }
}

impl fmt::Display for ProtectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionStatus::Level(l) => write!(f, "Protection {} is enabled", l),
            ProtectionStatus::Unrecognized(v) => {
                write!(f, "Unrecognized protection level value 0x{:02x}", v)
            }
        }
    }
}

/// Chip identifier decoded from the DBGMCU IDCODE register
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ChipId {
    pub revision: u16,
    pub device: u16,
}

impl From<u32> for ChipId {
    fn from(v: u32) -> Self {
        Self {
            revision: (v >> 16) as u16,
            device: (v & 0x0FFF) as u16,
        }
    }
}

impl ChipId {
    /// Decode a big-endian identifier of up to four bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.is_empty() || data.len() > 4 {
            return None;
        }

        let v = data.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
        Some(Self::from(v))
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "REV ID: 0x{:04x} DEV ID: 0x{:03x}", self.revision, self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes() {
        assert_eq!(Command::GetCmd.code(), 0x00);
        assert_eq!(Command::WriteMem.code(), 0x31);
        assert_eq!(Command::ReloadOptBytes.code(), 0xA1);

        for c in Command::ALL.iter() {
            assert_eq!(Command::from_code(c.code()), Some(*c));
        }
        assert_eq!(Command::from_code(0x7F), None);
    }

    #[test]
    fn fixed_descriptors() {
        assert_eq!(Command::ReadMem.descriptor(), CommandDescriptor { code: 0x11, len: Some(5) });
        assert_eq!(Command::EraseMem.descriptor().len, Some(2));
        assert_eq!(Command::ReadProtect.descriptor().len, Some(1));
        assert_eq!(Command::GetId.descriptor().len, Some(0));
        assert_eq!(Command::WriteMem.descriptor().len, None);
        assert_eq!(Command::WriteProtect.descriptor().len, None);
    }

    #[test]
    fn page_range_bounds() {
        assert!(PageRange::new(254, 2).is_ok());
        assert!(PageRange::new(0, 255).is_ok());
        assert_eq!(PageRange::new(255, 1), Err(Invalid::MassErasePage));
        assert_eq!(PageRange::new(255, 0), Err(Invalid::MassErasePage));

        assert_eq!(
            PageRange::new(255, 2),
            Err(Invalid::PageRange { start: 255, count: 2 })
        );
        assert!(PageRange::new(256, 0).is_err());
        assert!(PageRange::new(0, 256).is_err());
    }

    #[test]
    fn page_list_bounds() {
        assert!(PageList::new(&[]).is_err());
        assert_eq!(PageList::new(&[1, 2, 255]).unwrap().pages(), &[1, 2, 255]);
        assert_eq!(PageList::new(&[1, 256]), Err(Invalid::PageNumber(256)));

        let many: Vec<u32> = (0..33).collect();
        assert_eq!(PageList::new(&many), Err(Invalid::PageCount(33)));
        assert!(PageList::new(&many[..32]).is_ok());
    }

    #[test]
    fn protection_levels() {
        assert_eq!(ProtectionLevel::try_from(2), Ok(ProtectionLevel::Level2));
        assert_eq!(ProtectionLevel::try_from(3), Err(Invalid::ProtectionLevel(3)));

        assert_eq!(ProtectionStatus::from(0), ProtectionStatus::Level(ProtectionLevel::Level0));
        assert_eq!(ProtectionStatus::from(1), ProtectionStatus::Level(ProtectionLevel::Level1));
        assert_eq!(ProtectionStatus::from(3), ProtectionStatus::Level(ProtectionLevel::Level2));
        assert_eq!(ProtectionStatus::from(2), ProtectionStatus::Unrecognized(2));
    }

    #[test]
    fn chip_id_decoding() {
        let id = ChipId::from(0x1234_0ABC);
        assert_eq!(id.revision, 0x1234);
        assert_eq!(id.device, 0x0ABC);

        let id = ChipId::from_bytes(&[0x12, 0x34, 0x0A, 0xBC]).unwrap();
        assert_eq!(id, ChipId { revision: 0x1234, device: 0x0ABC });

        // Upper nibble of the low half is not part of the device id
        assert_eq!(ChipId::from(0x1000_F422).device, 0x422);

        assert_eq!(ChipId::from_bytes(&[]), None);
        assert_eq!(ChipId::from_bytes(&[0; 5]), None);
    }
}
