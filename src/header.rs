use std::fmt::Display;
use std::fmt::Error;
use std::fmt::Formatter;

use crate::error::Fault;

/// Size of the fixed-layout header at the front of every story image.
pub const HEADER_SIZE: usize = 64;

/// The only version this interpreter executes.
pub const SUPPORTED_VERSION: u8 = 3;

/// The fixed-offset header fields of a story image. All multi-byte fields are
/// big-endian 16-bit words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub release: u16,
    pub serial: String,
    pub base_high_mem: u16,
    pub base_static_mem: u16,
    pub initial_pc: u16,
    pub dictionary: u16,
    pub object_table: u16,
    pub global_variables: u16,
    pub abbrev_table: u16,
    /// File length in bytes (stored divided by 2 for version 3).
    pub file_len: usize,
    pub checksum: u16,
}

fn read_word(bytes: &[u8], offset: usize) -> u16 {
    ((bytes[offset] as u16) << 8) | bytes[offset + 1] as u16
}

impl Header {
    /// Parse and validate the header. Any inconsistency is a load fault;
    /// execution can never begin on a rejected image.
    pub fn parse(bytes: &[u8]) -> Result<Header, Fault> {
        if bytes.len() < HEADER_SIZE {
            return Err(Fault::ImageTooSmall {
                len: bytes.len(),
                need: HEADER_SIZE,
            });
        }

        let version = bytes[0];
        if version != SUPPORTED_VERSION {
            return Err(Fault::UnsupportedVersion(version));
        }

        let header = Header {
            version,
            release: read_word(bytes, 0x02),
            serial: bytes[0x12..0x18].iter().map(|&b| b as char).collect(),
            base_high_mem: read_word(bytes, 0x04),
            initial_pc: read_word(bytes, 0x06),
            dictionary: read_word(bytes, 0x08),
            object_table: read_word(bytes, 0x0A),
            global_variables: read_word(bytes, 0x0C),
            base_static_mem: read_word(bytes, 0x0E),
            abbrev_table: read_word(bytes, 0x18),
            file_len: read_word(bytes, 0x1A) as usize * 2,
            checksum: read_word(bytes, 0x1C),
        };

        if (header.base_static_mem as usize) < HEADER_SIZE {
            return Err(Fault::BadHeader("static memory overlaps the header"));
        }
        if header.base_static_mem as usize > bytes.len() {
            return Err(Fault::BadHeader("static memory base beyond image end"));
        }
        for (addr, what) in [
            (header.initial_pc, "initial pc beyond image end"),
            (header.dictionary, "dictionary beyond image end"),
            (header.object_table, "object table beyond image end"),
            (header.global_variables, "globals beyond image end"),
            (header.abbrev_table, "abbreviation table beyond image end"),
        ] {
            if addr as usize >= bytes.len() {
                return Err(Fault::BadHeader(what));
            }
        }
        // A zero file length is tolerated (very old compilers left it blank);
        // a declared length past the image is not.
        if header.file_len > bytes.len() {
            return Err(Fault::BadHeader("declared file length beyond image end"));
        }

        Ok(header)
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "
Z-code version:           {}
Release number:           {}
Serial number:            {}
Start PC:                 {:#06x}
Dictionary address:       {:#06x}
Object table address:     {:#06x}
Global variables address: {:#06x}
Abbreviations address:    {:#06x}
Size of dynamic memory:   {:#06x}
Size of resident memory:  {:#06x}
File size:                {:#06x}
Checksum:                 {:#06x}
",
            self.version,
            self.release,
            self.serial,
            self.initial_pc,
            self.dictionary,
            self.object_table,
            self.global_variables,
            self.abbrev_table,
            self.base_static_mem,
            self.base_high_mem,
            self.file_len,
            self.checksum,
        )
    }
}
