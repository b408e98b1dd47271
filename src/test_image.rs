//! Synthetic story images for unit tests. Real story files are copyrighted,
//! so tests assemble tiny images by hand with a known memory layout.

use crate::text::encode_word;

/// Builds a version-3 image with a fixed layout:
/// abbreviations at 0x40, object table at 0x100, globals at 0x500,
/// dictionary at 0x700 and code from 0x800. The static-memory base is
/// placed at the end of the image so tests can patch anywhere.
pub struct ImageBuilder {
    bytes: Vec<u8>,
    code_ptr: usize,
}

impl ImageBuilder {
    pub const SIZE: usize = 0x2000;
    pub const ABBREV: usize = 0x40;
    pub const OBJECTS: usize = 0x100;
    pub const GLOBALS: usize = 0x500;
    pub const DICTIONARY: usize = 0x700;
    pub const CODE_START: usize = 0x800;

    pub fn new() -> Self {
        let mut bytes = vec![0u8; Self::SIZE];
        bytes[0x00] = 3;
        put_word(&mut bytes, 0x04, Self::CODE_START as u16); // high memory
        put_word(&mut bytes, 0x06, Self::CODE_START as u16); // initial pc
        put_word(&mut bytes, 0x08, Self::DICTIONARY as u16);
        put_word(&mut bytes, 0x0A, Self::OBJECTS as u16);
        put_word(&mut bytes, 0x0C, Self::GLOBALS as u16);
        put_word(&mut bytes, 0x0E, Self::SIZE as u16); // static base
        put_word(&mut bytes, 0x18, Self::ABBREV as u16);
        put_word(&mut bytes, 0x1A, (Self::SIZE / 2) as u16); // file length
        for b in bytes[0x12..0x18].iter_mut() {
            *b = b'0';
        }
        // Empty dictionary: no separators, 7-byte entries, zero entries.
        bytes[Self::DICTIONARY] = 0;
        bytes[Self::DICTIONARY + 1] = 7;
        ImageBuilder {
            bytes,
            code_ptr: Self::CODE_START,
        }
    }

    /// Append instruction bytes at the current code position.
    pub fn code(mut self, bytes: &[u8]) -> Self {
        self.bytes[self.code_ptr..self.code_ptr + bytes.len()].copy_from_slice(bytes);
        self.code_ptr += bytes.len();
        self
    }

    pub fn at(mut self, addr: usize, bytes: &[u8]) -> Self {
        self.bytes[addr..addr + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Fill the dictionary with `words` (sorted as the format requires)
    /// and `separators`.
    pub fn dictionary(mut self, separators: &[u8], words: &[&str]) -> Self {
        let mut encoded: Vec<[u16; 2]> = words.iter().map(|w| encode_word(w)).collect();
        encoded.sort();
        let mut addr = Self::DICTIONARY;
        self.bytes[addr] = separators.len() as u8;
        addr += 1;
        self.bytes[addr..addr + separators.len()].copy_from_slice(separators);
        addr += separators.len();
        self.bytes[addr] = 7; // entry length: 4 text + 3 data
        addr += 1;
        put_word(&mut self.bytes, addr, encoded.len() as u16);
        addr += 2;
        for entry in encoded {
            put_word(&mut self.bytes, addr, entry[0]);
            put_word(&mut self.bytes, addr + 2, entry[1]);
            addr += 7;
        }
        self
    }

    /// Compute and store the header checksum over 0x40..file length.
    pub fn finish_checksum(mut self) -> Self {
        let sum: u32 = self.bytes[0x40..].iter().map(|&b| b as u32).sum();
        put_word(&mut self.bytes, 0x1C, (sum & 0xFFFF) as u16);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

fn put_word(bytes: &mut [u8], addr: usize, value: u16) {
    bytes[addr] = (value >> 8) as u8;
    bytes[addr + 1] = (value & 0xFF) as u8;
}
