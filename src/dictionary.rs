use crate::error::Fault;
use crate::memory::Memory;
use crate::text;
use log::debug;

/// The story dictionary: a sorted table of encoded words used to tokenize
/// player input.
///
/// Layout at the header's dictionary address: a separator count, that many
/// separator ZSCII codes, the entry length, a big-endian entry count, then
/// the entries themselves. Version-3 entries start with 4 bytes of encoded
/// text (6 z-characters).
pub struct Dictionary {
    base: u32,
}

/// One token recognized in an input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Dictionary entry address, or 0 for an unrecognized word.
    pub dict_addr: u16,
    /// Length of the word in the input line, in characters.
    pub len: u8,
    /// Position of the word's first character within the line.
    pub pos: u8,
}

impl Dictionary {
    pub fn new(dictionary_addr: u16) -> Self {
        Dictionary {
            base: dictionary_addr as u32,
        }
    }

    fn separators(&self, mem: &Memory) -> Result<Vec<u8>, Fault> {
        let count = mem.read_byte(self.base)?;
        let mut seps = Vec::with_capacity(count as usize);
        for i in 0..count as u32 {
            seps.push(mem.read_byte(self.base + 1 + i)?);
        }
        Ok(seps)
    }

    /// Binary search for a word's dictionary entry; 0 when absent. The table
    /// is sorted by encoded text, so the comparison runs on the 4-byte
    /// encoded form.
    pub fn lookup(&self, mem: &Memory, word: &str) -> Result<u16, Fault> {
        let sep_count = mem.read_byte(self.base)? as u32;
        let entry_header = self.base + 1 + sep_count;
        let entry_len = mem.read_byte(entry_header)? as u32;
        let entry_count = mem.read_word(entry_header + 1)? as i32;
        let entries = entry_header + 3;

        let [search1, search2] = text::encode_word(word);
        debug!(
            "dictionary lookup '{}' encoded {:04x} {:04x}, {} entries",
            word, search1, search2, entry_count
        );

        let mut low = 0i32;
        let mut high = entry_count - 1;
        while low <= high {
            let mid = (low + high) / 2;
            let addr = entries + mid as u32 * entry_len;
            let entry1 = mem.read_word(addr)?;
            let entry2 = mem.read_word(addr + 2)?;
            match (search1, search2).cmp(&(entry1, entry2)) {
                std::cmp::Ordering::Less => high = mid - 1,
                std::cmp::Ordering::Greater => low = mid + 1,
                std::cmp::Ordering::Equal => return Ok(addr as u16),
            }
        }
        Ok(0)
    }

    /// Split an input line into tokens and look each one up. Spaces separate
    /// words and are discarded; separator characters separate words and are
    /// tokens of their own. Positions index into the line itself; the sread
    /// handler offsets them to text-buffer coordinates.
    pub fn tokenize(&self, mem: &Memory, line: &str) -> Result<Vec<Token>, Fault> {
        let separators = self.separators(mem)?;
        let bytes = line.as_bytes();
        let mut start: Option<usize> = None;

        // First pass: (position, length) spans
        let mut raw: Vec<(usize, usize)> = Vec::new();
        for (i, &b) in bytes.iter().enumerate() {
            if b == b' ' || separators.contains(&b) {
                if let Some(s) = start.take() {
                    raw.push((s, i - s));
                }
                if b != b' ' {
                    raw.push((i, 1));
                }
            } else if start.is_none() {
                start = Some(i);
            }
        }
        if let Some(s) = start {
            raw.push((s, bytes.len() - s));
        }

        let mut tokens = Vec::with_capacity(raw.len());
        for (pos, len) in raw {
            let word = &line[pos..pos + len];
            tokens.push(Token {
                dict_addr: self.lookup(mem, word)?,
                len: len as u8,
                pos: pos as u8,
            });
        }
        Ok(tokens)
    }
}
