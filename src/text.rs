use crate::error::Fault;
use log::trace;

/// The three z-character alphabets for version 3.
const ALPHABET_A0: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHABET_A1: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHABET_A2: &[u8] = b" \r0123456789.,!?_#'\"/\\-:()";

/// Packed strings longer than this are treated as corrupt rather than decoded
/// forever. No legitimate story string comes close.
const MAX_ZCHARS: usize = 3000;

/// Number of z-characters in a version-3 dictionary word.
pub const DICT_WORD_ZCHARS: usize = 6;

/// Unpack a version-3 packed address (scale factor 2).
pub fn unpack_addr(packed: u16) -> u32 {
    packed as u32 * 2
}

/// Decode the packed string at `addr`. Returns the text and the number of
/// bytes consumed, so the decoder can step the program counter past inline
/// strings.
///
/// Words hold three 5-bit codes each; a set high bit marks the final word.
/// Codes 1-3 reference the abbreviation table, codes 4-5 are one-shot shifts,
/// and code 6 in A2 opens a two-code ZSCII literal.
pub fn decode_string(
    memory: &[u8],
    addr: usize,
    abbrev_table: usize,
) -> Result<(String, usize), Fault> {
    decode_nested(memory, addr, abbrev_table, false)
}

/// Decode the string at a packed address.
pub fn decode_packed(memory: &[u8], packed: u16, abbrev_table: usize) -> Result<String, Fault> {
    let (text, _) = decode_string(memory, unpack_addr(packed) as usize, abbrev_table)?;
    Ok(text)
}

fn decode_nested(
    memory: &[u8],
    addr: usize,
    abbrev_table: usize,
    in_abbrev: bool,
) -> Result<(String, usize), Fault> {
    let mut zchars = Vec::new();
    let mut offset = addr;

    loop {
        if offset + 1 >= memory.len() {
            return Err(Fault::MalformedText {
                addr: addr as u32,
                reason: "string runs past end of memory",
            });
        }
        let word = ((memory[offset] as u16) << 8) | memory[offset + 1] as u16;
        offset += 2;

        zchars.push(((word >> 10) & 0x1F) as u8);
        zchars.push(((word >> 5) & 0x1F) as u8);
        zchars.push((word & 0x1F) as u8);
        trace!("z-word {:04x} at {:05x}", word, offset - 2);

        if word & 0x8000 != 0 {
            break;
        }
        if zchars.len() > MAX_ZCHARS {
            return Err(Fault::MalformedText {
                addr: addr as u32,
                reason: "unterminated string",
            });
        }
    }

    let mut result = String::new();
    let mut alphabet = 0usize;
    let mut i = 0;
    while i < zchars.len() {
        let zc = zchars[i];
        i += 1;
        match zc {
            0 => result.push(' '),
            1..=3 => {
                // Abbreviation: the next code selects the entry within the
                // 32-entry block for this code.
                if in_abbrev {
                    return Err(Fault::MalformedText {
                        addr: addr as u32,
                        reason: "abbreviation inside an abbreviation",
                    });
                }
                let index = match zchars.get(i) {
                    Some(&index) => index,
                    None => {
                        return Err(Fault::MalformedText {
                            addr: addr as u32,
                            reason: "abbreviation code at end of string",
                        })
                    }
                };
                i += 1;
                let number = (zc - 1) * 32 + index;
                let entry = abbrev_table + number as usize * 2;
                if entry + 1 >= memory.len() {
                    return Err(Fault::BadAbbreviation { index: number });
                }
                let word_addr = ((memory[entry] as u16) << 8) | memory[entry + 1] as u16;
                let byte_addr = word_addr as usize * 2;
                if byte_addr + 1 >= memory.len() {
                    return Err(Fault::BadAbbreviation { index: number });
                }
                let (expansion, _) = decode_nested(memory, byte_addr, abbrev_table, true)?;
                result.push_str(&expansion);
            }
            4 => alphabet = 1,
            5 => alphabet = 2,
            6..=31 => {
                if alphabet == 2 && zc == 6 {
                    // ZSCII escape: a 10-bit literal spanning the next two
                    // codes. An orphaned half is a decode fault, not a '?'.
                    if i + 1 >= zchars.len() {
                        return Err(Fault::MalformedText {
                            addr: addr as u32,
                            reason: "truncated zscii escape",
                        });
                    }
                    let code = ((zchars[i] as u16) << 5) | zchars[i + 1] as u16;
                    i += 2;
                    result.push(zscii_to_char(code));
                } else if alphabet == 2 && zc == 7 {
                    result.push('\n');
                } else {
                    let table = match alphabet {
                        0 => ALPHABET_A0,
                        1 => ALPHABET_A1,
                        _ => ALPHABET_A2,
                    };
                    result.push(table[(zc - 6) as usize] as char);
                }
            }
            _ => unreachable!("5-bit code"),
        }
        // Shifts are one-shot in version 3: they apply to exactly the next
        // z-character, even a space or an abbreviation reference.
        if zc != 4 && zc != 5 {
            alphabet = 0;
        }
    }

    Ok((result, offset - addr))
}

/// Translate a ZSCII output code to text.
pub fn zscii_to_char(code: u16) -> char {
    match code {
        13 => '\n',
        32..=126 => (code as u8) as char,
        _ => '?',
    }
}

/// Encode a word the way the dictionary stores it: six z-characters packed
/// into two words, padded with shift-5 codes, high bit set on the last word.
///
/// This is for equality comparison only; characters with no single-code
/// encoding go through the A2 alphabet or the ZSCII escape, exactly as the
/// story compiler emits them, and anything left over truncates.
pub fn encode_word(word: &str) -> [u16; 2] {
    let mut codes: Vec<u8> = Vec::with_capacity(DICT_WORD_ZCHARS);
    for ch in word.chars() {
        if codes.len() >= DICT_WORD_ZCHARS {
            break;
        }
        let ch = ch.to_ascii_lowercase();
        match ch {
            'a'..='z' => codes.push(ch as u8 - b'a' + 6),
            _ => {
                if let Some(pos) = ALPHABET_A2[2..].iter().position(|&c| c == ch as u8) {
                    codes.push(5);
                    codes.push(pos as u8 + 8);
                } else {
                    // ZSCII escape: shift to A2, code 6, then the 10-bit value
                    codes.push(5);
                    codes.push(6);
                    codes.push(((ch as u16) >> 5) as u8 & 0x1F);
                    codes.push(ch as u8 & 0x1F);
                }
            }
        }
    }
    codes.truncate(DICT_WORD_ZCHARS);
    while codes.len() < DICT_WORD_ZCHARS {
        codes.push(5);
    }

    let word1 = ((codes[0] as u16) << 10) | ((codes[1] as u16) << 5) | codes[2] as u16;
    let word2 = ((codes[3] as u16) << 10) | ((codes[4] as u16) << 5) | codes[5] as u16;
    [word1, word2 | 0x8000]
}
