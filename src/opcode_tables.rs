//! Static decode tables for the version-3 instruction set: which opcodes
//! store a result, which carry a branch, which carry inline text, and their
//! names for diagnostics. Keeping these tabular keeps the decoder mechanical
//! and makes auditing the opcode set against the standard a line-by-line job.

use crate::instruction::OperandCount;

/// Name of an opcode, given its operand-count class and number.
pub fn name(count: OperandCount, opcode: u8) -> &'static str {
    match count {
        OperandCount::OP0 => match opcode {
            0x00 => "rtrue",
            0x01 => "rfalse",
            0x02 => "print",
            0x03 => "print_ret",
            0x04 => "nop",
            0x05 => "save",
            0x06 => "restore",
            0x07 => "restart",
            0x08 => "ret_popped",
            0x09 => "pop",
            0x0A => "quit",
            0x0B => "new_line",
            0x0C => "show_status",
            0x0D => "verify",
            _ => "illegal_0op",
        },
        OperandCount::OP1 => match opcode {
            0x00 => "jz",
            0x01 => "get_sibling",
            0x02 => "get_child",
            0x03 => "get_parent",
            0x04 => "get_prop_len",
            0x05 => "inc",
            0x06 => "dec",
            0x07 => "print_addr",
            0x09 => "remove_obj",
            0x0A => "print_obj",
            0x0B => "ret",
            0x0C => "jump",
            0x0D => "print_paddr",
            0x0E => "load",
            0x0F => "not",
            _ => "illegal_1op",
        },
        OperandCount::OP2 => match opcode {
            0x01 => "je",
            0x02 => "jl",
            0x03 => "jg",
            0x04 => "dec_chk",
            0x05 => "inc_chk",
            0x06 => "jin",
            0x07 => "test",
            0x08 => "or",
            0x09 => "and",
            0x0A => "test_attr",
            0x0B => "set_attr",
            0x0C => "clear_attr",
            0x0D => "store",
            0x0E => "insert_obj",
            0x0F => "loadw",
            0x10 => "loadb",
            0x11 => "get_prop",
            0x12 => "get_prop_addr",
            0x13 => "get_next_prop",
            0x14 => "add",
            0x15 => "sub",
            0x16 => "mul",
            0x17 => "div",
            0x18 => "mod",
            _ => "illegal_2op",
        },
        OperandCount::VAR => match opcode {
            0x00 => "call",
            0x01 => "storew",
            0x02 => "storeb",
            0x03 => "put_prop",
            0x04 => "sread",
            0x05 => "print_char",
            0x06 => "print_num",
            0x07 => "random",
            0x08 => "push",
            0x09 => "pull",
            _ => "illegal_var",
        },
    }
}

/// Whether the instruction is followed by a store-variable byte.
pub fn stores_result(count: OperandCount, opcode: u8) -> bool {
    match count {
        OperandCount::OP0 => false,
        OperandCount::OP1 => matches!(
            opcode,
            0x01 | 0x02 | 0x03 | 0x04 | 0x0E | 0x0F // get_sibling..get_prop_len, load, not
        ),
        OperandCount::OP2 => matches!(opcode, 0x08 | 0x09 | 0x0F..=0x18),
        OperandCount::VAR => matches!(opcode, 0x00 | 0x07), // call, random
    }
}

/// Whether the instruction is followed by branch data.
pub fn has_branch(count: OperandCount, opcode: u8) -> bool {
    match count {
        OperandCount::OP0 => matches!(opcode, 0x05 | 0x06 | 0x0D), // save, restore, verify
        OperandCount::OP1 => matches!(opcode, 0x00 | 0x01 | 0x02), // jz, get_sibling, get_child
        OperandCount::OP2 => matches!(opcode, 0x01..=0x07 | 0x0A), // je..test, test_attr
        OperandCount::VAR => false,
    }
}

/// Whether the opcode carries an inline packed string.
pub fn has_text(count: OperandCount, opcode: u8) -> bool {
    count == OperandCount::OP0 && matches!(opcode, 0x02 | 0x03) // print, print_ret
}

/// Whether the (count, opcode) pair exists at all in version 3. Unknown
/// opcodes must stop the run before they can corrupt state.
pub fn is_known(count: OperandCount, opcode: u8) -> bool {
    match count {
        OperandCount::OP0 => opcode <= 0x0D,
        OperandCount::OP1 => opcode <= 0x0F && opcode != 0x08,
        OperandCount::OP2 => (0x01..=0x18).contains(&opcode),
        OperandCount::VAR => opcode <= 0x09,
    }
}
