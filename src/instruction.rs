use crate::error::Fault;
use crate::opcode_tables;
use std::fmt::{Display, Error, Formatter};

/// Operand types, two bits each in the encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// Large constant (2 bytes)
    LargeConstant,
    /// Small constant (1 byte)
    SmallConstant,
    /// Variable number (1 byte, dereferenced at execution)
    Variable,
    /// Omitted (not present)
    Omitted,
}

impl OperandType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0b00 => OperandType::LargeConstant,
            0b01 => OperandType::SmallConstant,
            0b10 => OperandType::Variable,
            _ => OperandType::Omitted,
        }
    }
}

/// Instruction forms, selected by the top two bits of the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionForm {
    Long,
    Short,
    Variable,
}

/// Operand count categories; the dispatch key alongside the opcode number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandCount {
    OP0,
    OP1,
    OP2,
    VAR,
}

/// Trailing branch data.
#[derive(Debug, Clone)]
pub struct BranchInfo {
    /// Branch when the condition equals this polarity.
    pub on_true: bool,
    /// Signed offset; 0 and 1 mean "return false"/"return true" instead of a
    /// jump.
    pub offset: i16,
}

/// A decoded instruction: everything the dispatcher needs, plus the total
/// encoded size so the engine can advance the program counter.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: u8,
    pub form: InstructionForm,
    pub operand_count: OperandCount,
    pub operand_types: Vec<OperandType>,
    /// Raw operand values; `Variable` operands still need dereferencing.
    pub operands: Vec<u16>,
    pub store_var: Option<u8>,
    pub branch: Option<BranchInfo>,
    /// Byte address of inline text for print/print_ret.
    pub text_addr: Option<u32>,
    pub size: usize,
}

impl Instruction {
    /// Decode one instruction at `addr`. Inline strings are located but not
    /// decoded here; the text engine reads them at execution time.
    ///
    /// `string_len` measures an inline string so the decoder can account for
    /// it in the instruction size without interpreting it.
    pub fn decode(memory: &[u8], addr: usize) -> Result<Self, Fault> {
        let pc = addr as u32;
        let next = |offset: usize| -> Result<u8, Fault> {
            memory.get(offset).copied().ok_or(Fault::MalformedInstruction {
                pc,
                reason: "instruction runs past end of memory",
            })
        };

        let opcode_byte = next(addr)?;
        let mut offset = addr + 1;

        let form = match opcode_byte >> 6 {
            0b11 => InstructionForm::Variable,
            0b10 => InstructionForm::Short,
            _ => InstructionForm::Long,
        };

        let (opcode, operand_count) = match form {
            // Long form: always 2OP, opcode in the bottom 5 bits.
            InstructionForm::Long => (opcode_byte & 0x1F, OperandCount::OP2),
            // Short form: bits 5-4 give the single operand's type, or mark
            // the instruction 0OP; opcode in the bottom 4 bits.
            InstructionForm::Short => {
                let count = if (opcode_byte >> 4) & 0x03 == 0x03 {
                    OperandCount::OP0
                } else {
                    OperandCount::OP1
                };
                (opcode_byte & 0x0F, count)
            }
            // Variable form: bit 5 distinguishes a 2OP opcode with a type
            // byte from a true VAR opcode.
            InstructionForm::Variable => {
                let count = if opcode_byte & 0x20 == 0 {
                    OperandCount::OP2
                } else {
                    OperandCount::VAR
                };
                (opcode_byte & 0x1F, count)
            }
        };

        if !opcode_tables::is_known(operand_count, opcode) {
            return Err(Fault::IllegalOpcode {
                pc,
                opcode: opcode_byte,
            });
        }

        // Operand types
        let mut operand_types = Vec::new();
        match form {
            InstructionForm::Long => {
                for bit in [0x40, 0x20] {
                    operand_types.push(if opcode_byte & bit != 0 {
                        OperandType::Variable
                    } else {
                        OperandType::SmallConstant
                    });
                }
            }
            InstructionForm::Short => {
                if operand_count == OperandCount::OP1 {
                    operand_types.push(OperandType::from_bits(opcode_byte >> 4));
                }
            }
            InstructionForm::Variable => {
                let type_byte = next(offset)?;
                offset += 1;
                for i in 0..4 {
                    let op_type = OperandType::from_bits(type_byte >> (6 - i * 2));
                    if op_type == OperandType::Omitted {
                        break;
                    }
                    operand_types.push(op_type);
                }
            }
        }

        // Operand values
        let mut operands = Vec::with_capacity(operand_types.len());
        for op_type in &operand_types {
            match op_type {
                OperandType::LargeConstant => {
                    let high = next(offset)? as u16;
                    let low = next(offset + 1)? as u16;
                    operands.push((high << 8) | low);
                    offset += 2;
                }
                OperandType::SmallConstant | OperandType::Variable => {
                    operands.push(next(offset)? as u16);
                    offset += 1;
                }
                OperandType::Omitted => unreachable!("omitted types never collected"),
            }
        }

        // A 2OP opcode encoded in variable form must still have at least two
        // operands (je may carry up to four).
        if operand_count == OperandCount::OP2 && operands.len() < 2 {
            return Err(Fault::MalformedInstruction {
                pc,
                reason: "2OP instruction with fewer than two operands",
            });
        }

        let store_var = if opcode_tables::stores_result(operand_count, opcode) {
            let var = next(offset)?;
            offset += 1;
            Some(var)
        } else {
            None
        };

        let branch = if opcode_tables::has_branch(operand_count, opcode) {
            let first = next(offset)?;
            offset += 1;
            let on_true = first & 0x80 != 0;
            let branch_offset = if first & 0x40 != 0 {
                // 6-bit unsigned, 0..63
                (first & 0x3F) as i16
            } else {
                // 14-bit signed across two bytes
                let second = next(offset)? as i16;
                offset += 1;
                let raw = (((first & 0x3F) as i16) << 8) | second;
                if raw & 0x2000 != 0 {
                    raw - 0x4000
                } else {
                    raw
                }
            };
            Some(BranchInfo {
                on_true,
                offset: branch_offset,
            })
        } else {
            None
        };

        let text_addr = if opcode_tables::has_text(operand_count, opcode) {
            let start = offset;
            offset += Self::string_len(memory, offset, pc)?;
            Some(start as u32)
        } else {
            None
        };

        Ok(Instruction {
            opcode,
            form,
            operand_count,
            operand_types,
            operands,
            store_var,
            branch,
            text_addr,
            size: offset - addr,
        })
    }

    /// Byte length of the packed string at `addr`: whole words up to and
    /// including the one with the high bit set.
    fn string_len(memory: &[u8], addr: usize, pc: u32) -> Result<usize, Fault> {
        let mut offset = addr;
        loop {
            if offset + 1 >= memory.len() {
                return Err(Fault::MalformedInstruction {
                    pc,
                    reason: "inline string runs past end of memory",
                });
            }
            let word = ((memory[offset] as u16) << 8) | memory[offset + 1] as u16;
            offset += 2;
            if word & 0x8000 != 0 {
                return Ok(offset - addr);
            }
        }
    }

    pub fn name(&self) -> &'static str {
        opcode_tables::name(self.operand_count, self.opcode)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.name())?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " ")?;
            } else {
                write!(f, ", ")?;
            }
            match self.operand_types[i] {
                OperandType::Variable => write!(f, "V{op:02x}")?,
                _ => write!(f, "#{op:04x}")?,
            }
        }
        if let Some(var) = self.store_var {
            write!(f, " -> V{var:02x}")?;
        }
        if let Some(ref branch) = self.branch {
            write!(
                f,
                " [{}{}]",
                if branch.on_true { "TRUE" } else { "FALSE" },
                match branch.offset {
                    0 => " RFALSE".to_string(),
                    1 => " RTRUE".to_string(),
                    n => format!(" {n:+}"),
                }
            )?;
        }
        Ok(())
    }
}
