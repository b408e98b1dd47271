use crate::error::Fault;
use crate::instruction::{Instruction, OperandCount, OperandType};
use crate::text;
use crate::vm::{Game, VM};
use crate::zrand::ZRand;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Why a `run` call handed control back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The instruction budget ran out; call `run` again to continue.
    BudgetExhausted,
    /// A read instruction wants a line of input; call `provide_input`.
    AwaitingInput,
    /// The program quit or returned off the top of the call stack.
    Halted,
    /// Execution hit an unrecoverable condition and cannot continue.
    Fault(Fault),
}

/// The read that suspended execution. The PC has already moved past the
/// read instruction, so resuming never repeats the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRead {
    pub text_buffer: u16,
    pub parse_buffer: u16,
}

/// The execution engine: fetch, decode, dispatch in a bounded loop.
///
/// All output accumulates in an internal string for the host to drain;
/// input arrives through `provide_input` between `run` calls. Nothing here
/// blocks or touches the outside world.
pub struct Interpreter {
    pub vm: VM,
    rng: ZRand,
    output: String,
    pub(crate) pending_read: Option<PendingRead>,
    pub(crate) halted: bool,
    pub(crate) fault: Option<Fault>,
    instruction_count: u64,
}

impl Interpreter {
    pub fn new(game: Game) -> Self {
        Interpreter::with_rng(game, ZRand::new_uniform())
    }

    /// A deterministic interpreter for tests and replays.
    pub fn new_predictable(game: Game, seed: u64) -> Self {
        Interpreter::with_rng(game, ZRand::new_predictable(seed))
    }

    fn with_rng(game: Game, rng: ZRand) -> Self {
        Interpreter {
            vm: VM::new(game),
            rng,
            output: String::new(),
            pending_read: None,
            halted: false,
            fault: None,
            instruction_count: 0,
        }
    }

    /// Execute up to `max_instructions` instructions. The budget is checked
    /// only between instructions; an instruction is always applied whole.
    /// Stops are sticky: once halted or faulted, every further call reports
    /// the same reason without executing anything.
    pub fn run(&mut self, max_instructions: u64) -> StopReason {
        if let Some(fault) = &self.fault {
            return StopReason::Fault(fault.clone());
        }
        if self.halted {
            return StopReason::Halted;
        }
        if self.pending_read.is_some() {
            return StopReason::AwaitingInput;
        }

        for _ in 0..max_instructions {
            match self.step() {
                Ok(None) => {}
                Ok(Some(stop)) => {
                    if stop == StopReason::Halted {
                        self.halted = true;
                    }
                    self.instruction_count += 1;
                    return stop;
                }
                Err(fault) => {
                    warn!("fault at pc 0x{:05x}: {}", self.vm.pc, fault);
                    self.fault = Some(fault.clone());
                    return StopReason::Fault(fault);
                }
            }
            self.instruction_count += 1;
        }
        StopReason::BudgetExhausted
    }

    /// Total instructions executed since load.
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Text produced so far, left in place.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Drain the accumulated output.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub fn is_awaiting_input(&self) -> bool {
        self.pending_read.is_some()
    }

    /// Complete a suspended read: store the line into the text buffer and
    /// its tokenization into the parse buffer, then clear the pending state
    /// so the next `run` continues after the read instruction.
    pub fn provide_input(&mut self, line: &str) -> Result<(), Fault> {
        let pending = match self.pending_read.take() {
            Some(p) => p,
            None => {
                warn!("input supplied with no read pending, dropped");
                return Ok(());
            }
        };
        let text_buffer = pending.text_buffer as u32;
        let parse_buffer = pending.parse_buffer as u32;

        let mut line: String = line
            .chars()
            .filter(|c| c.is_ascii() && *c != '\n' && *c != '\r')
            .collect::<String>()
            .to_lowercase();
        let capacity = self.vm.game.memory.read_byte(text_buffer)? as usize;
        line.truncate(capacity.saturating_sub(1));
        debug!("read completes with '{}'", line);

        // Text buffer: capacity byte, the letters, a zero terminator.
        for (i, &b) in line.as_bytes().iter().enumerate() {
            self.vm
                .game
                .memory
                .write_byte(text_buffer + 1 + i as u32, b)?;
        }
        self.vm
            .game
            .memory
            .write_byte(text_buffer + 1 + line.len() as u32, 0)?;

        // Parse buffer: capacity byte, token count, then 4 bytes per token.
        // Positions count from the start of the text buffer.
        let dictionary = self.vm.game.dictionary();
        let tokens = dictionary.tokenize(&self.vm.game.memory, &line)?;
        let max_tokens = self.vm.game.memory.read_byte(parse_buffer)? as usize;
        let count = tokens.len().min(max_tokens);
        self.vm
            .game
            .memory
            .write_byte(parse_buffer + 1, count as u8)?;
        for (i, token) in tokens.iter().take(count).enumerate() {
            let entry = parse_buffer + 2 + i as u32 * 4;
            self.vm.game.memory.write_word(entry, token.dict_addr)?;
            self.vm.game.memory.write_byte(entry + 2, token.len)?;
            self.vm.game.memory.write_byte(entry + 3, token.pos + 1)?;
        }
        Ok(())
    }

    /// Fetch, decode and execute one instruction. `Ok(Some(_))` is a stop
    /// the host must see; `Ok(None)` means keep going.
    fn step(&mut self) -> Result<Option<StopReason>, Fault> {
        let inst_pc = self.vm.pc;
        let inst = Instruction::decode(self.vm.game.memory.bytes(), inst_pc as usize)?;
        debug!("0x{:05x}: {}", inst_pc, inst);

        // The PC moves first so branches and calls see the address of the
        // following instruction.
        self.vm.pc = inst_pc + inst.size as u32;

        let ops = self.resolve_operands(&inst)?;
        match inst.operand_count {
            OperandCount::OP0 => self.execute_0op(&inst, inst_pc),
            OperandCount::OP1 => self.execute_1op(&inst, inst_pc, &ops),
            OperandCount::OP2 => self.execute_2op(&inst, inst_pc, &ops),
            OperandCount::VAR => self.execute_var(&inst, inst_pc, &ops),
        }
    }

    /// Dereference variable operands, left to right. A stack operand pops.
    fn resolve_operands(&mut self, inst: &Instruction) -> Result<Vec<u16>, Fault> {
        let mut ops = Vec::with_capacity(inst.operands.len());
        for (ty, &raw) in inst.operand_types.iter().zip(&inst.operands) {
            ops.push(match ty {
                OperandType::Variable => self.vm.read_variable(raw as u8)?,
                _ => raw,
            });
        }
        Ok(ops)
    }

    fn execute_0op(
        &mut self,
        inst: &Instruction,
        inst_pc: u32,
    ) -> Result<Option<StopReason>, Fault> {
        match inst.opcode {
            0x00 => self.do_return(1),
            0x01 => self.do_return(0),
            // print
            0x02 => {
                self.print_inline(inst, inst_pc)?;
                Ok(None)
            }
            // print_ret
            0x03 => {
                self.print_inline(inst, inst_pc)?;
                self.output.push('\n');
                self.do_return(1)
            }
            // nop
            0x04 => Ok(None),
            // save/restore: in-game saves are not supported, branch as failed
            0x05 | 0x06 => self.do_branch(inst, inst_pc, false),
            // restart
            0x07 => {
                self.vm.game.reset_dynamic()?;
                self.vm.reset();
                self.pending_read = None;
                Ok(None)
            }
            // ret_popped
            0x08 => {
                let value = self.vm.pop()?;
                self.do_return(value)
            }
            // pop
            0x09 => {
                self.vm.pop()?;
                Ok(None)
            }
            // quit
            0x0A => Ok(Some(StopReason::Halted)),
            // new_line
            0x0B => {
                self.output.push('\n');
                Ok(None)
            }
            // show_status: the status line is drawn by the host, nothing to do
            0x0C => Ok(None),
            // verify
            0x0D => {
                let ok = self.vm.game.compute_checksum() == self.vm.game.header.checksum;
                self.do_branch(inst, inst_pc, ok)
            }
            _ => Err(Fault::IllegalOpcode {
                pc: inst_pc,
                opcode: inst.opcode,
            }),
        }
    }

    fn execute_1op(
        &mut self,
        inst: &Instruction,
        inst_pc: u32,
        ops: &[u16],
    ) -> Result<Option<StopReason>, Fault> {
        let a = ops[0];
        match inst.opcode {
            // jz
            0x00 => self.do_branch(inst, inst_pc, a == 0),
            // get_sibling / get_child: store, then branch on non-zero
            0x01 => {
                let sibling = self.objects().get_sibling(&self.vm.game.memory, a)?;
                self.store_result(inst, sibling)?;
                self.do_branch(inst, inst_pc, sibling != 0)
            }
            0x02 => {
                let child = self.objects().get_child(&self.vm.game.memory, a)?;
                self.store_result(inst, child)?;
                self.do_branch(inst, inst_pc, child != 0)
            }
            // get_parent
            0x03 => {
                let parent = self.objects().get_parent(&self.vm.game.memory, a)?;
                self.store_result(inst, parent)?;
                Ok(None)
            }
            // get_prop_len
            0x04 => {
                let len = self.objects().get_prop_len(&self.vm.game.memory, a as u32)?;
                self.store_result(inst, len)?;
                Ok(None)
            }
            // inc / dec
            0x05 => {
                let var = a as u8;
                let value = self.vm.read_variable_in_place(var)?.wrapping_add(1);
                self.vm.write_variable_in_place(var, value)?;
                Ok(None)
            }
            0x06 => {
                let var = a as u8;
                let value = self.vm.read_variable_in_place(var)?.wrapping_sub(1);
                self.vm.write_variable_in_place(var, value)?;
                Ok(None)
            }
            // print_addr
            0x07 => {
                let text = self.decode_at(a as u32)?;
                self.output.push_str(&text);
                Ok(None)
            }
            // remove_obj
            0x09 => {
                self.objects().remove_obj(&mut self.vm.game.memory, a)?;
                Ok(None)
            }
            // print_obj
            0x0A => {
                let name = self.objects().short_name(&self.vm.game.memory, a)?;
                self.output.push_str(&name);
                Ok(None)
            }
            // ret
            0x0B => self.do_return(a),
            // jump: unconditional, signed word offset with the same bias of
            // 2 as a branch, but never a return sentinel
            0x0C => {
                self.vm.pc = offset_pc(self.vm.pc, a as i16);
                Ok(None)
            }
            // print_paddr
            0x0D => {
                let abbrev = self.vm.game.header.abbrev_table as usize;
                let text = text::decode_packed(self.vm.game.memory.bytes(), a, abbrev)?;
                self.output.push_str(&text);
                Ok(None)
            }
            // load
            0x0E => {
                let value = self.vm.read_variable_in_place(a as u8)?;
                self.store_result(inst, value)?;
                Ok(None)
            }
            // not
            0x0F => {
                self.store_result(inst, !a)?;
                Ok(None)
            }
            _ => Err(Fault::IllegalOpcode {
                pc: inst_pc,
                opcode: inst.opcode,
            }),
        }
    }

    fn execute_2op(
        &mut self,
        inst: &Instruction,
        inst_pc: u32,
        ops: &[u16],
    ) -> Result<Option<StopReason>, Fault> {
        let a = ops[0];
        let b = ops[1];
        match inst.opcode {
            // je: equal to any of the remaining operands
            0x01 => {
                let hit = ops[1..].contains(&a);
                self.do_branch(inst, inst_pc, hit)
            }
            // jl / jg: signed comparisons
            0x02 => self.do_branch(inst, inst_pc, (a as i16) < (b as i16)),
            0x03 => self.do_branch(inst, inst_pc, (a as i16) > (b as i16)),
            // dec_chk / inc_chk: modify the variable, then compare signed
            0x04 => {
                let var = a as u8;
                let value = self.vm.read_variable_in_place(var)?.wrapping_sub(1);
                self.vm.write_variable_in_place(var, value)?;
                self.do_branch(inst, inst_pc, (value as i16) < (b as i16))
            }
            0x05 => {
                let var = a as u8;
                let value = self.vm.read_variable_in_place(var)?.wrapping_add(1);
                self.vm.write_variable_in_place(var, value)?;
                self.do_branch(inst, inst_pc, (value as i16) > (b as i16))
            }
            // jin: direct-parent test
            0x06 => {
                let parent = self.objects().get_parent(&self.vm.game.memory, a)?;
                self.do_branch(inst, inst_pc, parent == b)
            }
            // test: all bits of b set in a
            0x07 => self.do_branch(inst, inst_pc, a & b == b),
            // or / and
            0x08 => {
                self.store_result(inst, a | b)?;
                Ok(None)
            }
            0x09 => {
                self.store_result(inst, a & b)?;
                Ok(None)
            }
            // test_attr
            0x0A => {
                let set = self
                    .objects()
                    .test_attribute(&self.vm.game.memory, a, b as u8)?;
                self.do_branch(inst, inst_pc, set)
            }
            // set_attr / clear_attr
            0x0B => {
                self.objects()
                    .set_attribute(&mut self.vm.game.memory, a, b as u8, true)?;
                Ok(None)
            }
            0x0C => {
                self.objects()
                    .set_attribute(&mut self.vm.game.memory, a, b as u8, false)?;
                Ok(None)
            }
            // store
            0x0D => {
                self.vm.write_variable_in_place(a as u8, b)?;
                Ok(None)
            }
            // insert_obj
            0x0E => {
                self.objects().insert_obj(&mut self.vm.game.memory, a, b)?;
                Ok(None)
            }
            // loadw / loadb
            0x0F => {
                let value = self.vm.game.memory.read_word(a as u32 + 2 * b as u32)?;
                self.store_result(inst, value)?;
                Ok(None)
            }
            0x10 => {
                let value = self.vm.game.memory.read_byte(a as u32 + b as u32)?;
                self.store_result(inst, value as u16)?;
                Ok(None)
            }
            // get_prop / get_prop_addr / get_next_prop
            0x11 => {
                let value = self.objects().get_prop(&self.vm.game.memory, a, b as u8)?;
                self.store_result(inst, value)?;
                Ok(None)
            }
            0x12 => {
                let addr = self
                    .objects()
                    .get_prop_addr(&self.vm.game.memory, a, b as u8)?;
                self.store_result(inst, addr as u16)?;
                Ok(None)
            }
            0x13 => {
                let next = self
                    .objects()
                    .get_next_prop(&self.vm.game.memory, a, b as u8)?;
                self.store_result(inst, next as u16)?;
                Ok(None)
            }
            // add / sub / mul: wrapping signed 16-bit
            0x14 => {
                self.store_result(inst, (a as i16).wrapping_add(b as i16) as u16)?;
                Ok(None)
            }
            0x15 => {
                self.store_result(inst, (a as i16).wrapping_sub(b as i16) as u16)?;
                Ok(None)
            }
            0x16 => {
                self.store_result(inst, (a as i16).wrapping_mul(b as i16) as u16)?;
                Ok(None)
            }
            // div / mod: signed, truncating toward zero
            0x17 => {
                if b == 0 {
                    return Err(Fault::DivisionByZero { pc: inst_pc });
                }
                self.store_result(inst, (a as i16).wrapping_div(b as i16) as u16)?;
                Ok(None)
            }
            0x18 => {
                if b == 0 {
                    return Err(Fault::DivisionByZero { pc: inst_pc });
                }
                self.store_result(inst, (a as i16).wrapping_rem(b as i16) as u16)?;
                Ok(None)
            }
            _ => Err(Fault::IllegalOpcode {
                pc: inst_pc,
                opcode: inst.opcode,
            }),
        }
    }

    fn execute_var(
        &mut self,
        inst: &Instruction,
        inst_pc: u32,
        ops: &[u16],
    ) -> Result<Option<StopReason>, Fault> {
        // The type byte may omit operands an opcode cannot do without
        let need = match inst.opcode {
            0x01..=0x03 => 3, // storew, storeb, put_prop
            0x04 => 2,        // sread
            _ => 1,
        };
        if ops.len() < need {
            return Err(Fault::MalformedInstruction {
                pc: inst_pc,
                reason: "operand count too small for opcode",
            });
        }
        match inst.opcode {
            // call
            0x00 => {
                let packed = ops[0];
                if packed == 0 {
                    // Calling address 0 stores false without a call
                    self.store_result(inst, 0)?;
                    return Ok(None);
                }
                let addr = text::unpack_addr(packed);
                self.vm.call_routine(addr, &ops[1..], inst.store_var)?;
                Ok(None)
            }
            // storew / storeb
            0x01 => {
                let addr = ops[0] as u32 + 2 * ops[1] as u32;
                self.vm.game.memory.write_word(addr, ops[2])?;
                Ok(None)
            }
            0x02 => {
                let addr = ops[0] as u32 + ops[1] as u32;
                self.vm.game.memory.write_byte(addr, ops[2] as u8)?;
                Ok(None)
            }
            // put_prop
            0x03 => {
                self.objects()
                    .put_prop(&mut self.vm.game.memory, ops[0], ops[1] as u8, ops[2])?;
                Ok(None)
            }
            // sread: suspend; the PC already points past this instruction
            0x04 => {
                self.pending_read = Some(PendingRead {
                    text_buffer: ops[0],
                    parse_buffer: ops[1],
                });
                Ok(Some(StopReason::AwaitingInput))
            }
            // print_char
            0x05 => {
                self.output.push(text::zscii_to_char(ops[0]));
                Ok(None)
            }
            // print_num
            0x06 => {
                self.output.push_str(&(ops[0] as i16).to_string());
                Ok(None)
            }
            // random
            0x07 => {
                let n = ops[0] as i16;
                let value = if n > 0 {
                    self.rng.gen_range(n as u16)
                } else {
                    self.rng = if n < 0 {
                        ZRand::new_predictable(-(n as i64) as u64)
                    } else {
                        ZRand::new_uniform()
                    };
                    0
                };
                self.store_result(inst, value)?;
                Ok(None)
            }
            // push / pull
            0x08 => {
                self.vm.push(ops[0])?;
                Ok(None)
            }
            0x09 => {
                let value = self.vm.pop()?;
                self.vm.write_variable_in_place(ops[0] as u8, value)?;
                Ok(None)
            }
            _ => Err(Fault::IllegalOpcode {
                pc: inst_pc,
                opcode: inst.opcode,
            }),
        }
    }

    fn objects(&self) -> crate::object::ObjectTable {
        self.vm.game.objects()
    }

    fn decode_at(&self, addr: u32) -> Result<String, Fault> {
        let abbrev = self.vm.game.header.abbrev_table as usize;
        let (text, _) = text::decode_string(self.vm.game.memory.bytes(), addr as usize, abbrev)?;
        Ok(text)
    }

    fn print_inline(&mut self, inst: &Instruction, inst_pc: u32) -> Result<(), Fault> {
        let addr = inst.text_addr.ok_or(Fault::MalformedInstruction {
            pc: inst_pc,
            reason: "print without inline text",
        })?;
        let text = self.decode_at(addr)?;
        self.output.push_str(&text);
        Ok(())
    }

    fn store_result(&mut self, inst: &Instruction, value: u16) -> Result<(), Fault> {
        match inst.store_var {
            Some(var) => self.vm.write_variable(var, value),
            None => Ok(()),
        }
    }

    fn do_return(&mut self, value: u16) -> Result<Option<StopReason>, Fault> {
        if self.vm.return_value(value)? {
            Ok(None)
        } else {
            Ok(Some(StopReason::Halted))
        }
    }

    /// Apply a branch after its condition is known. Offsets 0 and 1 return
    /// from the current routine instead of jumping.
    fn do_branch(
        &mut self,
        inst: &Instruction,
        inst_pc: u32,
        condition: bool,
    ) -> Result<Option<StopReason>, Fault> {
        let branch = inst.branch.as_ref().ok_or(Fault::MalformedInstruction {
            pc: inst_pc,
            reason: "branch data missing",
        })?;
        if condition != branch.on_true {
            return Ok(None);
        }
        match branch.offset {
            0 => self.do_return(0),
            1 => self.do_return(1),
            offset => {
                self.vm.pc = offset_pc(self.vm.pc, offset);
                Ok(None)
            }
        }
    }
}

/// Branch targets are relative to the address after the branch data, less
/// the bias of 2 the format carries.
fn offset_pc(pc: u32, offset: i16) -> u32 {
    (pc as i64 + offset as i64 - 2) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_image::ImageBuilder;

    const QUIT: u8 = 0xBA;
    const NOP: u8 = 0xB4;
    const NEW_LINE: u8 = 0xBB;

    fn interp(image: Vec<u8>) -> Interpreter {
        Interpreter::new_predictable(Game::from_memory(image).unwrap(), 1)
    }

    #[test]
    fn test_print_then_quit() {
        // print "hi" is 0xB2 followed by one text word: h=13, i=14, pad
        let image = ImageBuilder::new().code(&[0xB2, 0xB5, 0xC5, QUIT]).build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.output(), "hi");
        assert_eq!(i.instruction_count(), 2);
    }

    #[test]
    fn test_budget_checked_at_instruction_boundaries() {
        let image = ImageBuilder::new().code(&[NOP, NOP, NEW_LINE, QUIT]).build();
        let mut i = interp(image);
        assert_eq!(i.run(2), StopReason::BudgetExhausted);
        assert_eq!(i.output(), "");
        assert_eq!(i.run(2), StopReason::Halted);
        assert_eq!(i.output(), "\n");
    }

    #[test]
    fn test_split_runs_equal_one_run() {
        let code = [NOP, NEW_LINE, NOP, NEW_LINE, QUIT];
        let mut whole = interp(ImageBuilder::new().code(&code).build());
        let mut split = interp(ImageBuilder::new().code(&code).build());
        assert_eq!(whole.run(5), StopReason::Halted);
        assert_eq!(split.run(2), StopReason::BudgetExhausted);
        assert_eq!(split.run(3), StopReason::Halted);
        assert_eq!(whole.output(), split.output());
        assert_eq!(whole.vm.pc, split.vm.pc);
    }

    #[test]
    fn test_halt_is_sticky() {
        let mut i = interp(ImageBuilder::new().code(&[QUIT]).build());
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.instruction_count(), 1);
    }

    #[test]
    fn test_add_small_constants() {
        // add 100 100 -> stack, then quit
        let image = ImageBuilder::new().code(&[0x14, 100, 100, 0x00, QUIT]).build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.vm.stack, vec![200]);
    }

    #[test]
    fn test_signed_division_truncates() {
        // div -6 4 -> stack (variable form 2OP, two large constants)
        let image = ImageBuilder::new()
            .code(&[0xD7, 0x0F, 0xFF, 0xFA, 0x00, 0x04, 0x00, QUIT])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.vm.stack, vec![0xFFFF]); // -1, not -2
    }

    #[test]
    fn test_division_by_zero_faults() {
        let image = ImageBuilder::new().code(&[0x17, 10, 0, 0x00, QUIT]).build();
        let mut i = interp(image);
        let pc = ImageBuilder::CODE_START as u32;
        assert_eq!(i.run(10), StopReason::Fault(Fault::DivisionByZero { pc }));
        // Faults are sticky too
        assert_eq!(i.run(10), StopReason::Fault(Fault::DivisionByZero { pc }));
    }

    #[test]
    fn test_je_multi_operand() {
        // je 7 3 7 (variable-form 2OP, three small constants): the branch
        // over the new_line is taken when any later operand matches
        let image = ImageBuilder::new()
            .code(&[0xC1, 0x57, 7, 3, 7, 0xC0 | 3, NEW_LINE, QUIT])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.output(), "");
    }

    #[test]
    fn test_branch_offset_one_returns_true() {
        // main: call routine -> stack; quit. routine: je 5 5 ?ret-true
        let routine = ImageBuilder::CODE_START + 0x10;
        let packed = routine / 2;
        let image = ImageBuilder::new()
            .code(&[0xE0, 0x3F, (packed >> 8) as u8, packed as u8, 0x00, QUIT])
            .at(routine, &[0x00, 0x01, 5, 5, 0xC1])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.vm.stack, vec![1]);
    }

    #[test]
    fn test_branch_offset_zero_returns_false() {
        let routine = ImageBuilder::CODE_START + 0x10;
        let packed = routine / 2;
        let image = ImageBuilder::new()
            .code(&[0xE0, 0x3F, (packed >> 8) as u8, packed as u8, 0x00, QUIT])
            .at(routine, &[0x00, 0x01, 5, 5, 0xC0])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.vm.stack, vec![0]);
    }

    #[test]
    fn test_call_with_no_operands_faults() {
        // call with an all-omitted type byte has no routine address
        let image = ImageBuilder::new().code(&[0xE0, 0xFF, 0x00, QUIT]).build();
        let mut i = interp(image);
        assert!(matches!(
            i.run(10),
            StopReason::Fault(Fault::MalformedInstruction { .. })
        ));
    }

    #[test]
    fn test_call_address_zero_stores_false() {
        let image = ImageBuilder::new()
            .code(&[0xE0, 0x3F, 0x00, 0x00, 0x00, QUIT])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.vm.stack, vec![0]);
    }

    #[test]
    fn test_recursion_overflows_call_stack() {
        // routine calls itself forever
        let routine = ImageBuilder::CODE_START + 0x10;
        let packed = routine / 2;
        let image = ImageBuilder::new()
            .code(&[0xE0, 0x3F, (packed >> 8) as u8, packed as u8, 0x00, QUIT])
            .at(
                routine,
                &[0x00, 0xE0, 0x3F, (packed >> 8) as u8, packed as u8, 0x00],
            )
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(1000), StopReason::Fault(Fault::StackOverflow));
    }

    #[test]
    fn test_store_and_load_global() {
        // store g16 0x55; load g16 -> stack
        let image = ImageBuilder::new()
            .code(&[0x0D, 0x10, 0x55, 0x9E, 0x10, 0x00, QUIT])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.vm.stack, vec![0x55]);
    }

    #[test]
    fn test_inc_chk_branches_when_above() {
        // store g16 0; inc_chk g16 0 ?skip-new_line
        let image = ImageBuilder::new()
            .code(&[0x0D, 0x10, 0, 0x05, 0x10, 0, 0xC0 | 3, NEW_LINE, QUIT])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.output(), "");
        assert_eq!(i.vm.read_variable(0x10).unwrap(), 1);
    }

    #[test]
    fn test_jump_forward_and_backward() {
        // 0: jump +6 (to 7); 3: new_line; 4: quit; 7: jump -5 (to 3)
        let image = ImageBuilder::new()
            .code(&[0x8C, 0x00, 0x06, NEW_LINE, QUIT, 0, 0, 0x8C, 0xFF, 0xFB])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.output(), "\n");
    }

    #[test]
    fn test_print_num_negative() {
        // print_num -42 (one large constant)
        let image = ImageBuilder::new().code(&[0xE6, 0x3F, 0xFF, 0xD6, QUIT]).build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.output(), "-42");
    }

    #[test]
    fn test_random_positive_in_range() {
        // random 6 -> stack
        let image = ImageBuilder::new()
            .code(&[0xE7, 0x3F, 0x00, 0x06, 0x00, QUIT])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert!((1..=6).contains(&i.vm.stack[0]));
    }

    #[test]
    fn test_random_negative_reseeds_and_stores_zero() {
        // random -5 -> stack
        let image = ImageBuilder::new()
            .code(&[0xE7, 0x3F, 0xFF, 0xFB, 0x00, QUIT])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.vm.stack, vec![0]);
    }

    #[test]
    fn test_sread_suspends_and_resumes() {
        let text_buf = 0x1000usize;
        let parse_buf = 0x1080usize;
        let image = ImageBuilder::new()
            .dictionary(&[b',', b'.'], &["go", "look"])
            .at(text_buf, &[40]) // capacity
            .at(parse_buf, &[5])
            .code(&[
                0xE4,
                0x0F,
                (text_buf >> 8) as u8,
                text_buf as u8,
                (parse_buf >> 8) as u8,
                parse_buf as u8,
                QUIT,
            ])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::AwaitingInput);
        assert!(i.is_awaiting_input());
        // Still awaiting until input arrives
        assert_eq!(i.run(10), StopReason::AwaitingInput);

        i.provide_input("GO east").unwrap();
        assert!(!i.is_awaiting_input());

        let mem = &i.vm.game.memory;
        let tb = text_buf as u32;
        assert_eq!(mem.read_byte(tb + 1).unwrap(), b'g');
        assert_eq!(mem.read_byte(tb + 2).unwrap(), b'o');
        assert_eq!(mem.read_byte(tb + 8).unwrap(), 0);

        let pb = parse_buf as u32;
        assert_eq!(mem.read_byte(pb + 1).unwrap(), 2);
        // "go" is in the dictionary, "east" is not
        assert_ne!(mem.read_word(pb + 2).unwrap(), 0);
        assert_eq!(mem.read_byte(pb + 4).unwrap(), 2); // length
        assert_eq!(mem.read_byte(pb + 5).unwrap(), 1); // position
        assert_eq!(mem.read_word(pb + 6).unwrap(), 0);
        assert_eq!(mem.read_byte(pb + 8).unwrap(), 4);
        assert_eq!(mem.read_byte(pb + 9).unwrap(), 4);

        assert_eq!(i.run(10), StopReason::Halted);
    }

    #[test]
    fn test_input_truncated_to_capacity() {
        let text_buf = 0x1000usize;
        let parse_buf = 0x1080usize;
        let image = ImageBuilder::new()
            .at(text_buf, &[5])
            .at(parse_buf, &[5])
            .code(&[
                0xE4,
                0x0F,
                (text_buf >> 8) as u8,
                text_buf as u8,
                (parse_buf >> 8) as u8,
                parse_buf as u8,
                QUIT,
            ])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::AwaitingInput);
        i.provide_input("abcdefghij").unwrap();
        let mem = &i.vm.game.memory;
        let tb = text_buf as u32;
        assert_eq!(mem.read_byte(tb + 4).unwrap(), b'd');
        assert_eq!(mem.read_byte(tb + 5).unwrap(), 0);
    }

    #[test]
    fn test_verify_branches_on_matching_checksum() {
        // verify ?skip-new_line; new_line; quit
        let image = ImageBuilder::new()
            .code(&[0xBD, 0xC0 | 3, NEW_LINE, QUIT])
            .finish_checksum()
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.output(), "");
    }

    #[test]
    fn test_restart_restores_dynamic_memory() {
        // store g16 7; restart; quit (restart loops back to the store)
        let image = ImageBuilder::new().code(&[0x0D, 0x10, 7, 0xB7, QUIT]).build();
        let mut i = interp(image);
        assert_eq!(i.run(2), StopReason::BudgetExhausted);
        // The restart just ran: PC and globals are back to load state
        assert_eq!(i.vm.pc as usize, ImageBuilder::CODE_START);
        assert_eq!(i.vm.read_variable(0x10).unwrap(), 0);
    }

    #[test]
    fn test_get_prop_answers_from_defaults() {
        let objects = ImageBuilder::OBJECTS;
        let entries = objects + 31 * 2;
        let prop_table = 0x160usize;
        let image = ImageBuilder::new()
            // default for property 5 is 0xBEEF
            .at(objects + 8, &[0xBE, 0xEF])
            // object 1 with an empty property table
            .at(entries + 7, &[(prop_table >> 8) as u8, prop_table as u8])
            .at(prop_table, &[0, 0])
            // get_prop 1 5 -> stack; quit
            .code(&[0x11, 1, 5, 0x00, QUIT])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(10), StopReason::Halted);
        assert_eq!(i.vm.stack, vec![0xBEEF]);
    }

    #[test]
    fn test_object_opcodes_drive_the_tree() {
        let entries = ImageBuilder::OBJECTS + 31 * 2;
        let image = ImageBuilder::new()
            // objects 1..4 exist with zeroed links; property tables unused
            .at(entries, &[0; 9 * 4])
            .code(&[
                0x0E, 4, 1, // insert_obj 4 1
                0x92, 0x01, 0x10, // get_child 1 -> g16 ?branch
                0xC0 | 3, // skip the new_line when a child exists
                NEW_LINE,
                0x06, 4, 1, // jin 4 1 ?branch
                0xC0 | 3,
                NEW_LINE,
                QUIT,
            ])
            .build();
        let mut i = interp(image);
        assert_eq!(i.run(20), StopReason::Halted);
        assert_eq!(i.output(), "");
        assert_eq!(i.vm.read_variable(0x10).unwrap(), 4);
    }
}
