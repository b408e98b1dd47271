use crate::dictionary::Dictionary;
use crate::error::Fault;
use crate::header::{Header, HEADER_SIZE};
use crate::memory::Memory;
use crate::object::ObjectTable;
use log::debug;
use serde::{Deserialize, Serialize};

/// Capacity of the evaluation stack, in words.
pub const STACK_SIZE: usize = 1024;

/// Maximum number of call frames, counting the synthetic root frame.
pub const MAX_CALL_DEPTH: usize = 64;

/// Maximum locals a routine may declare.
pub const MAX_LOCALS: usize = 15;

/// One entry of the call stack.
///
/// `stack_base` records the evaluation-stack depth at call time; the frame
/// may never pop below it, and return truncates back to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFrame {
    /// PC to resume at after return.
    pub return_pc: u32,
    /// Where the return value goes (None = called for effect, value dropped).
    pub return_store: Option<u8>,
    pub num_locals: u8,
    pub locals: [u16; 16],
    pub stack_base: usize,
}

/// A loaded story image: the memory, its parsed header, and a pristine copy
/// of the dynamic region for restart.
pub struct Game {
    pub memory: Memory,
    pub header: Header,
    initial_dynamic: Vec<u8>,
}

impl Game {
    /// Validate and adopt a story image. Rejecting a bad image here is what
    /// lets the rest of the interpreter trust the header's table addresses.
    pub fn from_memory(bytes: Vec<u8>) -> Result<Self, Fault> {
        let header = Header::parse(&bytes)?;
        let static_base = header.base_static_mem as u32;
        let memory = Memory::new(bytes, static_base);
        let initial_dynamic = memory.dynamic_region().to_vec();
        Ok(Game {
            memory,
            header,
            initial_dynamic,
        })
    }

    /// Put the dynamic region back the way load time saw it (restart opcode).
    pub fn reset_dynamic(&mut self) -> Result<(), Fault> {
        let pristine = self.initial_dynamic.clone();
        self.memory.load_dynamic_region(&pristine)
    }

    /// Header checksum as load time would have computed it: the sum of all
    /// bytes after the header up to the declared file length, mod 0x10000.
    /// Dynamic bytes come from the pristine copy so run-time writes do not
    /// disturb the result.
    pub fn compute_checksum(&self) -> u16 {
        let bytes = self.memory.bytes();
        let end = self.header.file_len.min(bytes.len());
        let static_base = self.memory.static_base() as usize;
        let mut sum = 0u32;
        for addr in HEADER_SIZE..end {
            let b = if addr < static_base {
                self.initial_dynamic[addr]
            } else {
                bytes[addr]
            };
            sum = sum.wrapping_add(b as u32);
        }
        (sum & 0xFFFF) as u16
    }

    pub fn objects(&self) -> ObjectTable {
        ObjectTable::new(self.header.object_table, self.header.abbrev_table)
    }

    pub fn dictionary(&self) -> Dictionary {
        Dictionary::new(self.header.dictionary)
    }
}

/// The mutable machine state: program counter, evaluation stack and call
/// stack over a loaded game.
///
/// Everything lives in this one value, with no ambient state, so independent
/// sessions can coexist and a snapshot is a structural copy.
pub struct VM {
    pub game: Game,
    pub pc: u32,
    pub stack: Vec<u16>,
    pub call_stack: Vec<CallFrame>,
    globals_addr: u32,
}

impl VM {
    pub fn new(game: Game) -> Self {
        let initial_pc = game.header.initial_pc as u32;
        let globals_addr = game.header.global_variables as u32;
        let mut vm = VM {
            game,
            pc: initial_pc,
            stack: Vec::with_capacity(STACK_SIZE),
            call_stack: Vec::new(),
            globals_addr,
        };
        vm.push_root_frame();
        vm
    }

    /// The synthetic top-level frame: the initial PC is plain code, not a
    /// routine, so it gets a frame with no locals and no return target.
    /// Returning past it halts the program.
    fn push_root_frame(&mut self) {
        self.call_stack.push(CallFrame {
            return_pc: 0,
            return_store: None,
            num_locals: 0,
            locals: [0; 16],
            stack_base: 0,
        });
    }

    /// Back to the initial state (restart opcode, minus the memory reset).
    pub fn reset(&mut self) {
        self.pc = self.game.header.initial_pc as u32;
        self.stack.clear();
        self.call_stack.clear();
        self.push_root_frame();
    }

    fn frame(&self) -> Result<&CallFrame, Fault> {
        self.call_stack.last().ok_or(Fault::NoActiveFrame)
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame, Fault> {
        self.call_stack.last_mut().ok_or(Fault::NoActiveFrame)
    }

    pub fn push(&mut self, value: u16) -> Result<(), Fault> {
        if self.stack.len() >= STACK_SIZE {
            return Err(Fault::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pop within the current frame. The stack is shared across frames, so
    /// popping below the depth the routine was entered with is underflow even
    /// while the stack as a whole is non-empty.
    pub fn pop(&mut self) -> Result<u16, Fault> {
        if self.stack.len() <= self.frame()?.stack_base {
            debug!(
                "stack underflow at pc 0x{:05x}: depth {} base {}",
                self.pc,
                self.stack.len(),
                self.frame()?.stack_base
            );
            return Err(Fault::StackUnderflow);
        }
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    pub fn peek(&self) -> Result<u16, Fault> {
        if self.stack.len() <= self.frame()?.stack_base {
            return Err(Fault::StackUnderflow);
        }
        self.stack.last().copied().ok_or(Fault::StackUnderflow)
    }

    fn global_addr(&self, var: u8) -> u32 {
        self.globals_addr + (var as u32 - 0x10) * 2
    }

    /// Read a variable by number: 0 pops the stack, 1-15 are locals of the
    /// current frame, 16-255 are globals.
    pub fn read_variable(&mut self, var: u8) -> Result<u16, Fault> {
        match var {
            0x00 => self.pop(),
            0x01..=0x0F => {
                let frame = self.frame()?;
                if var > frame.num_locals {
                    debug!(
                        "read of local {} but routine declares {} locals",
                        var, frame.num_locals
                    );
                    return Ok(0);
                }
                Ok(frame.locals[(var - 1) as usize])
            }
            _ => self.game.memory.read_word(self.global_addr(var)),
        }
    }

    /// Read a variable without the pop: variable 0 peeks. For inc/dec and
    /// load, which operate on the slot in place.
    pub fn read_variable_in_place(&mut self, var: u8) -> Result<u16, Fault> {
        match var {
            0x00 => self.peek(),
            _ => self.read_variable(var),
        }
    }

    /// Write a variable by number: 0 pushes, 1-15 are locals, 16-255 globals.
    pub fn write_variable(&mut self, var: u8, value: u16) -> Result<(), Fault> {
        match var {
            0x00 => self.push(value),
            0x01..=0x0F => {
                let frame = self.frame_mut()?;
                if var > frame.num_locals {
                    debug!(
                        "write of local {} but routine declares {} locals",
                        var, frame.num_locals
                    );
                    return Ok(());
                }
                frame.locals[(var - 1) as usize] = value;
                Ok(())
            }
            _ => self.game.memory.write_word(self.global_addr(var), value),
        }
    }

    /// Write a variable without the push: variable 0 replaces the stack top.
    pub fn write_variable_in_place(&mut self, var: u8, value: u16) -> Result<(), Fault> {
        match var {
            0x00 => {
                self.pop()?;
                self.push(value)
            }
            _ => self.write_variable(var, value),
        }
    }

    /// Call the routine at `addr` (already unpacked). Reads the local count
    /// and default values from the routine header, overlays the caller's
    /// arguments, pushes the frame and repoints the PC.
    pub fn call_routine(
        &mut self,
        addr: u32,
        args: &[u16],
        return_store: Option<u8>,
    ) -> Result<(), Fault> {
        if self.call_stack.len() >= MAX_CALL_DEPTH {
            debug!("call depth {} exceeded at pc 0x{:05x}", MAX_CALL_DEPTH, self.pc);
            return Err(Fault::StackOverflow);
        }

        let num_locals = self.game.memory.read_byte(addr)? as usize;
        if num_locals > MAX_LOCALS {
            return Err(Fault::MalformedInstruction {
                pc: self.pc,
                reason: "routine declares more than 15 locals",
            });
        }

        let mut frame = CallFrame {
            return_pc: self.pc,
            return_store,
            num_locals: num_locals as u8,
            locals: [0; 16],
            stack_base: self.stack.len(),
        };

        // Defaults from the routine header, then arguments over the front.
        let mut local_addr = addr + 1;
        for slot in frame.locals.iter_mut().take(num_locals) {
            *slot = self.game.memory.read_word(local_addr)?;
            local_addr += 2;
        }
        for (slot, &arg) in frame.locals.iter_mut().zip(args).take(num_locals) {
            *slot = arg;
        }

        debug!(
            "call 0x{:05x} locals={} args={:?} return_pc=0x{:05x}",
            addr, num_locals, args, frame.return_pc
        );

        self.call_stack.push(frame);
        self.pc = local_addr;
        Ok(())
    }

    /// Pop the current frame and deliver `value` to the caller. Returns true
    /// while frames remain; returning past the root frame means the program
    /// has halted.
    pub fn return_value(&mut self, value: u16) -> Result<bool, Fault> {
        let frame = self.call_stack.pop().ok_or(Fault::StackUnderflow)?;
        self.stack.truncate(frame.stack_base);
        self.pc = frame.return_pc;
        if self.call_stack.is_empty() {
            // The synthetic root routine returned: normal termination.
            return Ok(false);
        }
        if let Some(var) = frame.return_store {
            self.write_variable(var, value)?;
        }
        Ok(true)
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_image::ImageBuilder;

    fn test_vm() -> VM {
        VM::new(Game::from_memory(ImageBuilder::new().build()).unwrap())
    }

    #[test]
    fn test_vm_starts_at_initial_pc() {
        let vm = test_vm();
        assert_eq!(vm.pc, ImageBuilder::CODE_START as u32);
        assert_eq!(vm.call_stack.len(), 1);
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn test_stack_push_pop_peek() {
        let mut vm = test_vm();
        vm.push(0x1234).unwrap();
        assert_eq!(vm.peek().unwrap(), 0x1234);
        assert_eq!(vm.pop().unwrap(), 0x1234);
        assert_eq!(vm.pop(), Err(Fault::StackUnderflow));
    }

    #[test]
    fn test_stack_capacity() {
        let mut vm = test_vm();
        for i in 0..STACK_SIZE {
            vm.push(i as u16).unwrap();
        }
        assert_eq!(vm.push(0), Err(Fault::StackOverflow));
    }

    #[test]
    fn test_globals_live_in_memory() {
        let mut vm = test_vm();
        vm.write_variable(0x10, 0xABCD).unwrap();
        assert_eq!(vm.read_variable(0x10).unwrap(), 0xABCD);
        let addr = vm.game.header.global_variables as u32;
        assert_eq!(vm.game.memory.read_word(addr).unwrap(), 0xABCD);
    }

    #[test]
    fn test_variable_zero_pushes_and_pops() {
        let mut vm = test_vm();
        vm.write_variable(0x00, 7).unwrap();
        vm.write_variable(0x00, 9).unwrap();
        assert_eq!(vm.stack.len(), 2);
        assert_eq!(vm.read_variable(0x00).unwrap(), 9);
        assert_eq!(vm.stack.len(), 1);
    }

    #[test]
    fn test_call_overlays_args_on_defaults() {
        let mut vm = test_vm();
        // Routine with 3 locals defaulting to 10, 20, 30
        let routine = ImageBuilder::CODE_START as u32 + 0x100;
        // The builder's image is writable everywhere below static for tests
        let m = &mut vm.game.memory;
        m.write_byte(routine, 3).unwrap();
        m.write_word(routine + 1, 10).unwrap();
        m.write_word(routine + 3, 20).unwrap();
        m.write_word(routine + 5, 30).unwrap();

        vm.call_routine(routine, &[99], Some(0)).unwrap();
        let frame = vm.call_stack.last().unwrap();
        assert_eq!(frame.num_locals, 3);
        assert_eq!(&frame.locals[..3], &[99, 20, 30]);
        assert_eq!(vm.pc, routine + 7);
    }

    #[test]
    fn test_return_restores_caller() {
        let mut vm = test_vm();
        let routine = ImageBuilder::CODE_START as u32 + 0x100;
        vm.game.memory.write_byte(routine, 0).unwrap();
        let caller_pc = vm.pc;
        vm.push(0x1111).unwrap();

        vm.call_routine(routine, &[], Some(0x00)).unwrap();
        assert!(vm.return_value(0x55AA).unwrap());
        assert_eq!(vm.pc, caller_pc);
        // Return value was pushed above the caller's own stack content
        assert_eq!(vm.pop().unwrap(), 0x55AA);
        assert_eq!(vm.pop().unwrap(), 0x1111);
    }

    #[test]
    fn test_frame_cannot_pop_below_its_base() {
        let mut vm = test_vm();
        let routine = ImageBuilder::CODE_START as u32 + 0x100;
        vm.game.memory.write_byte(routine, 0).unwrap();
        vm.push(0x1111).unwrap();
        vm.call_routine(routine, &[], None).unwrap();
        // The caller's value is below this frame's base
        assert_eq!(vm.pop(), Err(Fault::StackUnderflow));
    }

    #[test]
    fn test_return_past_root_halts() {
        let mut vm = test_vm();
        assert!(!vm.return_value(0).unwrap());
    }

    #[test]
    fn test_call_depth_bounded() {
        let mut vm = test_vm();
        let routine = ImageBuilder::CODE_START as u32 + 0x100;
        vm.game.memory.write_byte(routine, 0).unwrap();
        let mut result = Ok(());
        for _ in 0..MAX_CALL_DEPTH + 1 {
            result = vm.call_routine(routine, &[], None);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(Fault::StackOverflow));
    }
}
