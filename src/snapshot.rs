use crate::error::Fault;
use crate::interpreter::{Interpreter, PendingRead};
use crate::vm::{CallFrame, MAX_CALL_DEPTH, STACK_SIZE};
use serde::{Deserialize, Serialize};

/// Everything that varies at run time: the dynamic region, the PC, both
/// stacks and a pending read if one suspended execution. Static and high
/// memory never change, so the story file plus a snapshot reconstruct the
/// exact machine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub dynamic_memory: Vec<u8>,
    pub pc: u32,
    pub stack: Vec<u16>,
    pub call_stack: Vec<CallFrame>,
    pub pending_read: Option<PendingRead>,
}

impl Snapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, Fault> {
        postcard::to_allocvec(self).map_err(|_| Fault::BadSnapshot("serialization failed"))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Snapshot, Fault> {
        postcard::from_bytes(bytes).map_err(|_| Fault::BadSnapshot("undecodable snapshot"))
    }
}

impl Interpreter {
    /// Capture the current execution state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            dynamic_memory: self.vm.game.memory.dynamic_region().to_vec(),
            pc: self.vm.pc,
            stack: self.vm.stack.clone(),
            call_stack: self.vm.call_stack.clone(),
            pending_read: self.pending_read.clone(),
        }
    }

    /// Replace the execution state with a snapshot taken from the same
    /// story image. A snapshot from a different image fails the
    /// dynamic-region length check.
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<(), Fault> {
        if snapshot.stack.len() > STACK_SIZE {
            return Err(Fault::BadSnapshot("evaluation stack too deep"));
        }
        if snapshot.call_stack.is_empty() || snapshot.call_stack.len() > MAX_CALL_DEPTH {
            return Err(Fault::BadSnapshot("call stack depth out of range"));
        }
        self.vm
            .game
            .memory
            .load_dynamic_region(&snapshot.dynamic_memory)?;
        self.vm.pc = snapshot.pc;
        self.vm.stack = snapshot.stack.clone();
        self.vm.call_stack = snapshot.call_stack.clone();
        self.pending_read = snapshot.pending_read.clone();
        self.halted = false;
        self.fault = None;
        Ok(())
    }
}
