//! Core virtual machine implementation.
//!
//! The VM is a two-stack machine executing one cell-encoded instruction at a
//! time out of its [`Image`]. Decoding is a single `match` over the closed
//! [`Instruction`] enum; each arm computes the next instruction pointer, which
//! is bounds-checked before it is committed so `ip` never leaves the image.
//!
//! All arithmetic wraps. Every opcode validates stack depth, stack room and
//! memory bounds before mutating anything, so a faulting instruction leaves
//! the machine state exactly as it found it.

use crate::virtual_machine::Cell;
use crate::virtual_machine::errors::{Fault, VMError};
use crate::virtual_machine::image::Image;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::ports::Ports;
use crate::virtual_machine::stack::{ADDRESS_STACK_DEPTH, DATA_STACK_DEPTH, Stack, StackKind};

#[cfg(test)]
mod tests;

/// Whether the machine can keep executing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Running,
    Halted,
}

/// Summary of a run that ended with a halt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunReport {
    /// Instructions executed over the machine's lifetime.
    pub steps: u64,
    /// Instruction pointer at the time of the halt.
    pub ip: Cell,
}

/// Image machine.
///
/// Owns the image and both stacks for the duration of one run and talks to
/// the host only through its [`Ports`] implementation.
pub struct VM<P: Ports> {
    /// Code and data.
    image: Image,
    /// Address of the next instruction to execute.
    ip: Cell,
    /// Working values.
    data: Stack,
    /// Return addresses and values parked with `PUSH`.
    address: Stack,
    /// Host boundary.
    ports: P,
    /// Terminal flag; set by a halt request or a fault.
    halted: bool,
    /// Instructions executed.
    steps: u64,
}

impl<P: Ports> VM<P> {
    /// Creates a machine with default stack depths.
    pub fn new(image: Image, ports: P) -> Self {
        Self::with_depths(image, ports, DATA_STACK_DEPTH, ADDRESS_STACK_DEPTH)
    }

    /// Creates a machine with explicit data and address stack depths.
    pub fn with_depths(image: Image, ports: P, data_depth: usize, address_depth: usize) -> Self {
        Self {
            image,
            ip: 0,
            data: Stack::new(StackKind::Data, data_depth),
            address: Stack::new(StackKind::Address, address_depth),
            ports,
            halted: false,
            steps: 0,
        }
    }

    /// Runs until the machine halts.
    ///
    /// Returns the run summary on a halt, or the fault that stopped it.
    pub fn run(&mut self) -> Result<RunReport, Fault> {
        while self.step()? == Status::Running {}
        Ok(RunReport {
            steps: self.steps,
            ip: self.ip,
        })
    }

    /// Executes at most `max_steps` instructions.
    pub fn run_for(&mut self, max_steps: u64) -> Result<Status, Fault> {
        for _ in 0..max_steps {
            if self.step()? == Status::Halted {
                return Ok(Status::Halted);
            }
        }
        Ok(self.status())
    }

    /// Fetches, decodes and executes one instruction, then checks for a halt
    /// request. Stepping a halted machine does nothing.
    #[inline]
    pub fn step(&mut self) -> Result<Status, Fault> {
        if self.halted {
            return Ok(Status::Halted);
        }
        let ip = self.ip;
        match self.fetch().and_then(|instr| self.exec(instr)) {
            Ok(next) => {
                self.ip = next;
                self.steps += 1;
            }
            Err(error) => {
                self.halted = true;
                return Err(Fault { ip, error });
            }
        }
        if self.ports.halt_requested() {
            self.halted = true;
        }
        Ok(self.status())
    }

    pub fn status(&self) -> Status {
        if self.halted {
            Status::Halted
        } else {
            Status::Running
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn ip(&self) -> Cell {
        self.ip
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn data_stack(&self) -> &Stack {
        &self.data
    }

    /// Mutable data stack, for seeding a machine before it runs.
    pub fn data_stack_mut(&mut self) -> &mut Stack {
        &mut self.data
    }

    pub fn address_stack(&self) -> &Stack {
        &self.address
    }

    pub fn address_stack_mut(&mut self) -> &mut Stack {
        &mut self.address
    }

    pub fn ports(&self) -> &P {
        &self.ports
    }

    #[inline(always)]
    fn fetch(&self) -> Result<Instruction, VMError> {
        Instruction::try_from(self.image.read(self.ip)?)
    }

    /// Reads the operand cell following the current instruction.
    #[inline(always)]
    fn operand(&self) -> Result<Cell, VMError> {
        self.image.read(self.ip + 1)
    }

    /// Validates a prospective instruction pointer.
    #[inline(always)]
    fn target(&self, ip: Cell) -> Result<Cell, VMError> {
        self.image.check(ip)?;
        Ok(ip)
    }

    /// Executes a single instruction and returns the next instruction pointer.
    #[inline(always)]
    fn exec(&mut self, instruction: Instruction) -> Result<Cell, VMError> {
        match instruction {
            // Stack
            Instruction::Nop => self.next(),
            Instruction::Lit => self.op_lit(),
            Instruction::Dup => self.op_dup(),
            Instruction::Drop => self.op_drop(),
            Instruction::Swap => self.op_swap(),
            Instruction::Push => self.op_push(),
            Instruction::Pop => self.op_pop(),
            // Control flow
            Instruction::Call => self.op_call(),
            Instruction::Jump => self.op_jump(),
            Instruction::Return => self.op_return(),
            Instruction::GtJump => self.op_branch(|b, a| b > a),
            Instruction::LtJump => self.op_branch(|b, a| b < a),
            Instruction::NeJump => self.op_branch(|b, a| b != a),
            Instruction::EqJump => self.op_branch(|b, a| b == a),
            // Memory
            Instruction::Fetch => self.op_fetch(),
            Instruction::Store => self.op_store(),
            // Arithmetic / bitwise
            Instruction::Add => self.op_binary(Cell::wrapping_add),
            Instruction::Sub => self.op_binary(Cell::wrapping_sub),
            Instruction::Mul => self.op_binary(Cell::wrapping_mul),
            Instruction::DivMod => self.op_divmod(),
            Instruction::And => self.op_binary(|b, a| b & a),
            Instruction::Or => self.op_binary(|b, a| b | a),
            Instruction::Xor => self.op_binary(|b, a| b ^ a),
            Instruction::Shl => self.op_binary(shift_left),
            Instruction::Shr => self.op_binary(shift_right),
            Instruction::ZeroExit => self.op_zero_exit(),
            Instruction::Inc => self.op_unary(|a| a.wrapping_add(1)),
            Instruction::Dec => self.op_unary(|a| a.wrapping_sub(1)),
            // Ports
            Instruction::In => self.op_in(),
            Instruction::Out => self.op_out(),
            Instruction::Wait => self.op_wait(),
        }
    }

    /// Fall-through to the next cell.
    #[inline(always)]
    fn next(&self) -> Result<Cell, VMError> {
        self.target(self.ip + 1)
    }

    /// Fall-through past an instruction's operand cell.
    ///
    /// Only valid after [`VM::operand`] succeeded, which guarantees `ip + 1`
    /// is inside the image and `ip + 2` cannot overflow.
    #[inline(always)]
    fn skip_operand(&self) -> Result<Cell, VMError> {
        self.target(self.ip + 2)
    }

    fn op_lit(&mut self) -> Result<Cell, VMError> {
        let value = self.operand()?;
        let next = self.skip_operand()?;
        self.data.push(value)?;
        Ok(next)
    }

    fn op_dup(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        let top = self.data.top()?;
        self.data.push(top)?;
        Ok(next)
    }

    fn op_drop(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        self.data.pop()?;
        Ok(next)
    }

    fn op_swap(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        self.data.ensure(2)?;
        let a = self.data.pop()?;
        let b = self.data.pop()?;
        self.data.push(a)?;
        self.data.push(b)?;
        Ok(next)
    }

    fn op_push(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        self.data.ensure(1)?;
        self.address.ensure_room(1)?;
        let a = self.data.pop()?;
        self.address.push(a)?;
        Ok(next)
    }

    fn op_pop(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        self.address.ensure(1)?;
        self.data.ensure_room(1)?;
        let a = self.address.pop()?;
        self.data.push(a)?;
        Ok(next)
    }

    fn op_call(&mut self) -> Result<Cell, VMError> {
        let target = self.target(self.operand()?)?;
        self.address.push(self.ip + 1)?;
        Ok(target)
    }

    fn op_jump(&mut self) -> Result<Cell, VMError> {
        self.target(self.operand()?)
    }

    /// Resumes one cell past the saved address, i.e. right after the CALL's
    /// operand cell.
    fn op_return(&mut self) -> Result<Cell, VMError> {
        let next = self.return_target()?;
        self.address.pop()?;
        Ok(next)
    }

    fn return_target(&self) -> Result<Cell, VMError> {
        let saved = self.address.top()?;
        let next = saved.checked_add(1).ok_or(VMError::OutOfBounds {
            addr: i64::from(saved) + 1,
            capacity: self.image.capacity(),
        })?;
        self.target(next)
    }

    /// Conditional jump: pops `a` then `b` and jumps when `taken(b, a)`.
    /// The operand cell is consumed on both paths.
    fn op_branch(&mut self, taken: impl Fn(Cell, Cell) -> bool) -> Result<Cell, VMError> {
        let dest = self.operand()?;
        self.data.ensure(2)?;
        let a = self.data.nth(0)?;
        let b = self.data.nth(1)?;
        let next = if taken(b, a) {
            self.target(dest)?
        } else {
            self.skip_operand()?
        };
        self.data.pop()?;
        self.data.pop()?;
        Ok(next)
    }

    fn op_fetch(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        let addr = self.data.top()?;
        let value = self.image.read(addr)?;
        self.data.pop()?;
        self.data.push(value)?;
        Ok(next)
    }

    fn op_store(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        self.data.ensure(2)?;
        let addr = self.data.nth(0)?;
        let value = self.data.nth(1)?;
        self.image.write(addr, value)?;
        self.data.pop()?;
        self.data.pop()?;
        Ok(next)
    }

    /// Pops `a` then `b` and pushes `f(b, a)`.
    #[inline(always)]
    fn op_binary(&mut self, f: impl Fn(Cell, Cell) -> Cell) -> Result<Cell, VMError> {
        let next = self.next()?;
        self.data.ensure(2)?;
        let a = self.data.pop()?;
        let b = self.data.pop()?;
        self.data.push(f(b, a))?;
        Ok(next)
    }

    #[inline(always)]
    fn op_unary(&mut self, f: impl Fn(Cell) -> Cell) -> Result<Cell, VMError> {
        let next = self.next()?;
        let a = self.data.pop()?;
        self.data.push(f(a))?;
        Ok(next)
    }

    /// Pushes the remainder, then the quotient (truncated toward zero).
    fn op_divmod(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        self.data.ensure(2)?;
        let a = self.data.nth(0)?;
        if a == 0 {
            return Err(VMError::DivisionByZero);
        }
        let a = self.data.pop()?;
        let b = self.data.pop()?;
        self.data.push(b.wrapping_rem(a))?;
        self.data.push(b.wrapping_div(a))?;
        Ok(next)
    }

    /// Returns when the top of stack is zero (dropping it); otherwise leaves
    /// the value in place and falls through.
    fn op_zero_exit(&mut self) -> Result<Cell, VMError> {
        if self.data.top()? != 0 {
            return self.next();
        }
        let next = self.return_target()?;
        self.data.pop()?;
        self.address.pop()?;
        Ok(next)
    }

    /// Blocks on the host for one byte. When the host reports that no byte
    /// will come, the machine halts without completing the instruction.
    fn op_in(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        self.data.ensure_room(1)?;
        match self.ports.request_input() {
            Some(byte) => {
                self.data.push(byte)?;
                Ok(next)
            }
            None => {
                self.halted = true;
                Ok(self.ip)
            }
        }
    }

    fn op_out(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        let value = self.data.pop()?;
        self.ports.emit_output(value);
        Ok(next)
    }

    fn op_wait(&mut self) -> Result<Cell, VMError> {
        let next = self.next()?;
        self.ports.wait();
        Ok(next)
    }
}

/// `b << a`; counts outside `0..32` shift every bit out.
#[inline(always)]
fn shift_left(b: Cell, a: Cell) -> Cell {
    u32::try_from(a)
        .ok()
        .and_then(|n| (b as u32).checked_shl(n))
        .map_or(0, |v| v as Cell)
}

/// Logical `b >> a`; counts outside `0..32` shift every bit out.
#[inline(always)]
fn shift_right(b: Cell, a: Cell) -> Cell {
    u32::try_from(a)
        .ok()
        .and_then(|n| (b as u32).checked_shr(n))
        .map_or(0, |v| v as Cell)
}
