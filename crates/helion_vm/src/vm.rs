//! # The VM
//!
//! A small stack machine: 4 registers, a 64-word stack, a flag byte, an
//! instruction pointer and a cycle counter. `exec` retires up to `speed`
//! instructions per call, then hands control back to the host. IO
//! instructions stop execution with a pending request the host drains
//! with [`Vm::io_take`]; violations latch a fault flag and freeze the
//! machine until it is reset.

use helion_core::save::{SaveReader, SaveResult, SaveWriter};
use helion_core::Word;

use crate::mods::{Mod, ModId};
use crate::op::{Op, Operand};

/// Stack depth in words.
pub const STACK_CAP: usize = 64;
/// Register count.
pub const REG_COUNT: usize = 4;
/// Longest IO request in words (verb word included).
pub const IO_CAP: usize = 8;
/// Reserved "no instruction pointer" value (breakpoints, sentinels).
pub const IP_NIL: u32 = u32::MAX;

/// Fault flags. Any set bit freezes the machine.
pub mod flags {
    /// `FAULT` instruction executed.
    pub const FAULT_USER: u8 = 1 << 0;
    /// Register index out of range.
    pub const FAULT_REG: u8 = 1 << 1;
    /// Stack under- or overflow.
    pub const FAULT_STACK: u8 = 1 << 2;
    /// Bad opcode or instruction pointer out of bounds.
    pub const FAULT_CODE: u8 = 1 << 3;
    /// Division by zero or overflowing division.
    pub const FAULT_MATH: u8 = 1 << 4;
    /// Malformed IO request.
    pub const FAULT_IO: u8 = 1 << 5;
}

/// What `exec` is telling the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmSignal {
    /// Budget exhausted, yield executed, or an IO request is pending.
    None,
    /// The program asked for a machine reset.
    Reset,
    /// The program asked to switch to another mod.
    Load(ModId),
    /// A fault latched this call.
    Fault,
}

/// The machine state. Everything here persists in the save stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vm {
    /// Instruction pointer.
    pub ip: u32,
    /// Instructions retired per `exec` call.
    pub speed: u8,
    sp: u8,
    flags: u8,
    io: u8,
    tsc: u64,
    regs: [Word; REG_COUNT],
    stack: [Word; STACK_CAP],
}

impl Vm {
    /// Fresh machine running `speed` instructions per tick.
    #[must_use]
    pub fn new(speed: u8) -> Self {
        Self {
            ip: 0,
            speed: speed.max(1),
            sp: 0,
            flags: 0,
            io: 0,
            tsc: 0,
            regs: [0; REG_COUNT],
            stack: [0; STACK_CAP],
        }
    }

    /// Clears everything but the configured speed.
    pub fn reset(&mut self) {
        let speed = self.speed;
        *self = Self::new(speed);
    }

    /// True when any fault bit is latched.
    #[inline]
    #[must_use]
    pub const fn faulted(&self) -> bool {
        self.flags != 0
    }

    /// Latched fault bits.
    #[inline]
    #[must_use]
    pub const fn flags(&self) -> u8 {
        self.flags
    }

    /// Latches an IO fault from the host side (bad IO request content).
    pub fn io_fault(&mut self) {
        self.flags |= flags::FAULT_IO;
    }

    /// Cycle counter.
    #[inline]
    #[must_use]
    pub const fn tsc(&self) -> u64 {
        self.tsc
    }

    /// Current stack depth.
    #[inline]
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.sp as usize
    }

    /// True when an IO request is waiting for the host.
    #[inline]
    #[must_use]
    pub const fn io_pending(&self) -> bool {
        self.io != 0
    }

    /// Pushes a word from the host (IO results, received packets).
    pub fn push(&mut self, val: Word) {
        if usize::from(self.sp) == STACK_CAP {
            self.flags |= flags::FAULT_STACK;
            return;
        }
        self.stack[usize::from(self.sp)] = val;
        self.sp += 1;
    }

    fn pop(&mut self) -> Option<Word> {
        if self.sp == 0 {
            self.flags |= flags::FAULT_STACK;
            return None;
        }
        self.sp -= 1;
        Some(self.stack[usize::from(self.sp)])
    }

    /// Drains the pending IO request into `buf`, top of stack first.
    /// Returns the request length; zero when nothing was pending.
    pub fn io_take(&mut self, buf: &mut [Word; IO_CAP]) -> usize {
        let len = usize::from(self.io);
        self.io = 0;
        for slot in buf.iter_mut().take(len) {
            match self.pop() {
                Some(val) => *slot = val,
                None => return 0,
            }
        }
        len
    }

    fn io_request(&mut self, len: Word) {
        if len <= 0 || len as usize > IO_CAP || len as usize > usize::from(self.sp) {
            self.flags |= flags::FAULT_IO;
            return;
        }
        self.io = len as u8;
    }

    fn fetch_word(&mut self, code: &[u8]) -> Option<Word> {
        let at = self.ip as usize;
        let bytes = code.get(at..at + 8)?;
        self.ip += 8;
        Some(Word::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    fn fetch_u8(&mut self, code: &[u8]) -> Option<u8> {
        let val = *code.get(self.ip as usize)?;
        self.ip += 1;
        Some(val)
    }

    fn fetch_u32(&mut self, code: &[u8]) -> Option<u32> {
        let at = self.ip as usize;
        let bytes = code.get(at..at + 4)?;
        self.ip += 4;
        Some(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    fn binop(&mut self, op: impl Fn(Word, Word) -> Word) {
        let Some(b) = self.pop() else { return };
        let Some(a) = self.pop() else { return };
        self.push(op(a, b));
    }

    /// Executes up to `speed` instructions of `module`.
    pub fn exec(&mut self, module: &Mod) -> VmSignal {
        if self.faulted() {
            return VmSignal::Fault;
        }

        let code = module.code();
        for _ in 0..self.speed {
            if self.io_pending() {
                return VmSignal::None;
            }

            let Some(byte) = code.get(self.ip as usize).copied() else {
                self.flags |= flags::FAULT_CODE;
                return VmSignal::Fault;
            };
            let Some(op) = Op::from_u8(byte) else {
                self.flags |= flags::FAULT_CODE;
                return VmSignal::Fault;
            };
            self.ip += 1;
            self.tsc += 1;

            // Operand fetch faults the machine on truncated code.
            let operand = match op.operand() {
                Operand::Nil => 0,
                Operand::Lit => match self.fetch_word(code) {
                    Some(val) => val,
                    None => {
                        self.flags |= flags::FAULT_CODE;
                        return VmSignal::Fault;
                    }
                },
                Operand::Reg | Operand::Len => match self.fetch_u8(code) {
                    Some(val) => Word::from(val),
                    None => {
                        self.flags |= flags::FAULT_CODE;
                        return VmSignal::Fault;
                    }
                },
                Operand::Off => match self.fetch_u32(code) {
                    Some(val) => Word::from(val),
                    None => {
                        self.flags |= flags::FAULT_CODE;
                        return VmSignal::Fault;
                    }
                },
            };

            match op {
                Op::Noop => {}

                Op::Push => self.push(operand),
                Op::Pushr => {
                    if let Some(val) = self.reg(operand) {
                        self.push(val);
                    }
                }
                Op::Pushf => {
                    let val = Word::from(self.flags);
                    self.push(val);
                }
                Op::Pop => {
                    self.pop();
                }
                Op::Popr => {
                    if let Some(val) = self.pop() {
                        self.reg_set(operand, val);
                    }
                }
                Op::Dupe => {
                    if let Some(val) = self.pop() {
                        self.push(val);
                        self.push(val);
                    }
                }
                Op::Swap => {
                    if let (Some(b), Some(a)) = (self.pop(), self.pop()) {
                        self.push(b);
                        self.push(a);
                    }
                }

                Op::Not => {
                    if let Some(val) = self.pop() {
                        self.push(Word::from(val == 0));
                    }
                }
                Op::And => self.binop(|a, b| Word::from(a != 0 && b != 0)),
                Op::Xor => self.binop(|a, b| Word::from((a != 0) != (b != 0))),
                Op::Or => self.binop(|a, b| Word::from(a != 0 || b != 0)),
                Op::Bnot => {
                    if let Some(val) = self.pop() {
                        self.push(!val);
                    }
                }
                Op::Band => self.binop(|a, b| a & b),
                Op::Bxor => self.binop(|a, b| a ^ b),
                Op::Bor => self.binop(|a, b| a | b),
                Op::Bsl => self.binop(|a, b| a.wrapping_shl(b as u32 & 63)),
                Op::Bsr => self.binop(|a, b| a.wrapping_shr(b as u32 & 63)),

                Op::Neg => {
                    if let Some(val) = self.pop() {
                        self.push(val.wrapping_neg());
                    }
                }
                Op::Add => self.binop(Word::wrapping_add),
                Op::Sub => self.binop(Word::wrapping_sub),
                Op::Mul => self.binop(Word::wrapping_mul),
                Op::Lmul => {
                    if let (Some(b), Some(a)) = (self.pop(), self.pop()) {
                        let wide = i128::from(a) * i128::from(b);
                        self.push(wide as Word);
                        self.push((wide >> 64) as Word);
                    }
                }
                Op::Div | Op::Rem => {
                    if let (Some(b), Some(a)) = (self.pop(), self.pop()) {
                        let val = if op == Op::Div { a.checked_div(b) } else { a.checked_rem(b) };
                        match val {
                            Some(val) => self.push(val),
                            None => {
                                self.flags |= flags::FAULT_MATH;
                                return VmSignal::Fault;
                            }
                        }
                    }
                }

                Op::Eq => self.binop(|a, b| Word::from(a == b)),
                Op::Ne => self.binop(|a, b| Word::from(a != b)),
                Op::Gt => self.binop(|a, b| Word::from(a > b)),
                Op::Ge => self.binop(|a, b| Word::from(a >= b)),
                Op::Lt => self.binop(|a, b| Word::from(a < b)),
                Op::Le => self.binop(|a, b| Word::from(a <= b)),
                Op::Cmp => self.binop(Word::wrapping_sub),

                Op::Ret => {
                    if let Some(val) = self.pop() {
                        self.ip = val as u32;
                    }
                }
                Op::Call => {
                    let ret = Word::from(self.ip);
                    self.push(ret);
                    self.ip = operand as u32;
                }
                Op::Load => {
                    if let Some(val) = self.pop() {
                        if !ModId::validate(val) {
                            self.flags |= flags::FAULT_CODE;
                            return VmSignal::Fault;
                        }
                        return VmSignal::Load(ModId::from_u32(val as u32));
                    }
                }
                Op::Jmp => self.ip = operand as u32,
                Op::Jz => {
                    if let Some(val) = self.pop() {
                        if val == 0 {
                            self.ip = operand as u32;
                        }
                    }
                }
                Op::Jnz => {
                    if let Some(val) = self.pop() {
                        if val != 0 {
                            self.ip = operand as u32;
                        }
                    }
                }

                Op::Reset => return VmSignal::Reset,
                Op::Yield => return VmSignal::None,
                Op::Tsc => {
                    let val = self.tsc as Word;
                    self.push(val);
                }
                Op::Fault => {
                    self.flags |= flags::FAULT_USER;
                    return VmSignal::Fault;
                }

                Op::Io => {
                    self.io_request(operand);
                    if self.faulted() {
                        return VmSignal::Fault;
                    }
                    return VmSignal::None;
                }
                Op::Ios => {
                    if let Some(len) = self.pop() {
                        self.io_request(len);
                        if self.faulted() {
                            return VmSignal::Fault;
                        }
                        return VmSignal::None;
                    }
                }
                Op::Ior => {
                    if let Some(len) = self.reg(operand) {
                        self.io_request(len);
                        if self.faulted() {
                            return VmSignal::Fault;
                        }
                        return VmSignal::None;
                    }
                }

                Op::Pack => {
                    if let (Some(lo), Some(hi)) = (self.pop(), self.pop()) {
                        self.push(crate::vm_pack(hi as u32, lo as u32));
                    }
                }
                Op::Unpack => {
                    if let Some(val) = self.pop() {
                        let (hi, lo) = crate::vm_unpack(val);
                        self.push(Word::from(lo));
                        self.push(Word::from(hi));
                    }
                }
            }

            if self.faulted() {
                return VmSignal::Fault;
            }
        }

        VmSignal::None
    }

    fn reg(&mut self, ix: Word) -> Option<Word> {
        if !(0..REG_COUNT as Word).contains(&ix) {
            self.flags |= flags::FAULT_REG;
            return None;
        }
        Some(self.regs[ix as usize])
    }

    fn reg_set(&mut self, ix: Word, val: Word) {
        if !(0..REG_COUNT as Word).contains(&ix) {
            self.flags |= flags::FAULT_REG;
            return;
        }
        self.regs[ix as usize] = val;
    }

    // -------------------------------------------------------------------------
    // save
    // -------------------------------------------------------------------------

    /// Serialises the machine.
    pub fn save(&self, writer: &mut SaveWriter) {
        writer.write_u32(self.ip);
        writer.write_u8(self.speed);
        writer.write_u8(self.sp);
        writer.write_u8(self.flags);
        writer.write_u8(self.io);
        writer.write_u64(self.tsc);
        for &reg in &self.regs {
            writer.write_word(reg);
        }
        for &val in &self.stack {
            writer.write_word(val);
        }
    }

    /// Deserialises a machine.
    pub fn load(reader: &mut SaveReader<'_>) -> SaveResult<Self> {
        let mut vm = Self::new(1);
        vm.ip = reader.read_u32()?;
        vm.speed = reader.read_u8()?;
        vm.sp = reader.read_u8()?;
        vm.flags = reader.read_u8()?;
        vm.io = reader.read_u8()?;
        vm.tsc = reader.read_u64()?;
        for reg in &mut vm.regs {
            *reg = reader.read_word()?;
        }
        for val in &mut vm.stack {
            *val = reader.read_word()?;
        }
        Ok(vm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::ModAssembler;
    use crate::mods::{Mod, ModId};

    fn module(asm: ModAssembler) -> Mod {
        Mod::new(ModId::new(1, 1), asm.assemble().expect("assemble"), Vec::new())
    }

    #[test]
    fn test_arithmetic() {
        let mut asm = ModAssembler::new();
        asm.push(6).push(7).op(Op::Mul).op(Op::Yield);
        let module = module(asm);

        let mut vm = Vm::new(16);
        assert_eq!(vm.exec(&module), VmSignal::None);
        assert_eq!(vm.depth(), 1);
        assert_eq!(vm.pop(), Some(42));
        assert_eq!(vm.tsc(), 4);
    }

    #[test]
    fn test_fib_loop() {
        // push 1; push 1; popr $1; loop: pushr $1; swap; dupe; popr $1;
        // add; yield; jmp @loop
        let mut asm = ModAssembler::new();
        asm.push(1).push(1).popr(1);
        asm.label("loop");
        asm.pushr(1).op(Op::Swap).op(Op::Dupe).popr(1).op(Op::Add).op(Op::Yield);
        asm.jmp(Op::Jmp, "loop");
        let module = module(asm);

        let mut vm = Vm::new(64);
        let mut fibs = Vec::new();
        for _ in 0..8 {
            assert_eq!(vm.exec(&module), VmSignal::None);
            fibs.push(vm.stack[vm.depth() - 1]);
        }
        assert_eq!(fibs, vec![2, 3, 5, 8, 13, 21, 34, 55]);
    }

    #[test]
    fn test_div_by_zero_faults() {
        let mut asm = ModAssembler::new();
        asm.push(1).push(0).op(Op::Div);
        let module = module(asm);

        let mut vm = Vm::new(16);
        assert_eq!(vm.exec(&module), VmSignal::Fault);
        assert!(vm.faulted());
        assert_ne!(vm.flags() & flags::FAULT_MATH, 0);
        // Faulted machines stay frozen.
        assert_eq!(vm.exec(&module), VmSignal::Fault);
    }

    #[test]
    fn test_stack_overflow_faults() {
        let mut asm = ModAssembler::new();
        asm.label("loop");
        asm.push(1);
        asm.jmp(Op::Jmp, "loop");
        let module = module(asm);

        let mut vm = Vm::new(255);
        assert_eq!(vm.exec(&module), VmSignal::Fault);
        assert_ne!(vm.flags() & flags::FAULT_STACK, 0);
    }

    #[test]
    fn test_bad_opcode_faults() {
        let module = Mod::new(ModId::new(1, 1), vec![0xEE], Vec::new());
        let mut vm = Vm::new(4);
        assert_eq!(vm.exec(&module), VmSignal::Fault);
        assert_ne!(vm.flags() & flags::FAULT_CODE, 0);
    }

    #[test]
    fn test_io_yields_and_drains() {
        let mut asm = ModAssembler::new();
        asm.push(11).push(22).push(33).io(3).op(Op::Yield);
        let module = module(asm);

        let mut vm = Vm::new(16);
        assert_eq!(vm.exec(&module), VmSignal::None);
        assert!(vm.io_pending());

        let mut buf = [0; IO_CAP];
        let len = vm.io_take(&mut buf);
        assert_eq!(len, 3);
        assert_eq!(&buf[..3], &[33, 22, 11]);
        assert_eq!(vm.depth(), 0);
        assert!(!vm.io_pending());
    }

    #[test]
    fn test_reset_and_load_signals() {
        let mut asm = ModAssembler::new();
        asm.op(Op::Reset);
        let mut vm = Vm::new(4);
        assert_eq!(vm.exec(&module(asm)), VmSignal::Reset);

        let mut asm = ModAssembler::new();
        asm.push(Word::from(ModId::new(3, 1).to_u32())).op(Op::Load);
        let mut vm = Vm::new(4);
        assert_eq!(vm.exec(&module(asm)), VmSignal::Load(ModId::new(3, 1)));
    }

    #[test]
    fn test_call_ret() {
        // call @fn; yield; fn: push 9; swap; ret
        let mut asm = ModAssembler::new();
        asm.jmp(Op::Call, "fn");
        asm.op(Op::Yield);
        asm.label("fn");
        asm.push(9).op(Op::Swap).op(Op::Ret);
        let module = module(asm);

        let mut vm = Vm::new(16);
        assert_eq!(vm.exec(&module), VmSignal::None);
        assert!(!vm.faulted());
        assert_eq!(vm.depth(), 1);
        assert_eq!(vm.pop(), Some(9));
    }

    #[test]
    fn test_save_round_trip() {
        let mut asm = ModAssembler::new();
        asm.push(5).push(6).op(Op::Add).op(Op::Yield);
        let module = module(asm);

        let mut vm = Vm::new(3);
        vm.exec(&module);

        let mut writer = SaveWriter::new();
        vm.save(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = SaveReader::new(&bytes);
        let loaded = Vm::load(&mut reader).unwrap();
        assert_eq!(vm, loaded);
    }
}
