//! # Mod Assembler
//!
//! Programmatic bytecode builder: tests and tooling construct programs by
//! emitting opcodes and labels, then assemble with forward references
//! patched. The lisp front-end that produces mods in the full toolchain
//! is an external collaborator; the simulation core only ever consumes
//! the bytes this shape of builder produces.

use std::collections::BTreeMap;

use thiserror::Error;

use helion_core::Word;

use crate::op::{Op, Operand};

/// Assembly errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// A jump references a label that was never defined.
    #[error("undefined label '{0}'")]
    UndefinedLabel(String),

    /// A label was defined twice.
    #[error("duplicate label '{0}'")]
    DuplicateLabel(String),

    /// Opcode used with the wrong emit method.
    #[error("opcode {0:?} expects a {1:?} operand")]
    BadOperand(Op, Operand),
}

/// Bytecode builder with label patching.
#[derive(Debug, Default)]
pub struct ModAssembler {
    code: Vec<u8>,
    labels: BTreeMap<String, u32>,
    patches: Vec<(usize, String)>,
    errors: Vec<AsmError>,
}

impl ModAssembler {
    /// Empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current instruction pointer.
    #[must_use]
    pub fn ip(&self) -> u32 {
        self.code.len() as u32
    }

    /// Defines a label at the current position.
    pub fn label(&mut self, name: &str) -> &mut Self {
        if self.labels.insert(name.to_owned(), self.ip()).is_some() {
            self.errors.push(AsmError::DuplicateLabel(name.to_owned()));
        }
        self
    }

    /// Emits an operand-less opcode.
    pub fn op(&mut self, op: Op) -> &mut Self {
        if op.operand() != Operand::Nil {
            self.errors.push(AsmError::BadOperand(op, op.operand()));
            return self;
        }
        self.code.push(op as u8);
        self
    }

    /// Emits `push <word>`.
    pub fn push(&mut self, val: Word) -> &mut Self {
        self.lit(Op::Push, val)
    }

    /// Emits an opcode with a literal operand.
    pub fn lit(&mut self, op: Op, val: Word) -> &mut Self {
        if op.operand() != Operand::Lit {
            self.errors.push(AsmError::BadOperand(op, op.operand()));
            return self;
        }
        self.code.push(op as u8);
        self.code.extend_from_slice(&val.to_le_bytes());
        self
    }

    /// Emits `pushr $reg`.
    pub fn pushr(&mut self, reg: u8) -> &mut Self {
        self.reg(Op::Pushr, reg)
    }

    /// Emits `popr $reg`.
    pub fn popr(&mut self, reg: u8) -> &mut Self {
        self.reg(Op::Popr, reg)
    }

    /// Emits an opcode with a register operand.
    pub fn reg(&mut self, op: Op, reg: u8) -> &mut Self {
        if op.operand() != Operand::Reg {
            self.errors.push(AsmError::BadOperand(op, op.operand()));
            return self;
        }
        self.code.push(op as u8);
        self.code.push(reg);
        self
    }

    /// Emits an IO request of `len` words.
    pub fn io(&mut self, len: u8) -> &mut Self {
        self.code.push(Op::Io as u8);
        self.code.push(len);
        self
    }

    /// Emits a jump-family opcode targeting `label`.
    pub fn jmp(&mut self, op: Op, label: &str) -> &mut Self {
        if op.operand() != Operand::Off {
            self.errors.push(AsmError::BadOperand(op, op.operand()));
            return self;
        }
        self.code.push(op as u8);
        self.patches.push((self.code.len(), label.to_owned()));
        self.code.extend_from_slice(&0u32.to_le_bytes());
        self
    }

    /// Patches labels and returns the bytecode.
    pub fn assemble(mut self) -> Result<Vec<u8>, AsmError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }

        for (at, label) in self.patches {
            let Some(&ip) = self.labels.get(&label) else {
                return Err(AsmError::UndefinedLabel(label));
            };
            self.code[at..at + 4].copy_from_slice(&ip.to_le_bytes());
        }
        Ok(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_reference() {
        let mut asm = ModAssembler::new();
        asm.jmp(Op::Jmp, "end");
        asm.push(1);
        asm.label("end");
        asm.op(Op::Yield);

        let code = asm.assemble().unwrap();
        // jmp(1+4) + push(1+8) = 14; "end" sits at 14.
        assert_eq!(&code[1..5], &14u32.to_le_bytes());
    }

    #[test]
    fn test_undefined_label() {
        let mut asm = ModAssembler::new();
        asm.jmp(Op::Jmp, "missing");
        assert_eq!(asm.assemble(), Err(AsmError::UndefinedLabel("missing".into())));
    }

    #[test]
    fn test_bad_operand() {
        let mut asm = ModAssembler::new();
        asm.op(Op::Push);
        assert!(matches!(asm.assemble(), Err(AsmError::BadOperand(Op::Push, _))));
    }
}
