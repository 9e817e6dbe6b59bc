//! # Helion VM
//!
//! The virtual machine hosted by brain machines: a small stack machine
//! with four registers, a 64-word stack, an instruction pointer, a cycle
//! counter and a handful of flags. It executes compiled mods, yields to
//! its host on IO instructions and latches a fault flag on any violation.
//!
//! The crate also owns the mod representation - compiled bytecode plus a
//! public-symbol index, identified by `(major, version)` - and the
//! registry brains resolve mods through.

pub mod asm;
pub mod mods;
pub mod op;
pub mod vm;

pub use asm::ModAssembler;
pub use mods::{Mod, ModId, Mods};
pub use op::Op;
pub use vm::{Vm, VmSignal, IO_CAP, STACK_CAP};

/// Packs two 32-bit halves into one word: `hi` in the top half.
#[inline]
#[must_use]
pub const fn vm_pack(hi: u32, lo: u32) -> helion_core::Word {
    (((hi as u64) << 32) | lo as u64) as helion_core::Word
}

/// Splits a word into its `(hi, lo)` halves.
#[inline]
#[must_use]
pub const fn vm_unpack(word: helion_core::Word) -> (u32, u32) {
    ((word as u64 >> 32) as u32, word as u64 as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let word = vm_pack(0xDEAD, 0xBEEF);
        assert_eq!(vm_unpack(word), (0xDEAD, 0xBEEF));
        assert_eq!(vm_unpack(vm_pack(u32::MAX, 0)), (u32::MAX, 0));
    }
}
