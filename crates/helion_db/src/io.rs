//! # IO Vocabulary
//!
//! Every machine speaks the same small protocol: an IO verb (an atom in a
//! fixed range) plus up to a handful of words. Unknown verbs are silently
//! ignored by recipients; failures come back as error codes on the log
//! and as `io_fail` on the caller's stack.

use helion_core::atom::{Atoms, ATOM_IO_MIN};
use helion_core::symbol::Symbol;
use helion_core::Word;

/// Error-code identity base, inside the IO atom range.
pub const ATOM_IOE_BASE: u32 = ATOM_IO_MIN + 0x80;

macro_rules! io_enum {
    ($($variant:ident = $off:literal, $name:literal;)*) => {
        /// An IO verb.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Io {
            /// No-op verb; never dispatched.
            #[default]
            Nil = 0x00,
            $(
                #[doc = $name]
                $variant = $off,
            )*
        }

        impl Io {
            /// Atom identity of this verb.
            #[inline]
            #[must_use]
            pub const fn as_word(self) -> Word {
                ATOM_IO_MIN as Word + self as u8 as Word
            }

            /// Decodes an atom word inside the verb range.
            #[must_use]
            pub const fn from_word(word: Word) -> Option<Self> {
                let min = ATOM_IO_MIN as Word;
                if word < min || word > min + 0x7F {
                    return None;
                }
                match (word - min) as u8 {
                    $( $off => Some(Self::$variant), )*
                    _ => None,
                }
            }

            /// Atom name, e.g. `io-ping`.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    Self::Nil => "io-nil",
                    $( Self::$variant => $name, )*
                }
            }

            /// Every verb, for atom registration.
            pub const ALL: &'static [Self] = &[ $( Self::$variant, )* ];
        }
    };
}

io_enum! {
    Ok = 0x01, "io-ok";
    Fail = 0x02, "io-fail";
    Step = 0x03, "io-step";
    Arrive = 0x04, "io-arrive";
    Return = 0x05, "io-return";
    Ping = 0x06, "io-ping";
    Pong = 0x07, "io-pong";
    State = 0x08, "io-state";
    Activate = 0x09, "io-activate";
    Reset = 0x0A, "io-reset";
    Id = 0x0B, "io-id";
    Item = 0x0C, "io-item";
    Tape = 0x0D, "io-tape";
    Mod = 0x0E, "io-mod";
    Loop = 0x0F, "io-loop";
    Value = 0x10, "io-value";
    Target = 0x11, "io-target";
    Log = 0x12, "io-log";
    Tick = 0x13, "io-tick";
    Coord = 0x14, "io-coord";
    Name = 0x15, "io-name";
    Send = 0x16, "io-send";
    Recv = 0x17, "io-recv";
    DbgAttach = 0x18, "io-dbg-attach";
    DbgDetach = 0x19, "io-dbg-detach";
    DbgBreak = 0x1A, "io-dbg-break";
    DbgStep = 0x1B, "io-dbg-step";
    Specs = 0x1C, "io-specs";
    Get = 0x1D, "io-get";
    Set = 0x1E, "io-set";
    Cas = 0x1F, "io-cas";
    Channel = 0x2A, "io-channel";
    Transmit = 0x2B, "io-transmit";
    Receive = 0x2C, "io-receive";
    Scan = 0x2D, "io-scan";
    Probe = 0x2E, "io-probe";
    Count = 0x2F, "io-count";
    Pack = 0x30, "io-pack";
    Load = 0x31, "io-load";
    Unload = 0x32, "io-unload";
    Launch = 0x33, "io-launch";
    Grow = 0x34, "io-grow";
    Input = 0x35, "io-input";
    HasItem = 0x36, "io-has-item";
    HasLoop = 0x37, "io-has-loop";
    Size = 0x38, "io-size";
    Rate = 0x39, "io-rate";
    Work = 0x3A, "io-work";
    Output = 0x3B, "io-output";
    Cargo = 0x3C, "io-cargo";
    Energy = 0x3D, "io-energy";
    Active = 0x3E, "io-active";
}

// -----------------------------------------------------------------------------
// errors
// -----------------------------------------------------------------------------

macro_rules! ioe_enum {
    ($($variant:ident = $off:literal, $name:literal;)*) => {
        /// A machine-level error code, logged and returned on the stack.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum IoErr {
            $(
                #[doc = $name]
                $variant = $off,
            )*
        }

        impl IoErr {
            /// Atom identity of this error code.
            #[inline]
            #[must_use]
            pub const fn as_word(self) -> Word {
                ATOM_IOE_BASE as Word + self as u8 as Word
            }

            /// Atom name, e.g. `ioe-starved`.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name, )*
                }
            }

            /// Every error code, for atom registration.
            pub const ALL: &'static [Self] = &[ $( Self::$variant, )* ];
        }
    };
}

ioe_enum! {
    MissingArg = 0x00, "ioe-missing-arg";
    A0Invalid = 0x01, "ioe-a0-invalid";
    A1Invalid = 0x02, "ioe-a1-invalid";
    A0Unknown = 0x03, "ioe-a0-unknown";
    OutOfSpace = 0x04, "ioe-out-of-space";
    OutOfRange = 0x05, "ioe-out-of-range";
    Starved = 0x06, "ioe-starved";
    InvalidState = 0x07, "ioe-invalid-state";
    VmFault = 0x08, "ioe-vm-fault";
}

/// Registers verb and error atoms at their fixed identities.
pub fn populate_atoms(atoms: &mut Atoms) {
    for &io in Io::ALL {
        let ok = atoms.set(Symbol::new(io.name()), io.as_word() as u64);
        debug_assert!(ok);
    }
    for &err in IoErr::ALL {
        let ok = atoms.set(Symbol::new(err.name()), err.as_word() as u64);
        debug_assert!(ok);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_round_trip() {
        for &io in Io::ALL {
            assert_eq!(Io::from_word(io.as_word()), Some(io));
        }
        assert_eq!(Io::from_word(0), None);
        assert_eq!(Io::from_word(Word::from(ATOM_IO_MIN)), None);
    }

    #[test]
    fn test_error_range_is_disjoint() {
        for &io in Io::ALL {
            for &err in IoErr::ALL {
                assert_ne!(io.as_word(), err.as_word());
            }
        }
    }
}
