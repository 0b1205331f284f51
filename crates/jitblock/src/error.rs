//! Error types for the assembler, linker, and memory substrate.
//!
//! Every variant is a fatal usage error: it reports a contract violation by
//! the driving encoder or by a link object. There is no retry and no partial
//! recovery; assembly of the affected block terminates and no partial state
//! is promised afterwards.

use alloc::string::String;
use core::fmt;

/// Assembly or link error, identifying the kind of violation and enough
/// context to locate it (label name, item index, widths, offsets).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AsmError {
    /// Emission or link width is not one of the supported widths.
    InvalidWidth {
        /// The rejected width in bits.
        width: u32,
    },

    /// Label was placed into the item stream more than once.
    DuplicateLabel {
        /// The duplicated label name.
        label: String,
    },

    /// Every alternative of a deferred item rejected its position.
    UnresolvedDeferred {
        /// Index of the deferred item in the stream.
        index: usize,
    },

    /// A deferred produce emitted a byte count different from the size its
    /// accepted check declared.
    DeferredSizeMismatch {
        /// Index of the deferred item in the stream.
        index: usize,
        /// Size declared by the accepted check alternative.
        expected: usize,
        /// Byte count the produce alternative actually emitted.
        actual: usize,
    },

    /// `add_offset` carried out of the address width.
    AddressOverflow {
        /// Width of the address in bits.
        bits: u32,
    },

    /// `sub_offset` borrowed out of the address width.
    AddressUnderflow {
        /// Width of the address in bits.
        bits: u32,
    },

    /// Binary operation between addresses of different widths.
    AddressWidthMismatch {
        /// Width of the left operand in bits.
        left: u32,
        /// Width of the right operand in bits.
        right: u32,
    },

    /// `link_value` returned a byte count different from `width() / 8`.
    LinkValueLengthMismatch {
        /// Byte count the required site expects.
        expected: usize,
        /// Byte count the link object produced.
        actual: usize,
    },

    /// `origin` target is behind the current position.
    OriginBackwards {
        /// The requested absolute position.
        target: u64,
        /// The position the stream had already reached.
        pos: u64,
    },

    /// Byte access or linker write past the end of a block.
    OutOfBounds {
        /// The offending offset (one past the highest touched byte for
        /// multi-byte writes).
        offset: usize,
        /// Length of the accessed block.
        len: usize,
    },

    /// The relaxation fix-point exceeded its computed pass bound.
    RelaxationLimit {
        /// Maximum number of passes that was allowed.
        max: usize,
    },

    /// Residual caller contract violation (mismatched deferred alternative
    /// arity, unknown label id, and similar).
    Usage {
        /// Description of the violated contract.
        msg: String,
    },

    /// Executable-memory allocation or release failure.
    #[cfg(feature = "std")]
    Exec {
        /// The underlying OS error description.
        msg: String,
    },
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmError::InvalidWidth { width } => {
                write!(f, "invalid width: {} bits (expected 8, 16, 32 or 64)", width)
            }
            AsmError::DuplicateLabel { label } => {
                write!(f, "label '{}' placed more than once", label)
            }
            AsmError::UnresolvedDeferred { index } => {
                write!(
                    f,
                    "deferred item #{}: every alternative rejected its position",
                    index
                )
            }
            AsmError::DeferredSizeMismatch {
                index,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "deferred item #{}: produced {} bytes, declared {}",
                    index, actual, expected
                )
            }
            AsmError::AddressOverflow { bits } => {
                write!(f, "address overflow ({}-bit)", bits)
            }
            AsmError::AddressUnderflow { bits } => {
                write!(f, "address underflow ({}-bit)", bits)
            }
            AsmError::AddressWidthMismatch { left, right } => {
                write!(f, "address width mismatch: {} vs {} bits", left, right)
            }
            AsmError::LinkValueLengthMismatch { expected, actual } => {
                write!(
                    f,
                    "link value is {} bytes, required site expects {}",
                    actual, expected
                )
            }
            AsmError::OriginBackwards { target, pos } => {
                write!(
                    f,
                    "origin target 0x{:x} is behind current position 0x{:x}",
                    target, pos
                )
            }
            AsmError::OutOfBounds { offset, len } => {
                write!(f, "offset {} out of bounds (block length {})", offset, len)
            }
            AsmError::RelaxationLimit { max } => {
                write!(
                    f,
                    "relaxation exceeded maximum of {} passes (possible oscillation)",
                    max
                )
            }
            AsmError::Usage { msg } => write!(f, "{}", msg),
            #[cfg(feature = "std")]
            AsmError::Exec { msg } => write!(f, "executable memory: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AsmError {}
