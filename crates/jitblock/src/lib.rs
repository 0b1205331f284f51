//! # jitblock — Architecture-Agnostic JIT Code-Block Assembler
//!
//! `jitblock` is the code-emission backend of a JIT compiler: it accumulates
//! a stream of bytes and symbolic items, resolves label positions through an
//! iterative fixed-point relaxation, emits the final bytes into executable
//! memory, and links cross-block references.
//!
//! ## Quick Start
//!
//! ```rust
//! use jitblock::CodeBlock;
//!
//! let mut block = CodeBlock::new();
//! block.gen8(0x90).gen8(0xC3);
//! assert_eq!(block.assemble().unwrap(), 2);
//! assert_eq!(block.bytes(), vec![0x90, 0xC3]);
//! ```
//!
//! ## Features
//!
//! - **Architecture-agnostic** — instruction encoders drive a block through
//!   primitive emitters and deferred items; no ISA knowledge in the core.
//! - **Branch relaxation** — deferred items carry ordered size
//!   alternatives; a monotonic fix-point selects the final encoding with
//!   guaranteed convergence.
//! - **In-memory linking** — required/provided sites patch cross-block
//!   addresses; relocations never touch disk.
//! - **Executable memory** — RWX page allocation and entrypoint invocation
//!   with a runtime context (`std` only).
//! - **`no_std` + `alloc` core** — the assembler, linker, and address
//!   arithmetic are embeddable.

#![cfg_attr(not(feature = "std"), no_std)]
// ── Lint policy ──────────────────────────────────────────────────────────
// A code emitter performs many narrowing / sign-changing casts between
// integer widths (i64→u8, usize→u64, …) and works in dense hex literals.
// The lints below are expected and acceptable in this context.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::unreadable_literal,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::return_self_not_must_use,
    clippy::uninlined_format_args
)]

extern crate alloc;

/// Fixed-width address arithmetic and byte serialization.
pub mod addr;
/// The code block: item stream, primitive emitters, labels, deferred
/// items, and the relaxation fix-point.
pub mod block;
/// Error types for all fatal usage errors.
pub mod error;
/// Executable/data memory blocks and entrypoint invocation.
#[cfg(feature = "std")]
pub mod exec;
/// Link-object capabilities and required-site patching.
pub mod linker;
/// Listing renderer: fixed-column hex dump with annotations.
pub mod listing;
/// The runtime context passed to every emitted entrypoint.
#[cfg(feature = "std")]
pub mod runtime;

// Re-exports
pub use addr::{Addr, Endian};
pub use block::{CodeBlock, DeferredCheck, DeferredProduce, Item, LabelId};
pub use error::AsmError;
#[cfg(feature = "std")]
pub use exec::{ByteBlock, DataBlock, ExecBlock, MachineCodeBlock};
pub use linker::{AppliedPatch, Linker, ProvidedLink, RequiredLink, RequiredSite};
#[cfg(feature = "std")]
pub use runtime::{RuntimeContext, Word, HANDLER_COUNT};
