//! Stack-based interpreter for ESIL, the postfix expression language used to
//! describe the side effects of machine instructions.
//!
//! An expression like `0x5,rax,=` is a comma separated sequence of words.
//! Literal words are pushed onto a bounded stack; operation words pop their
//! operands, consult or update machine state, and push results. The machine
//! state itself (registers and memory) is not owned by the interpreter: it is
//! provided through the [`host::EsilHost`] trait, which also carries the hook
//! surface for tracing or overriding individual accesses.
//!
//! ```no_run
//! use esil::{Esil, EsilConfig, EsilHost};
//! # struct Cpu;
//! # impl EsilHost for Cpu {
//! #     fn word_bits(&self) -> u32 { 64 }
//! #     fn big_endian(&self) -> bool { false }
//! #     fn read_register(&mut self, _: &str) -> Option<(u64, u32)> { None }
//! #     fn write_register(&mut self, _: &str, _: u64) -> bool { false }
//! #     fn register_size(&self, _: &str) -> Option<u32> { None }
//! #     fn read_memory(&mut self, _: u64, _: &mut [u8]) -> usize { 0 }
//! #     fn write_memory(&mut self, _: u64, _: &[u8]) -> usize { 0 }
//! # }
//! # fn main() -> esil::Result<()> {
//! let mut esil = Esil::new(Cpu, EsilConfig::default())?;
//! esil.set_address(0x8048000);
//! esil.parse("0x5,rax,=");
//! # Ok(())
//! # }
//! ```

/// Numeric and bit-level helpers.
pub mod bits;

/// Host capability trait: register file, address space, hooks.
pub mod host;

/// Interpreter state, parameter resolution, and the expression driver.
pub mod interp;

/// Builtin operation table and handlers.
pub mod ops;

/// Bounded token stack.
pub mod stack;

/// Trap taxonomy.
pub mod trap;

#[cfg(test)]
mod test_host;

pub use host::EsilHost;
pub use interp::{
    Error, Esil, EsilConfig, InterruptHandler, OpHandler, Result, TokenKind, DEFAULT_GOTO_LIMIT,
    DEFAULT_STACK_SIZE, WORD_MAX_LEN,
};
pub use ops::{MemWidth, OpCode};
pub use stack::{Stack, MIN_STACK_SIZE};
pub use trap::Trap;
