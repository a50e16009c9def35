//! Host capability trait connecting the interpreter to a register file and
//! an address space.
//!
//! The interpreter owns no machine state of its own beyond the evaluation
//! stack and the flag snapshot. Everything else (registers, memory, fault
//! policy, observation hooks) is delegated through [`EsilHost`]. Hook methods
//! default to "not handled" so a minimal host only implements the required
//! accessors.

use crate::trap::Trap;

/// Register file, address space, and hook surface for one interpreter.
///
/// Hook methods run before the corresponding default access and may consume
/// it. Returning the "not handled" value (`None` or `false` per signature)
/// lets the access fall through to the default path.
pub trait EsilHost {
    /// Width in bits of the architecture word. Governs numeric masking and
    /// untyped memory accesses.
    fn word_bits(&self) -> u32;

    /// Byte order used by memory transfers.
    fn big_endian(&self) -> bool;

    /// Reads a register, returning its value and width in bits.
    fn read_register(&mut self, name: &str) -> Option<(u64, u32)>;

    /// Writes a register. Returns false when the name is unknown.
    fn write_register(&mut self, name: &str, value: u64) -> bool;

    /// Width in bits of a named register, without reading it.
    fn register_size(&self, name: &str) -> Option<u32>;

    /// Reads into `buf` from `addr`, returning the number of bytes actually
    /// transferred. Unreadable bytes are left untouched.
    fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> usize;

    /// Writes `buf` at `addr`, returning the number of bytes actually
    /// transferred.
    fn write_memory(&mut self, addr: u64, buf: &[u8]) -> usize;

    /// Intercepts a register read. `Some` is the final value and width.
    fn hook_register_read(&mut self, _name: &str) -> Option<(u64, u32)> {
        None
    }

    /// Intercepts a register write. `true` consumes the write.
    fn hook_register_write(&mut self, _name: &str, _value: u64) -> bool {
        false
    }

    /// Intercepts a memory read. `Some(n)` consumes it, reporting `n` bytes
    /// transferred into `buf`.
    fn hook_memory_read(&mut self, _addr: u64, _buf: &mut [u8]) -> Option<usize> {
        None
    }

    /// Intercepts a memory write. `Some(n)` consumes it, reporting `n` bytes
    /// transferred.
    fn hook_memory_write(&mut self, _addr: u64, _buf: &[u8]) -> Option<usize> {
        None
    }

    /// Overrides a derived flag read (`$z`, `$c<N>`, ...). The flag name is
    /// passed without the `$` prefix.
    fn hook_flag_read(&mut self, _flag: &str) -> Option<u64> {
        None
    }

    /// Last-chance veto over a builtin operation. `true` consumes the word
    /// and the builtin handler does not run.
    fn hook_command(&mut self, _op: &str) -> bool {
        false
    }

    /// Interrupt delivery. `true` marks the interrupt handled and the
    /// registered handler map is not consulted.
    fn on_interrupt(&mut self, _number: u64) -> bool {
        false
    }

    /// Trap delivery. The return value is reported to the caller of
    /// `fire_trap`; there is no further fallback.
    fn on_trap(&mut self, _trap: Trap, _code: u64) -> bool {
        false
    }

    /// Sink for diagnostic output such as stack dumps.
    fn print(&mut self, line: &str) {
        println!("{line}");
    }
}
