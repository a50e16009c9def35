//! Trap taxonomy raised by interpreter operations.

/// Fault categories an expression can raise during evaluation.
///
/// A pending trap does not abort the parse by itself; it is recorded on the
/// interpreter together with a trap code and cleared at the start of the next
/// expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trap {
    /// No handler accepted the condition (also used for interpreter-internal
    /// faults such as pushing onto a full stack).
    Unhandled,
    /// Explicit breakpoint request.
    Breakpoint,
    /// Integer division or remainder with a zero divisor.
    DivideByZero,
    /// A memory write transferred fewer bytes than requested.
    WriteError,
    /// A memory read transferred fewer bytes than requested.
    ReadError,
    /// Host-defined trap category.
    Code(u64),
}

impl Trap {
    /// Numeric identifier of the trap type.
    pub fn code(self) -> u64 {
        match self {
            Trap::Unhandled => 1,
            Trap::Breakpoint => 2,
            Trap::DivideByZero => 3,
            Trap::WriteError => 4,
            Trap::ReadError => 5,
            Trap::Code(code) => code,
        }
    }

    /// Inverse of [`Trap::code`]. Zero means no trap and maps to `None`.
    pub fn from_code(code: u64) -> Option<Trap> {
        match code {
            0 => None,
            1 => Some(Trap::Unhandled),
            2 => Some(Trap::Breakpoint),
            3 => Some(Trap::DivideByZero),
            4 => Some(Trap::WriteError),
            5 => Some(Trap::ReadError),
            other => Some(Trap::Code(other)),
        }
    }

    /// Short human-readable name used by stack dumps and logs.
    pub fn name(self) -> &'static str {
        match self {
            Trap::Unhandled => "unhandled",
            Trap::Breakpoint => "breakpoint",
            Trap::DivideByZero => "divbyzero",
            Trap::WriteError => "write-err",
            Trap::ReadError => "read-err",
            Trap::Code(_) => "unknown",
        }
    }
}

impl std::fmt::Display for Trap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
