//! Builtin operation table and the handlers behind it.
//!
//! Every operation pops its operands as tokens, resolves them through the
//! interpreter, and pushes results back as hex literals. Handlers report
//! failure with `false`; the driver logs and keeps running, leaving any trap
//! the handler recorded in place.

use crate::bits;
use crate::host::EsilHost;
use crate::interp::{Esil, Stop, TokenKind};
use crate::trap::Trap;

/// Access width of a sized memory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemWidth {
    Byte,
    Half,
    Word,
    Quad,
    /// Width of the architecture word.
    Native,
}

impl MemWidth {
    pub fn bits(self, word_bits: u32) -> u32 {
        match self {
            MemWidth::Byte => 8,
            MemWidth::Half => 16,
            MemWidth::Word => 32,
            MemWidth::Quad => 64,
            MemWidth::Native => word_bits,
        }
    }
}

/// Closed set of builtin operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Interrupt,
    Trap,
    Compare,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    If,
    Nop,
    Shl,
    ShlAssign,
    Shr,
    ShrAssign,
    Ror,
    Rol,
    And,
    AndAssign,
    Or,
    OrAssign,
    Not,
    NotAssign,
    Assign,
    Mul,
    MulAssign,
    Xor,
    XorAssign,
    Add,
    AddAssign,
    Inc,
    IncAssign,
    Sub,
    SubAssign,
    Dec,
    DecAssign,
    Div,
    DivAssign,
    Mod,
    ModAssign,
    Poke(MemWidth),
    PokeMany,
    Peek(MemWidth),
    PeekMany,
    MemOrAssign(MemWidth),
    MemXorAssign(MemWidth),
    MemAndAssign(MemWidth),
    MemAddAssign(MemWidth),
    MemSubAssign(MemWidth),
    MemModAssign(MemWidth),
    MemDivAssign(MemWidth),
    MemMulAssign(MemWidth),
    MemIncAssign(MemWidth),
    MemDecAssign(MemWidth),
    StackDump,
    Pop,
    Todo,
    Goto,
    Break,
    Clear,
    Dup,
    Num,
    Swap,
}

/// Spelling table for every builtin operation.
pub const BUILTIN_OPS: &[(&str, OpCode)] = &[
    ("$", OpCode::Interrupt),
    ("==", OpCode::Compare),
    ("<", OpCode::LessThan),
    (">", OpCode::GreaterThan),
    ("<=", OpCode::LessThanOrEqual),
    (">=", OpCode::GreaterThanOrEqual),
    ("?{", OpCode::If),
    ("<<", OpCode::Shl),
    ("<<=", OpCode::ShlAssign),
    (">>", OpCode::Shr),
    (">>=", OpCode::ShrAssign),
    (">>>", OpCode::Ror),
    ("<<<", OpCode::Rol),
    ("&", OpCode::And),
    ("&=", OpCode::AndAssign),
    ("}", OpCode::Nop),
    ("|", OpCode::Or),
    ("|=", OpCode::OrAssign),
    ("!", OpCode::Not),
    ("!=", OpCode::NotAssign),
    ("=", OpCode::Assign),
    ("*", OpCode::Mul),
    ("*=", OpCode::MulAssign),
    ("^", OpCode::Xor),
    ("^=", OpCode::XorAssign),
    ("+", OpCode::Add),
    ("+=", OpCode::AddAssign),
    ("++", OpCode::Inc),
    ("++=", OpCode::IncAssign),
    ("-", OpCode::Sub),
    ("-=", OpCode::SubAssign),
    ("--", OpCode::Dec),
    ("--=", OpCode::DecAssign),
    ("/", OpCode::Div),
    ("/=", OpCode::DivAssign),
    ("%", OpCode::Mod),
    ("%=", OpCode::ModAssign),
    ("=[]", OpCode::Poke(MemWidth::Native)),
    ("=[1]", OpCode::Poke(MemWidth::Byte)),
    ("=[2]", OpCode::Poke(MemWidth::Half)),
    ("=[4]", OpCode::Poke(MemWidth::Word)),
    ("=[8]", OpCode::Poke(MemWidth::Quad)),
    ("|=[]", OpCode::MemOrAssign(MemWidth::Native)),
    ("|=[1]", OpCode::MemOrAssign(MemWidth::Byte)),
    ("|=[2]", OpCode::MemOrAssign(MemWidth::Half)),
    ("|=[4]", OpCode::MemOrAssign(MemWidth::Word)),
    ("|=[8]", OpCode::MemOrAssign(MemWidth::Quad)),
    ("^=[]", OpCode::MemXorAssign(MemWidth::Native)),
    ("^=[1]", OpCode::MemXorAssign(MemWidth::Byte)),
    ("^=[2]", OpCode::MemXorAssign(MemWidth::Half)),
    ("^=[4]", OpCode::MemXorAssign(MemWidth::Word)),
    ("^=[8]", OpCode::MemXorAssign(MemWidth::Quad)),
    ("&=[]", OpCode::MemAndAssign(MemWidth::Native)),
    ("&=[1]", OpCode::MemAndAssign(MemWidth::Byte)),
    ("&=[2]", OpCode::MemAndAssign(MemWidth::Half)),
    ("&=[4]", OpCode::MemAndAssign(MemWidth::Word)),
    ("&=[8]", OpCode::MemAndAssign(MemWidth::Quad)),
    ("+=[]", OpCode::MemAddAssign(MemWidth::Native)),
    ("+=[1]", OpCode::MemAddAssign(MemWidth::Byte)),
    ("+=[2]", OpCode::MemAddAssign(MemWidth::Half)),
    ("+=[4]", OpCode::MemAddAssign(MemWidth::Word)),
    ("+=[8]", OpCode::MemAddAssign(MemWidth::Quad)),
    ("-=[]", OpCode::MemSubAssign(MemWidth::Native)),
    ("-=[1]", OpCode::MemSubAssign(MemWidth::Byte)),
    ("-=[2]", OpCode::MemSubAssign(MemWidth::Half)),
    ("-=[4]", OpCode::MemSubAssign(MemWidth::Word)),
    ("-=[8]", OpCode::MemSubAssign(MemWidth::Quad)),
    ("%=[]", OpCode::MemModAssign(MemWidth::Native)),
    ("%=[1]", OpCode::MemModAssign(MemWidth::Byte)),
    ("%=[2]", OpCode::MemModAssign(MemWidth::Half)),
    ("%=[4]", OpCode::MemModAssign(MemWidth::Word)),
    ("%=[8]", OpCode::MemModAssign(MemWidth::Quad)),
    ("/=[]", OpCode::MemDivAssign(MemWidth::Native)),
    ("/=[1]", OpCode::MemDivAssign(MemWidth::Byte)),
    ("/=[2]", OpCode::MemDivAssign(MemWidth::Half)),
    ("/=[4]", OpCode::MemDivAssign(MemWidth::Word)),
    ("/=[8]", OpCode::MemDivAssign(MemWidth::Quad)),
    ("*=[]", OpCode::MemMulAssign(MemWidth::Native)),
    ("*=[1]", OpCode::MemMulAssign(MemWidth::Byte)),
    ("*=[2]", OpCode::MemMulAssign(MemWidth::Half)),
    ("*=[4]", OpCode::MemMulAssign(MemWidth::Word)),
    ("*=[8]", OpCode::MemMulAssign(MemWidth::Quad)),
    ("++=[]", OpCode::MemIncAssign(MemWidth::Native)),
    ("++=[1]", OpCode::MemIncAssign(MemWidth::Byte)),
    ("++=[2]", OpCode::MemIncAssign(MemWidth::Half)),
    ("++=[4]", OpCode::MemIncAssign(MemWidth::Word)),
    ("++=[8]", OpCode::MemIncAssign(MemWidth::Quad)),
    ("--=[]", OpCode::MemDecAssign(MemWidth::Native)),
    ("--=[1]", OpCode::MemDecAssign(MemWidth::Byte)),
    ("--=[2]", OpCode::MemDecAssign(MemWidth::Half)),
    ("--=[4]", OpCode::MemDecAssign(MemWidth::Word)),
    ("--=[8]", OpCode::MemDecAssign(MemWidth::Quad)),
    ("[]", OpCode::Peek(MemWidth::Native)),
    ("[*]", OpCode::PeekMany),
    ("=[*]", OpCode::PokeMany),
    ("[1]", OpCode::Peek(MemWidth::Byte)),
    ("[2]", OpCode::Peek(MemWidth::Half)),
    ("[4]", OpCode::Peek(MemWidth::Word)),
    ("[8]", OpCode::Peek(MemWidth::Quad)),
    ("STACK", OpCode::StackDump),
    ("POP", OpCode::Pop),
    ("TODO", OpCode::Todo),
    ("GOTO", OpCode::Goto),
    ("BREAK", OpCode::Break),
    ("CLEAR", OpCode::Clear),
    ("DUP", OpCode::Dup),
    ("NUM", OpCode::Num),
    ("SWAP", OpCode::Swap),
    ("TRAP", OpCode::Trap),
];

impl<H: EsilHost> Esil<H> {
    pub(crate) fn execute(&mut self, op: OpCode) -> bool {
        match op {
            OpCode::Interrupt => self.op_interrupt(),
            OpCode::Trap => self.op_trap(),
            OpCode::Compare => self.op_compare(),
            OpCode::LessThan => self.op_relational(|d, s| d < s),
            OpCode::GreaterThan => self.op_relational(|d, s| d > s),
            OpCode::LessThanOrEqual => self.op_relational(|d, s| d <= s),
            OpCode::GreaterThanOrEqual => self.op_relational(|d, s| d >= s),
            OpCode::If => self.op_if(),
            OpCode::Nop => true,
            OpCode::Shl => self.op_binary(shl),
            OpCode::ShlAssign => self.op_shift_assign(shl),
            OpCode::Shr => self.op_binary(shr),
            OpCode::ShrAssign => self.op_shift_assign(shr),
            OpCode::Ror => self.op_rotate(false),
            OpCode::Rol => self.op_rotate(true),
            OpCode::And => self.op_binary(|d, s| d & s),
            OpCode::AndAssign => self.op_bitwise_assign(|d, s| d & s),
            OpCode::Or => self.op_binary(|d, s| d | s),
            OpCode::OrAssign => self.op_bitwise_assign(|d, s| d | s),
            OpCode::Xor => self.op_binary(|d, s| d ^ s),
            OpCode::XorAssign => self.op_bitwise_assign(|d, s| d ^ s),
            OpCode::Not => self.op_not(),
            OpCode::NotAssign => self.op_not_assign(),
            OpCode::Assign => self.op_assign(),
            OpCode::Mul => self.op_arith(u64::wrapping_mul, |d, s| d * s),
            OpCode::MulAssign => self.op_arith_assign(u64::wrapping_mul, |d, s| d * s),
            OpCode::Add => self.op_arith(u64::wrapping_add, |d, s| d + s),
            OpCode::AddAssign => self.op_arith_assign(u64::wrapping_add, |d, s| d + s),
            OpCode::Inc => self.op_step(1),
            OpCode::IncAssign => self.op_step_assign(1),
            OpCode::Sub => self.op_arith(u64::wrapping_sub, |d, s| d - s),
            OpCode::SubAssign => self.op_arith_assign(u64::wrapping_sub, |d, s| d - s),
            OpCode::Dec => self.op_step(u64::MAX),
            OpCode::DecAssign => self.op_step_assign(u64::MAX),
            OpCode::Div => self.op_div(),
            OpCode::DivAssign => self.op_div_assign(),
            OpCode::Mod => self.op_mod(),
            OpCode::ModAssign => self.op_mod_assign(),
            OpCode::Poke(width) => self.op_poke(width),
            OpCode::PokeMany => self.op_poke_many(),
            OpCode::Peek(width) => self.op_peek(width),
            OpCode::PeekMany => self.op_peek_many(),
            OpCode::MemOrAssign(width) => self.op_mem_rmw(width, |d, s| d | s),
            OpCode::MemXorAssign(width) => self.op_mem_rmw(width, |d, s| d ^ s),
            OpCode::MemAndAssign(width) => self.op_mem_rmw(width, |d, s| d & s),
            OpCode::MemAddAssign(width) => self.op_mem_rmw(width, u64::wrapping_add),
            OpCode::MemSubAssign(width) => self.op_mem_rmw(width, u64::wrapping_sub),
            OpCode::MemModAssign(width) => self.op_mem_divmod(width, signed_mod),
            OpCode::MemDivAssign(width) => self.op_mem_divmod(width, |d, s| d / s),
            OpCode::MemMulAssign(width) => self.op_mem_rmw(width, u64::wrapping_mul),
            OpCode::MemIncAssign(width) => self.op_mem_step(width, 1),
            OpCode::MemDecAssign(width) => self.op_mem_step(width, u64::MAX),
            OpCode::StackDump => {
                self.dump_stack();
                true
            }
            OpCode::Pop => {
                self.pop();
                true
            }
            OpCode::Todo => {
                self.stop = Stop::Todo;
                true
            }
            OpCode::Goto => self.op_goto(),
            OpCode::Break => {
                self.stop = Stop::Break;
                true
            }
            OpCode::Clear => {
                self.stack.clear();
                true
            }
            OpCode::Dup => self.stack.duplicate(),
            OpCode::Num => self.op_num(),
            OpCode::Swap => self.stack.swap(),
        }
    }

    fn op_interrupt(&mut self) -> bool {
        match self.pop_reg_or_num() {
            Some(number) => self.fire_interrupt(number),
            None => false,
        }
    }

    fn op_trap(&mut self) -> bool {
        let (Some(kind), Some(code)) = (self.pop_reg_or_num(), self.pop_reg_or_num()) else {
            log::debug!("trap: missing parameters on stack");
            return false;
        };
        self.trap = Trap::from_code(kind);
        self.trap_code = code;
        match self.trap {
            Some(trap) => self.fire_trap(trap, code),
            None => false,
        }
    }

    /// Updates the flag snapshot from a comparison without pushing a result.
    fn op_compare(&mut self) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            return false;
        };
        let Some(d) = self.resolve(&dst) else {
            return false;
        };
        let Some(s) = self.resolve(&src) else {
            return false;
        };
        self.old = d;
        self.cur = d.wrapping_sub(s);
        if let Some(bits) = self.host.register_size(&dst) {
            self.lastsz = bits;
        } else if let Some(bits) = self.host.register_size(&src) {
            self.lastsz = bits;
        }
        true
    }

    // "4,5,<" compares 5 against 4 and pushes 0
    fn op_relational(&mut self, cmp: fn(u64, u64) -> bool) -> bool {
        let (Some(d), Some(s)) = (self.pop_reg_or_num(), self.pop_reg_or_num()) else {
            log::debug!("relational: missing parameters on stack");
            return false;
        };
        self.push_value(cmp(d, s) as u64)
    }

    fn op_if(&mut self) -> bool {
        let Some(src) = self.pop() else {
            return false;
        };
        let value = self.resolve(&src).unwrap_or(0);
        if value == 0 {
            self.skip = true;
        }
        true
    }

    fn op_binary(&mut self, apply: fn(u64, u64) -> u64) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            return false;
        };
        let Some(d) = self.resolve(&dst) else {
            return false;
        };
        let Some(s) = self.resolve(&src) else {
            log::debug!("binary op: missing operand");
            return false;
        };
        self.push_value(apply(d, s))
    }

    fn op_shift_assign(&mut self, apply: fn(u64, u64) -> u64) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            return false;
        };
        let Some((d, _)) = self.read_register(&dst) else {
            return false;
        };
        let Some(s) = self.resolve(&src) else {
            log::debug!("shift assign: missing operand");
            return false;
        };
        self.old = d;
        self.cur = apply(d, s);
        self.lastsz = self.register_width(&dst);
        self.write_register(&dst, self.cur);
        true
    }

    fn op_rotate(&mut self, left: bool) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            return false;
        };
        let Some((value, bits)) = self.resolve_sized(&dst) else {
            return false;
        };
        let Some(count) = self.resolve(&src) else {
            log::debug!("rotate: missing operand");
            return false;
        };
        let mask = u64::from(bits.max(1) - 1);
        let n = (count & mask) as u32;
        let m = (n.wrapping_neg() as u64 & mask) as u32;
        let result = if left {
            (value << n) | (value >> m)
        } else {
            (value >> n) | (value << m)
        };
        self.push_value(result)
    }

    fn op_not(&mut self) -> bool {
        let Some(src) = self.pop() else {
            log::debug!("not: empty stack");
            return false;
        };
        let Some(value) = self.resolve(&src).or_else(|| self.reg_or_num(&src)) else {
            log::debug!("{:#010x} not: unknown operand {src}", self.address);
            return false;
        };
        self.push_value((value == 0) as u64)
    }

    fn op_not_assign(&mut self) -> bool {
        let Some(src) = self.pop() else {
            log::debug!("not assign: empty stack");
            return false;
        };
        let Some((value, _)) = self.read_register(&src) else {
            return false;
        };
        self.write_register(&src, (value == 0) as u64);
        true
    }

    fn op_assign(&mut self) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            log::debug!("assign: invalid parameters");
            return false;
        };
        let Some((prior, _)) = self.read_register_no_hook(&dst) else {
            log::debug!("assign: invalid destination {dst}");
            return false;
        };
        let Some(value) = self.resolve(&src) else {
            log::debug!("assign: invalid source {src}");
            return false;
        };
        let written = self.write_register(&dst, value);
        if written && self.token_kind(&src) != TokenKind::Internal {
            self.old = prior;
            self.cur = value;
            self.lastsz = self.register_width(&dst);
        }
        written
    }

    fn op_bitwise_assign(&mut self, apply: fn(u64, u64) -> u64) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            return false;
        };
        let Some((d, _)) = self.read_register(&dst) else {
            return false;
        };
        let Some(s) = self.resolve(&src) else {
            log::debug!("bitwise assign: missing operand");
            return false;
        };
        let result = apply(d, s);
        if self.token_kind(&src) != TokenKind::Internal {
            self.old = d;
            self.cur = result;
            self.lastsz = self.register_width(&dst);
        }
        self.write_register(&dst, result);
        true
    }

    fn op_arith(&mut self, int: fn(u64, u64) -> u64, float: fn(f64, f64) -> f64) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            log::debug!("arith: invalid parameters");
            return false;
        };
        let kind = self.token_kind(&src);
        let Some(s) = self.resolve(&src) else {
            return false;
        };
        let Some(d) = self.resolve(&dst) else {
            return false;
        };
        let result = match kind {
            TokenKind::Float => float(f64::from_bits(d), f64::from_bits(s)).to_bits(),
            _ => int(d, s),
        };
        self.push_value(result)
    }

    fn op_arith_assign(&mut self, int: fn(u64, u64) -> u64, float: fn(f64, f64) -> f64) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            log::debug!("arith assign: invalid parameters");
            return false;
        };
        let Some(s) = self.resolve(&src) else {
            return false;
        };
        let Some((d, _)) = self.read_register(&dst) else {
            return false;
        };
        match self.token_kind(&src) {
            TokenKind::Number => {
                self.old = d;
                self.cur = int(d, s);
                self.lastsz = self.register_width(&dst);
                self.write_register(&dst, self.cur);
            }
            TokenKind::Float => {
                self.old = d;
                self.cur = float(f64::from_bits(d), f64::from_bits(s)).to_bits();
                self.lastsz = self.register_width(&dst);
                self.write_register(&dst, self.cur);
            }
            _ => {
                // no flag update for register or internal sources
                self.write_register(&dst, int(d, s));
            }
        }
        true
    }

    fn op_step(&mut self, delta: u64) -> bool {
        let Some(value) = self.pop_resolved() else {
            log::debug!("step: invalid parameters");
            return false;
        };
        self.push_value(value.wrapping_add(delta))
    }

    fn op_step_assign(&mut self, delta: u64) -> bool {
        let Some(reg) = self.pop() else {
            return false;
        };
        if self.token_kind(&reg) != TokenKind::Register {
            log::debug!("step assign: {reg} is not a register");
            return false;
        }
        let Some(value) = self.resolve(&reg) else {
            return false;
        };
        self.old = value;
        self.cur = value.wrapping_add(delta);
        self.write_register(&reg, self.cur);
        self.lastsz = self.register_width(&reg);
        true
    }

    fn op_div(&mut self) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            log::debug!("div: invalid parameters");
            return false;
        };
        let kind = self.token_kind(&src);
        let Some(s) = self.resolve(&src) else {
            return false;
        };
        let Some(d) = self.resolve(&dst) else {
            return false;
        };
        if kind == TokenKind::Float {
            let fs = f64::from_bits(s);
            if fs == 0.0 {
                log::debug!("{:#010x} div: division by zero", self.address);
                self.set_trap(Trap::DivideByZero, 0);
                return false;
            }
            let result = (f64::from_bits(d) / fs).to_bits();
            self.old = d;
            self.cur = result;
            self.push_value(result)
        } else {
            if s == 0 {
                log::debug!("{:#010x} div: division by zero", self.address);
                self.set_trap(Trap::DivideByZero, 0);
                return false;
            }
            self.push_value(d / s)
        }
    }

    fn op_div_assign(&mut self) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            log::debug!("div assign: invalid parameters");
            return false;
        };
        let Some(s) = self.resolve(&src) else {
            return false;
        };
        let Some((d, _)) = self.read_register(&dst) else {
            log::debug!("div assign: empty stack");
            return false;
        };
        if s == 0 {
            self.set_trap(Trap::DivideByZero, 0);
            return true;
        }
        match self.token_kind(&src) {
            TokenKind::Number => {
                self.old = d;
                self.cur = d / s;
                self.lastsz = self.register_width(&dst);
                self.write_register(&dst, self.cur);
            }
            TokenKind::Float => {
                let fs = f64::from_bits(s);
                if fs == 0.0 {
                    self.set_trap(Trap::DivideByZero, 0);
                    return true;
                }
                self.old = d;
                self.cur = (f64::from_bits(d) / fs).to_bits();
                self.lastsz = self.register_width(&dst);
                self.write_register(&dst, self.cur);
            }
            _ => {
                self.write_register(&dst, d / s);
            }
        }
        true
    }

    fn op_mod(&mut self) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            return false;
        };
        let Some(s) = self.resolve(&src) else {
            log::debug!("mod: invalid parameters");
            return false;
        };
        let Some(d) = self.resolve(&dst) else {
            return false;
        };
        if s == 0 {
            log::debug!("{:#010x} mod: division by zero", self.address);
            self.set_trap(Trap::DivideByZero, 0);
            return true;
        }
        self.push_value(signed_mod(d, s))
    }

    fn op_mod_assign(&mut self) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            return false;
        };
        let Some(s) = self.resolve(&src) else {
            log::debug!("mod assign: invalid parameters");
            return false;
        };
        let Some((d, _)) = self.read_register(&dst) else {
            log::debug!("mod assign: empty stack");
            return false;
        };
        if s == 0 {
            log::debug!("{:#010x} mod assign: division by zero", self.address);
            self.set_trap(Trap::DivideByZero, 0);
            return true;
        }
        let result = signed_mod(d, s);
        if self.token_kind(&src) != TokenKind::Internal {
            self.old = d;
            self.cur = result;
            self.lastsz = self.register_width(&dst);
        }
        self.write_register(&dst, result);
        true
    }

    /// Writes the low bytes of a value at the popped address, updating the
    /// flag snapshot from the prior memory contents.
    pub(crate) fn op_poke(&mut self, width: MemWidth) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            return false;
        };
        let bits = width.bits(self.host.word_bits());
        let bytes = (bits / 8) as usize;
        if bits % 8 != 0 || bytes == 0 || bytes > 8 {
            return false;
        }
        let Some(mut value) = self.resolve(&src) else {
            return false;
        };
        let Some(addr) = self.resolve(&dst) else {
            return false;
        };
        let bitmask = bits::mask(bits - 1);
        if self.token_kind(&src) != TokenKind::Internal {
            let mut prior = [0u8; 8];
            self.read_memory(addr, &mut prior[..bytes]);
            self.old = bits::value_from_bytes(&prior[..bytes], self.host.big_endian());
            self.cur = value & bitmask;
            self.lastsz = bits;
            value &= bitmask;
        }
        let mut buf = [0u8; 8];
        bits::value_to_bytes(value, &mut buf[..bytes], self.host.big_endian());
        self.write_memory(addr, &buf[..bytes])
    }

    /// Reads a sized value at the popped address and pushes it. The value is
    /// pushed even when the read came up short; missing bytes read as zero.
    pub(crate) fn op_peek(&mut self, width: MemWidth) -> bool {
        let Some(dst) = self.pop() else {
            return false;
        };
        let bits = width.bits(self.host.word_bits());
        let bytes = (bits / 8) as usize;
        if bits % 8 != 0 || bytes == 0 || bytes > 8 {
            return false;
        }
        let Some(addr) = self.reg_or_num(&dst) else {
            return false;
        };
        let mut buf = [0u8; 8];
        let complete = self.read_memory(addr, &mut buf[..bytes]);
        let value = bits::value_from_bytes(&buf[..bytes], self.host.big_endian());
        self.push_value(value & bits::mask(bits - 1));
        self.lastsz = bits;
        complete
    }

    /// Pops a count and that many values, storing them as consecutive
    /// destination-sized words starting at the popped address.
    fn op_poke_many(&mut self) -> bool {
        let Some(dst) = self.pop() else {
            return false;
        };
        let Some((mut addr, bits)) = self.resolve_sized(&dst) else {
            return false;
        };
        let bytes = ((bits / 8).clamp(1, 8)) as usize;
        let Some(count) = self.pop() else {
            return false;
        };
        let count = self.reg_or_num(&count).unwrap_or(0);
        for _ in 0..count {
            let Some(token) = self.pop() else {
                break;
            };
            let value = self.reg_or_num(&token).unwrap_or(0);
            let mut buf = [0u8; 8];
            bits::value_to_bytes(value, &mut buf[..bytes], self.host.big_endian());
            if !self.write_memory(addr, &buf[..bytes]) {
                self.trap = Some(Trap::Unhandled);
            }
            addr = addr.wrapping_add(bytes as u64);
        }
        true
    }

    /// Pops a count and that many register names, loading each from
    /// consecutive 32-bit words starting at the popped address.
    fn op_peek_many(&mut self) -> bool {
        let Some(dst) = self.pop() else {
            return false;
        };
        let Some(mut addr) = self.reg_or_num(&dst) else {
            return false;
        };
        let Some(count) = self.pop() else {
            return false;
        };
        let count = self.reg_or_num(&count).unwrap_or(0);
        for _ in 0..count {
            let Some(reg) = self.pop() else {
                log::debug!("peek many: missing destination register");
                return false;
            };
            let mut buf = [0u8; 4];
            if self.read_memory(addr, &mut buf) {
                let value = bits::value_from_bytes(&buf, self.host.big_endian());
                self.write_register(&reg, value);
            } else {
                log::debug!("peek many: cannot read {:#010x}", addr);
            }
            addr = addr.wrapping_add(4);
        }
        true
    }

    /// Read-modify-write on memory: peek, combine with the popped source,
    /// poke the result back to the same address.
    fn op_mem_rmw(&mut self, width: MemWidth, apply: fn(u64, u64) -> u64) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            return false;
        };
        let Some(s) = self.resolve(&src) else {
            log::debug!("memory rmw: invalid parameters");
            return false;
        };
        self.mem_rmw_tail(width, &dst, s, apply)
    }

    /// Same as [`Esil::op_mem_rmw`] with a zero-divisor guard before any
    /// memory access happens.
    fn op_mem_divmod(&mut self, width: MemWidth, apply: fn(u64, u64) -> u64) -> bool {
        let (Some(dst), Some(src)) = (self.pop(), self.pop()) else {
            return false;
        };
        let Some(s) = self.resolve(&src) else {
            log::debug!("memory divmod: invalid parameters");
            return false;
        };
        if s == 0 {
            log::debug!("{:#010x} memory divmod: division by zero", self.address);
            self.set_trap(Trap::DivideByZero, 0);
            return false;
        }
        self.mem_rmw_tail(width, &dst, s, apply)
    }

    fn op_mem_step(&mut self, width: MemWidth, delta: u64) -> bool {
        let Some(dst) = self.pop() else {
            return false;
        };
        self.mem_rmw_tail(width, &dst, delta, u64::wrapping_add)
    }

    fn mem_rmw_tail(
        &mut self,
        width: MemWidth,
        dst: &str,
        s: u64,
        apply: fn(u64, u64) -> u64,
    ) -> bool {
        if !self.push(dst) {
            return false;
        }
        let mut ok = self.op_peek(width);
        let Some(prior) = self.pop_resolved() else {
            log::debug!("memory rmw: invalid parameters");
            return false;
        };
        ok &= self.push_value(apply(prior, s)) && self.push(dst) && self.op_poke(width);
        if !ok {
            log::debug!("memory rmw: incomplete access");
        }
        ok
    }

    fn op_goto(&mut self) -> bool {
        let Some(src) = self.pop() else {
            return true;
        };
        if !src.is_empty() {
            if let Some(index) = self.resolve(&src) {
                self.goto_target = Some(index as usize);
            }
        }
        true
    }

    /// Resolves the top of the stack and pushes it back as a plain number.
    fn op_num(&mut self) -> bool {
        let Some(token) = self.pop() else {
            return false;
        };
        let Some(value) = self.resolve(&token) else {
            return false;
        };
        self.push_value(value)
    }
}

fn shl(value: u64, count: u64) -> u64 {
    if count > 63 {
        0
    } else {
        value << count
    }
}

fn shr(value: u64, count: u64) -> u64 {
    if count > 63 {
        0
    } else {
        value >> count
    }
}

/// Remainder with the dividend interpreted as two's complement: a negative
/// dividend folds the result back into `0..s`.
fn signed_mod(d: u64, s: u64) -> u64 {
    let m = d.wrapping_rem(s);
    if (d as i64) < 0 {
        m.wrapping_add(s)
    } else {
        m
    }
}
