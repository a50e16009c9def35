//! Interpreter state and the expression driver.
//!
//! An [`Esil`] owns the bounded token stack, the flag snapshot fed by the
//! operations, and the pending trap. Expressions are split into words on
//! commas; each word is either a builtin or registered operation or a literal
//! that gets pushed. Control flow (`?{`, `}{`, `}`, `GOTO`, `BREAK`, `TODO`)
//! is handled here, with a per-expression word budget guarding against
//! `GOTO` loops that never terminate.

use std::collections::HashMap;

use crate::bits;
use crate::host::EsilHost;
use crate::ops::{OpCode, BUILTIN_OPS};
use crate::stack::{Stack, MIN_STACK_SIZE};
use crate::trap::Trap;

/// Longest accepted word, in bytes.
pub const WORD_MAX_LEN: usize = 62;

/// Words an expression may run before the loop guard trips.
pub const DEFAULT_GOTO_LIMIT: u32 = 4096;

/// Default stack capacity in tokens.
pub const DEFAULT_STACK_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stack size {0} is below the required minimum {min}", min = MIN_STACK_SIZE)]
    StackTooSmall(usize),
    #[error("expression left nothing on the stack")]
    EmptyStack,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handler for a host-registered operation. Runs instead of any builtin with
/// the same spelling.
pub type OpHandler<H> = fn(&mut Esil<H>) -> bool;

/// Handler for a registered interrupt number.
pub type InterruptHandler<H> = fn(&mut Esil<H>, u64) -> bool;

/// Classification of a stack token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `$`-prefixed pseudo-register derived from interpreter state.
    Internal,
    /// Hex or decimal integer literal.
    Number,
    /// `Fx`-prefixed IEEE-754 double given by its bit pattern.
    Float,
    /// Name known to the host's register file.
    Register,
    Invalid,
}

/// Why the driver should stop consuming words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Stop {
    #[default]
    None,
    Break,
    Todo,
}

/// Construction parameters for an interpreter.
#[derive(Debug, Clone)]
pub struct EsilConfig {
    /// Stack capacity in tokens. Must be at least [`MIN_STACK_SIZE`].
    pub stack_size: usize,
    /// Word budget per expression, tripping the infinite loop guard.
    pub goto_limit: u32,
    /// Record a trap when a memory access transfers fewer bytes than asked.
    pub io_trap: bool,
    /// Suppress the default memory write path. Hooks still observe writes.
    pub no_write: bool,
    /// Emit per-access trace logging.
    pub debug: bool,
}

impl Default for EsilConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            goto_limit: DEFAULT_GOTO_LIMIT,
            io_trap: false,
            no_write: false,
            debug: false,
        }
    }
}

struct Word {
    text: String,
    /// Word was terminated by `;` rather than `,`.
    hard_stop: bool,
}

fn tokenize(expr: &str) -> Option<Vec<Word>> {
    let mut words = Vec::new();
    for segment in expr.split(',') {
        let (text, hard_stop) = match segment.find(';') {
            Some(pos) => (&segment[..pos], true),
            None => (segment, false),
        };
        if text.len() > WORD_MAX_LEN {
            return None;
        }
        words.push(Word {
            text: text.to_owned(),
            hard_stop,
        });
    }
    Some(words)
}

fn parse_number(token: &str) -> Option<u64> {
    if let Some(hex) = token.strip_prefix("0x") {
        return u64::from_str_radix(hex, 16).ok();
    }
    if let Some(dec) = token.strip_prefix('-') {
        return dec.parse::<u64>().ok().map(u64::wrapping_neg);
    }
    token.parse::<u64>().ok()
}

/// Expression interpreter bound to one host.
pub struct Esil<H: EsilHost> {
    pub(crate) host: H,
    pub(crate) stack: Stack,

    // result snapshot feeding the derived flags
    pub(crate) old: u64,
    pub(crate) cur: u64,
    pub(crate) lastsz: u32,

    pub(crate) address: u64,
    pub(crate) trap: Option<Trap>,
    pub(crate) trap_code: u64,

    // driver state, reset per expression
    pub(crate) skip: bool,
    pub(crate) repeat: bool,
    pub(crate) stop: Stop,
    pub(crate) goto_target: Option<usize>,
    goto_budget: u32,
    goto_limit: u32,

    delay: u64,
    jump_target: u64,
    jump_target_set: u64,

    ops: HashMap<&'static str, OpCode>,
    custom_ops: HashMap<String, OpHandler<H>>,
    interrupts: HashMap<u64, InterruptHandler<H>>,

    io_trap: bool,
    no_write: bool,
    debug: bool,
}

impl<H: EsilHost> Esil<H> {
    pub fn new(host: H, config: EsilConfig) -> Result<Self> {
        if config.stack_size < MIN_STACK_SIZE {
            return Err(Error::StackTooSmall(config.stack_size));
        }
        Ok(Self {
            host,
            stack: Stack::new(config.stack_size),
            old: 0,
            cur: 0,
            lastsz: 0,
            address: 0,
            trap: None,
            trap_code: 0,
            skip: false,
            repeat: false,
            stop: Stop::None,
            goto_target: None,
            goto_budget: config.goto_limit,
            goto_limit: config.goto_limit,
            delay: 0,
            jump_target: 0,
            jump_target_set: 0,
            ops: BUILTIN_OPS.iter().copied().collect(),
            custom_ops: HashMap::new(),
            interrupts: HashMap::new(),
            io_trap: config.io_trap,
            no_write: config.no_write,
            debug: config.debug,
        })
    }

    /// Evaluates a comma separated expression. Returns `true` when the whole
    /// expression ran to its end, `false` when it was cut short by `BREAK`,
    /// `TODO`, a `;` terminator, an out-of-range `GOTO`, or the loop guard.
    ///
    /// A recorded trap does not by itself stop evaluation; check [`Esil::trap`]
    /// afterwards. The pending trap is cleared when the next expression
    /// starts.
    pub fn parse(&mut self, expr: &str) -> bool {
        if expr.is_empty() {
            return false;
        }
        self.trap = None;
        self.trap_code = 0;
        let Some(words) = tokenize(expr) else {
            log::debug!("invalid expression: word longer than {WORD_MAX_LEN} bytes");
            return false;
        };
        'restart: loop {
            self.repeat = false;
            self.skip = false;
            self.goto_target = None;
            self.stop = Stop::None;
            self.goto_budget = self.goto_limit;
            let mut index = 0;
            while index < words.len() {
                let word = &words[index];
                if !self.run_word(&word.text) {
                    return false;
                }
                if self.repeat {
                    continue 'restart;
                }
                if let Some(target) = self.goto_target.take() {
                    if target >= words.len() {
                        log::debug!("cannot find word {target}");
                        return false;
                    }
                    index = target;
                    continue;
                }
                match self.stop {
                    Stop::None => {}
                    Stop::Break => return false,
                    Stop::Todo => {
                        let rest = words[index + 1..]
                            .iter()
                            .map(|w| w.text.as_str())
                            .collect::<Vec<_>>()
                            .join(",");
                        log::warn!("{:#010x} TODO: {rest}", self.address);
                        return false;
                    }
                }
                if word.hard_stop {
                    return false;
                }
                index += 1;
            }
            return true;
        }
    }

    fn run_word(&mut self, word: &str) -> bool {
        self.goto_budget = self.goto_budget.saturating_sub(1);
        if self.goto_budget == 0 {
            log::debug!("{:#010x} infinite loop detected", self.address);
            self.trap = Some(Trap::Unhandled);
            self.stop = Stop::Break;
            return false;
        }

        // block structure is honored even while skipping
        if word == "}{" {
            self.skip = !self.skip;
            return true;
        }
        if word == "}" {
            self.skip = false;
            return true;
        }
        if self.skip {
            return true;
        }

        let custom = self.custom_ops.get(word).copied();
        if let Some(handler) = custom {
            if self.host.hook_command(word) {
                return true;
            }
            if !handler(self) {
                log::debug!("{:#010x} operation {word} failed", self.address);
            }
            return true;
        }
        let builtin = self.ops.get(word).copied();
        if let Some(op) = builtin {
            if self.host.hook_command(word) {
                return true;
            }
            if !self.execute(op) {
                log::debug!("{:#010x} operation {word} failed", self.address);
            }
            return true;
        }

        if word.is_empty() || word == "," {
            return true;
        }

        if !self.push(word) {
            log::debug!("stack is full");
            self.trap = Some(Trap::Unhandled);
            self.trap_code = 1;
        }
        true
    }

    /// Evaluates an expression and interprets its topmost result as a truth
    /// value. An expression that leaves nothing behind is an error; a result
    /// that resolves to neither a register nor a number reads as false.
    pub fn condition(&mut self, expr: &str) -> Result<bool> {
        let expr = expr.trim_start_matches(' ');
        self.parse(expr);
        let top = self.pop().ok_or(Error::EmptyStack)?;
        Ok(self.reg_or_num(&top).map(|v| v != 0).unwrap_or(false))
    }

    pub fn push(&mut self, token: &str) -> bool {
        self.stack.push(token)
    }

    /// Pushes a value as a hex literal.
    pub fn push_value(&mut self, value: u64) -> bool {
        self.push(&format!("{value:#x}"))
    }

    pub fn pop(&mut self) -> Option<String> {
        self.stack.pop()
    }

    pub(crate) fn pop_resolved(&mut self) -> Option<u64> {
        let token = self.pop()?;
        self.resolve(&token)
    }

    pub(crate) fn pop_reg_or_num(&mut self) -> Option<u64> {
        let token = self.pop()?;
        self.reg_or_num(&token)
    }

    /// Register value or numeric literal, without the full classifier.
    pub(crate) fn reg_or_num(&mut self, token: &str) -> Option<u64> {
        if let Some((value, _)) = self.read_register(token) {
            return Some(value);
        }
        parse_number(token)
    }

    pub fn token_kind(&self, token: &str) -> TokenKind {
        let bytes = token.as_bytes();
        if bytes.is_empty() {
            return TokenKind::Invalid;
        }
        if bytes[0] == b'$' && bytes.len() > 1 {
            return TokenKind::Internal;
        }
        if token.starts_with("0x") {
            return TokenKind::Number;
        }
        if token.starts_with("Fx") {
            return TokenKind::Float;
        }
        if (bytes[0].is_ascii_digit() || bytes[0] == b'-')
            && bytes[1..].iter().all(u8::is_ascii_digit)
        {
            return TokenKind::Number;
        }
        if self.host.register_size(token).is_some() {
            return TokenKind::Register;
        }
        TokenKind::Invalid
    }

    pub(crate) fn resolve(&mut self, token: &str) -> Option<u64> {
        self.resolve_sized(token).map(|(value, _)| value)
    }

    /// Resolves a token to its value and width in bits. Literals carry the
    /// architecture word width, registers their own.
    pub(crate) fn resolve_sized(&mut self, token: &str) -> Option<(u64, u32)> {
        let word_bits = self.host.word_bits();
        match self.token_kind(token) {
            TokenKind::Internal => self.internal_read(token).map(|v| (v, word_bits)),
            TokenKind::Number => parse_number(token).map(|v| (v, word_bits)),
            TokenKind::Float => u64::from_str_radix(&token[2..], 16)
                .ok()
                .map(|v| (v, word_bits)),
            TokenKind::Register => self.read_register(token),
            TokenKind::Invalid => {
                log::debug!("invalid argument {token}");
                self.stop = Stop::Break;
                None
            }
        }
    }

    fn internal_read(&mut self, token: &str) -> Option<u64> {
        let flag = token.strip_prefix('$')?;
        if flag.is_empty() {
            return None;
        }
        if let Some(value) = self.host.hook_flag_read(flag) {
            return Some(value);
        }
        match flag.as_bytes()[0] {
            b'$' => Some(self.address),
            b'z' => Some((self.cur == 0) as u64),
            b'b' => {
                let bit = flag[1..].parse().unwrap_or(0);
                Some(self.borrow_check(bit) as u64)
            }
            b'c' => {
                let bit = flag[1..].parse().unwrap_or(0);
                Some(self.carry_check(bit) as u64)
            }
            b'o' => Some(self.overflow_check() as u64),
            b'p' => Some(bits::parity_even(self.cur) as u64),
            b'r' => Some(u64::from(self.host.word_bits() / 8)),
            b's' => Some(self.sign_check() as u64),
            b'd' if flag == "ds" => Some(self.delay),
            b'j' => match flag {
                "jt" => Some(self.jump_target),
                "js" => Some(self.jump_target_set),
                _ => None,
            },
            _ => None,
        }
    }

    fn internal_write(&mut self, token: &str, value: u64) -> bool {
        let Some(flag) = token.strip_prefix('$') else {
            return false;
        };
        match flag {
            "ds" => {
                self.delay = value;
                true
            }
            "jt" => {
                self.jump_target = value;
                self.jump_target_set = 1;
                true
            }
            // the raw value is stored, not a truth flag
            "js" => {
                self.jump_target_set = value;
                true
            }
            _ => false,
        }
    }

    fn carry_check(&self, bit: u32) -> bool {
        let m = bits::mask(bit & 0x3f);
        (self.cur & m) < (self.old & m)
    }

    fn borrow_check(&self, bit: u32) -> bool {
        let bit = ((bit & 0x3f) + 0x3f) & 0x3f;
        let m = bits::mask(bit);
        (self.old & m) < (self.cur & m)
    }

    fn overflow_check(&self) -> bool {
        if self.lastsz < 2 {
            return false;
        }
        self.carry_check(self.lastsz - 1) ^ self.carry_check(self.lastsz - 2)
    }

    fn sign_check(&self) -> bool {
        if self.lastsz == 0 {
            return false;
        }
        (self.cur >> (self.lastsz - 1).min(63)) & 1 == 1
    }

    /// Reads a register or `$`-pseudo-register through the hook chain.
    pub fn read_register(&mut self, name: &str) -> Option<(u64, u32)> {
        if name.len() > 1 && name.starts_with('$') {
            let word_bits = self.host.word_bits();
            return self.internal_read(name).map(|v| (v, word_bits));
        }
        if let Some(result) = self.host.hook_register_read(name) {
            return Some(result);
        }
        self.host.read_register(name)
    }

    /// Register read that bypasses the host's read hook, used to observe a
    /// destination's prior value without a second hook callback.
    pub fn read_register_no_hook(&mut self, name: &str) -> Option<(u64, u32)> {
        if name.len() > 1 && name.starts_with('$') {
            let word_bits = self.host.word_bits();
            return self.internal_read(name).map(|v| (v, word_bits));
        }
        self.host.read_register(name)
    }

    /// Writes a register or `$`-pseudo-register through the hook chain.
    pub fn write_register(&mut self, name: &str, value: u64) -> bool {
        if self.debug {
            log::trace!("{name} = {value:#x}");
        }
        if self.host.hook_register_write(name, value) {
            return true;
        }
        if name.len() > 1 && name.starts_with('$') {
            return self.internal_write(name, value);
        }
        self.host.write_register(name, value)
    }

    pub(crate) fn register_width(&self, name: &str) -> u32 {
        self.host.register_size(name).unwrap_or(0)
    }

    /// Reads through the hook chain. Returns `true` when every byte was
    /// transferred; a short default-path read records a read trap when
    /// `io_trap` is set, with the faulting address as the trap code.
    pub fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> bool {
        if buf.is_empty() {
            return false;
        }
        let transferred = match self.host.hook_memory_read(addr, buf) {
            Some(n) => n,
            None => {
                let n = self.host.read_memory(addr, buf);
                if n != buf.len() && self.io_trap {
                    self.set_trap(Trap::ReadError, addr);
                }
                n
            }
        };
        if self.debug {
            log::trace!("{addr:#010x} R> {}", bits::hex_bytes(buf));
        }
        transferred == buf.len()
    }

    /// Writes through the hook chain. `no_write` suppresses the default path
    /// without recording a trap; hooks still observe the write.
    pub fn write_memory(&mut self, addr: u64, buf: &[u8]) -> bool {
        if buf.is_empty() {
            return false;
        }
        if self.debug {
            log::trace!("{addr:#010x} <W {}", bits::hex_bytes(buf));
        }
        if let Some(n) = self.host.hook_memory_write(addr, buf) {
            return n == buf.len();
        }
        if self.no_write {
            return true;
        }
        let n = self.host.write_memory(addr, buf);
        if n != buf.len() && self.io_trap {
            self.set_trap(Trap::WriteError, addr);
        }
        n == buf.len()
    }

    /// Renders the pending trap (if any) and the stack from top to bottom
    /// through the host's print sink.
    pub fn dump_stack(&mut self) {
        if let Some(trap) = self.trap {
            let line = format!(
                "trap type {} code {:#010x} {}",
                trap.code(),
                self.trap_code,
                trap.name()
            );
            self.host.print(&line);
        }
        let items: Vec<String> = self.stack.iter().rev().map(str::to_owned).collect();
        for item in &items {
            self.host.print(item);
        }
    }

    /// Registers an operation under a spelling, shadowing any builtin.
    pub fn register_op(&mut self, name: &str, handler: OpHandler<H>) {
        self.custom_ops.insert(name.to_owned(), handler);
    }

    pub fn register_interrupt(&mut self, number: u64, handler: InterruptHandler<H>) {
        self.interrupts.insert(number, handler);
    }

    /// Delivers an interrupt: the host hook first, then the registered
    /// handler map.
    pub fn fire_interrupt(&mut self, number: u64) -> bool {
        if self.host.on_interrupt(number) {
            return true;
        }
        if let Some(handler) = self.interrupts.get(&number).copied() {
            return handler(self, number);
        }
        log::debug!("{:#010x} unhandled interrupt {number:#x}", self.address);
        false
    }

    pub fn fire_trap(&mut self, trap: Trap, code: u64) -> bool {
        self.host.on_trap(trap, code)
    }

    pub(crate) fn set_trap(&mut self, trap: Trap, code: u64) {
        self.trap = Some(trap);
        self.trap_code = code;
    }

    /// Asks the driver to restart the current expression from its first word
    /// once the current operation returns.
    pub fn request_restart(&mut self) {
        self.repeat = true;
    }

    /// Sets `$$`, the address of the instruction being emulated.
    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn trap(&self) -> Option<Trap> {
        self.trap
    }

    pub fn trap_code(&self) -> u64 {
        self.trap_code
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;

    fn interp() -> Esil<TestHost> {
        Esil::new(TestHost::default(), EsilConfig::default()).unwrap()
    }

    #[test]
    fn rejects_tiny_stack() {
        let config = EsilConfig {
            stack_size: 2,
            ..EsilConfig::default()
        };
        assert!(matches!(
            Esil::new(TestHost::default(), config),
            Err(Error::StackTooSmall(2))
        ));
    }

    #[test]
    fn token_classification() {
        let esil = interp();
        assert_eq!(esil.token_kind("$z"), TokenKind::Internal);
        assert_eq!(esil.token_kind("$$"), TokenKind::Internal);
        assert_eq!(esil.token_kind("0x20"), TokenKind::Number);
        assert_eq!(esil.token_kind("42"), TokenKind::Number);
        assert_eq!(esil.token_kind("-17"), TokenKind::Number);
        assert_eq!(esil.token_kind("Fx3ff0000000000000"), TokenKind::Float);
        assert_eq!(esil.token_kind("rax"), TokenKind::Register);
        assert_eq!(esil.token_kind("bogus"), TokenKind::Invalid);
        assert_eq!(esil.token_kind("$"), TokenKind::Invalid);
    }

    #[test]
    fn number_parsing() {
        assert_eq!(parse_number("0xff"), Some(0xff));
        assert_eq!(parse_number("10"), Some(10));
        assert_eq!(parse_number("-1"), Some(u64::MAX));
        assert_eq!(parse_number("0xzz"), None);
    }

    #[test]
    fn tokenizer_marks_semicolon_stops() {
        let words = tokenize("1,rax,=;0x2,rbx,=").unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(words[2].text, "=");
        assert!(words[2].hard_stop);
        assert!(!words[3].hard_stop);
    }

    #[test]
    fn tokenizer_rejects_oversized_words() {
        let long = "a".repeat(WORD_MAX_LEN + 1);
        assert!(tokenize(&long).is_none());
        let mut esil = interp();
        assert!(!esil.parse(&long));
        // words before the oversized one never run either
        assert!(!esil.parse(&format!("0x7,rax,=,{long}")));
        assert_eq!(esil.host().register("rax"), 0);
    }

    #[test]
    fn literal_push_on_full_stack_traps() {
        let config = EsilConfig {
            stack_size: MIN_STACK_SIZE,
            ..EsilConfig::default()
        };
        let mut esil = Esil::new(TestHost::default(), config).unwrap();
        assert!(esil.parse("1,2,3,4"));
        assert_eq!(esil.trap(), Some(Trap::Unhandled));
        assert_eq!(esil.trap_code(), 1);
        assert_eq!(esil.stack().depth(), MIN_STACK_SIZE);
    }

    #[test]
    fn loop_guard_trips_on_self_goto() {
        let mut esil = interp();
        assert!(!esil.parse("0,GOTO"));
        assert_eq!(esil.trap(), Some(Trap::Unhandled));
    }

    #[test]
    fn goto_out_of_range_stops() {
        let mut esil = interp();
        assert!(!esil.parse("99,GOTO"));
    }

    #[test]
    fn condition_requires_a_result() {
        let mut esil = interp();
        assert!(matches!(esil.condition("1,rax,="), Err(Error::EmptyStack)));
        assert!(esil.condition("1").unwrap());
        assert!(!esil.condition("  0").unwrap());
    }

    #[test]
    fn jump_target_pseudo_registers() {
        let mut esil = interp();
        assert!(esil.parse("0,$js,=,0x4141,$jt,="));
        assert_eq!(esil.resolve("$jt"), Some(0x4141));
        // writing $jt marks the target as set
        assert_eq!(esil.resolve("$js"), Some(1));
        assert!(esil.parse("0,$js,="));
        assert_eq!(esil.resolve("$js"), Some(0));
        // $js keeps the raw written value
        assert!(esil.parse("2,$js,="));
        assert_eq!(esil.resolve("$js"), Some(2));
    }

    #[test]
    fn address_pseudo_register() {
        let mut esil = interp();
        esil.set_address(0x8048000);
        assert_eq!(esil.resolve("$$"), Some(0x8048000));
    }

    #[test]
    fn custom_op_shadows_builtin() {
        fn always_seven(esil: &mut Esil<TestHost>) -> bool {
            esil.pop();
            esil.pop();
            esil.push_value(7)
        }
        let mut esil = interp();
        esil.register_op("+", always_seven);
        assert!(esil.parse("1,2,+"));
        assert_eq!(esil.pop().as_deref(), Some("0x7"));
    }

    #[test]
    fn registered_interrupt_handler_runs() {
        fn handler(esil: &mut Esil<TestHost>, number: u64) -> bool {
            esil.write_register("rax", number)
        }
        let mut esil = interp();
        esil.register_interrupt(0x80, handler);
        assert!(esil.parse("0x80,$"));
        assert_eq!(esil.host().register("rax"), 0x80);
    }

    #[test]
    fn word_budget_counts_every_word() {
        let config = EsilConfig {
            goto_limit: 4,
            ..EsilConfig::default()
        };
        let mut esil = Esil::new(TestHost::default(), config).unwrap();
        assert!(esil.parse("1,2,3"));
        assert!(!esil.parse("1,2,3,4"));
        assert_eq!(esil.trap(), Some(Trap::Unhandled));
    }
}
