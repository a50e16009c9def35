//! End-to-end expression scenarios against an in-memory host.

use std::collections::BTreeMap;
use std::ops::Range;

use esil::{Esil, EsilConfig, EsilHost, Trap};

/// Host with a handful of x86-style registers and one mapped memory window.
struct Machine {
    registers: BTreeMap<String, (u64, u32)>,
    memory: BTreeMap<u64, u8>,
    mapped: Range<u64>,
    printed: Vec<String>,
    bits: u32,
    big_endian: bool,
    veto_op: Option<&'static str>,
    interrupts_seen: Vec<u64>,
    handle_interrupts: bool,
}

impl Default for Machine {
    fn default() -> Self {
        let mut registers = BTreeMap::new();
        for name in ["rax", "rbx", "rcx", "rdx", "rsp"] {
            registers.insert(name.to_owned(), (0u64, 64u32));
        }
        registers.insert("eax".to_owned(), (0, 32));
        registers.insert("al".to_owned(), (0, 8));
        Self {
            registers,
            memory: BTreeMap::new(),
            mapped: 0x1000..0x2000,
            printed: Vec::new(),
            bits: 64,
            big_endian: false,
            veto_op: None,
            interrupts_seen: Vec::new(),
            handle_interrupts: false,
        }
    }
}

impl Machine {
    fn register(&self, name: &str) -> u64 {
        self.registers[name].0
    }

    fn byte(&self, addr: u64) -> u8 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }
}

impl EsilHost for Machine {
    fn word_bits(&self) -> u32 {
        self.bits
    }

    fn big_endian(&self) -> bool {
        self.big_endian
    }

    fn read_register(&mut self, name: &str) -> Option<(u64, u32)> {
        self.registers.get(name).copied()
    }

    fn write_register(&mut self, name: &str, value: u64) -> bool {
        match self.registers.get_mut(name) {
            Some(slot) => {
                slot.0 = value;
                true
            }
            None => false,
        }
    }

    fn register_size(&self, name: &str) -> Option<u32> {
        self.registers.get(name).map(|&(_, size)| size)
    }

    fn read_memory(&mut self, addr: u64, buf: &mut [u8]) -> usize {
        for (i, byte) in buf.iter_mut().enumerate() {
            let at = addr.wrapping_add(i as u64);
            if !self.mapped.contains(&at) {
                return i;
            }
            *byte = self.memory.get(&at).copied().unwrap_or(0);
        }
        buf.len()
    }

    fn write_memory(&mut self, addr: u64, buf: &[u8]) -> usize {
        for (i, &byte) in buf.iter().enumerate() {
            let at = addr.wrapping_add(i as u64);
            if !self.mapped.contains(&at) {
                return i;
            }
            self.memory.insert(at, byte);
        }
        buf.len()
    }

    fn hook_command(&mut self, op: &str) -> bool {
        self.veto_op == Some(op)
    }

    fn on_interrupt(&mut self, number: u64) -> bool {
        self.interrupts_seen.push(number);
        self.handle_interrupts
    }

    fn print(&mut self, line: &str) {
        self.printed.push(line.to_owned());
    }
}

fn interp() -> Esil<Machine> {
    Esil::new(Machine::default(), EsilConfig::default()).unwrap()
}

#[test]
fn assignment_writes_register() {
    let mut esil = interp();
    assert!(esil.parse("0x5,rax,="));
    assert_eq!(esil.host().register("rax"), 0x5);
    assert!(esil.stack().is_empty());
}

#[test]
fn comparison_sets_zero_flag_without_pushing() {
    let mut esil = interp();
    esil.host_mut().write_register("rax", 5);
    esil.host_mut().write_register("rbx", 5);
    assert!(esil.parse("rax,rbx,=="));
    assert!(esil.stack().is_empty());
    assert!(esil.parse("$z"));
    assert_eq!(esil.pop().as_deref(), Some("$z"));

    // the flag itself resolves through the conditional
    esil.host_mut().write_register("rax", 5);
    esil.host_mut().write_register("rbx", 5);
    assert!(esil.condition("rax,rbx,==,$z").unwrap());
    esil.host_mut().write_register("rbx", 6);
    assert!(!esil.condition("rax,rbx,==,$z").unwrap());
}

#[test]
fn conditional_blocks_pick_a_branch() {
    let mut esil = interp();
    assert!(esil.parse("0,?{,0x1,rax,=,}{,0x2,rax,=,}"));
    assert_eq!(esil.host().register("rax"), 2);
    assert!(esil.parse("1,?{,0x1,rax,=,}{,0x2,rax,=,}"));
    assert_eq!(esil.host().register("rax"), 1);
}

#[test]
fn division_by_zero_traps_and_pushes_nothing() {
    let mut esil = interp();
    assert!(esil.parse("0,0x4,/"));
    assert_eq!(esil.trap(), Some(Trap::DivideByZero));
    assert_eq!(esil.trap_code(), 0);
    assert!(esil.stack().is_empty());

    // next expression clears the pending trap
    assert!(esil.parse("0x1,rax,="));
    assert_eq!(esil.trap(), None);
}

#[test]
fn modulo_folds_negative_dividends() {
    let mut esil = interp();
    assert!(esil.parse("3,0xffffffffffffffff,%"));
    assert_eq!(esil.pop().as_deref(), Some("0x3"));
}

#[test]
fn relational_direction() {
    let mut esil = interp();
    assert!(esil.parse("4,5,<"));
    assert_eq!(esil.pop().as_deref(), Some("0x0"));
    assert!(esil.parse("4,5,>"));
    assert_eq!(esil.pop().as_deref(), Some("0x1"));
    assert!(esil.parse("5,5,>="));
    assert_eq!(esil.pop().as_deref(), Some("0x1"));
    assert!(esil.parse("5,5,<="));
    assert_eq!(esil.pop().as_deref(), Some("0x1"));
}

#[test]
fn rotate_round_trip() {
    let mut esil = interp();
    assert!(esil.parse("8,0xff00000000000000,<<<"));
    assert_eq!(esil.pop().as_deref(), Some("0xff"));
    assert!(esil.parse("8,0xff,>>>"));
    assert_eq!(esil.pop().as_deref(), Some("0xff00000000000000"));
}

#[test]
fn shift_wider_than_word_is_zero() {
    let mut esil = interp();
    assert!(esil.parse("0x40,0x1,<<"));
    assert_eq!(esil.pop().as_deref(), Some("0x0"));
}

#[test]
fn float_arithmetic_on_bit_patterns() {
    // 1.0 + 2.0 == 3.0
    let mut esil = interp();
    assert!(esil.parse("Fx3ff0000000000000,Fx4000000000000000,+"));
    assert_eq!(esil.pop().as_deref(), Some("0x4008000000000000"));
}

#[test]
fn poke_peek_round_trip() {
    let mut esil = interp();
    assert!(esil.parse("0xab,0x1000,=[1]"));
    assert_eq!(esil.host().byte(0x1000), 0xab);
    assert!(esil.parse("0x1000,[1]"));
    assert_eq!(esil.pop().as_deref(), Some("0xab"));

    assert!(esil.parse("0x11223344,0x1100,=[4]"));
    assert!(esil.parse("0x1100,[4]"));
    assert_eq!(esil.pop().as_deref(), Some("0x11223344"));
}

#[test]
fn big_endian_poke_writes_network_order() {
    let mut host = Machine::default();
    host.big_endian = true;
    let mut esil = Esil::new(host, EsilConfig::default()).unwrap();
    assert!(esil.parse("0x1122,0x1000,=[2]"));
    assert_eq!(esil.host().byte(0x1000), 0x11);
    assert_eq!(esil.host().byte(0x1001), 0x22);
    assert!(esil.parse("0x1000,[2]"));
    assert_eq!(esil.pop().as_deref(), Some("0x1122"));
}

#[test]
fn compound_memory_add_wraps_and_updates_flags() {
    let mut esil = interp();
    esil.host_mut().memory.insert(0x1000, 0xff);
    assert!(esil.parse("0x1,0x1000,+=[1]"));
    assert_eq!(esil.host().byte(0x1000), 0x00);
    assert!(esil.condition("$z").unwrap());
}

#[test]
fn compound_memory_division_by_zero_leaves_memory_alone() {
    let mut esil = interp();
    esil.host_mut().memory.insert(0x1000, 0x10);
    assert!(esil.parse("0,0x1000,/=[1]"));
    assert_eq!(esil.trap(), Some(Trap::DivideByZero));
    assert_eq!(esil.host().byte(0x1000), 0x10);
}

#[test]
fn bulk_poke_uses_destination_width() {
    let mut esil = interp();
    esil.host_mut().write_register("eax", 0x1000);
    assert!(esil.parse("0xdeadbeef,0xcafebabe,2,eax,=[*]"));
    assert!(esil.parse("0x1000,[4]"));
    assert_eq!(esil.pop().as_deref(), Some("0xcafebabe"));
    assert!(esil.parse("0x1004,[4]"));
    assert_eq!(esil.pop().as_deref(), Some("0xdeadbeef"));
}

#[test]
fn bulk_peek_loads_registers_from_32_bit_words() {
    let mut esil = interp();
    assert!(esil.parse("0xcafebabe,0x1000,=[4]"));
    assert!(esil.parse("0xdeadbeef,0x1004,=[4]"));
    assert!(esil.parse("rax,rbx,2,0x1000,[*]"));
    assert_eq!(esil.host().register("rbx"), 0xcafebabe);
    assert_eq!(esil.host().register("rax"), 0xdeadbeef);
}

#[test]
fn unmapped_read_traps_when_io_trap_is_set() {
    let config = EsilConfig {
        io_trap: true,
        ..EsilConfig::default()
    };
    let mut esil = Esil::new(Machine::default(), config).unwrap();
    // the failing peek is soft, the expression itself runs to the end
    assert!(esil.parse("0x5000,[8]"));
    assert_eq!(esil.trap(), Some(Trap::ReadError));
    assert_eq!(esil.trap_code(), 0x5000);
    // the read still pushes the zero-filled value
    assert_eq!(esil.pop().as_deref(), Some("0x0"));
}

#[test]
fn no_write_suppresses_memory_writes_silently() {
    let config = EsilConfig {
        no_write: true,
        ..EsilConfig::default()
    };
    let mut esil = Esil::new(Machine::default(), config).unwrap();
    assert!(esil.parse("0xab,0x1000,=[1]"));
    assert_eq!(esil.trap(), None);
    assert_eq!(esil.host().byte(0x1000), 0);
}

#[test]
fn semicolon_stops_the_expression() {
    let mut esil = interp();
    assert!(!esil.parse("0x1,rax,=;0x2,rbx,="));
    assert_eq!(esil.host().register("rax"), 1);
    assert_eq!(esil.host().register("rbx"), 0);
}

#[test]
fn goto_reruns_from_word_index() {
    // increment rcx until it reaches 5, then fall through
    let mut esil = interp();
    assert!(esil.parse("rcx,++=,rcx,5,==,$z,!,?{,0,GOTO,}"));
    assert_eq!(esil.host().register("rcx"), 5);
}

#[test]
fn self_goto_trips_the_loop_guard() {
    let mut esil = interp();
    assert!(!esil.parse("0,GOTO"));
    assert_eq!(esil.trap(), Some(Trap::Unhandled));
}

#[test]
fn trap_op_records_and_fires() {
    let mut esil = interp();
    assert!(esil.parse("5,3,TRAP"));
    assert_eq!(esil.trap(), Some(Trap::DivideByZero));
    assert_eq!(esil.trap_code(), 5);
}

#[test]
fn interrupt_reaches_the_host() {
    let mut host = Machine::default();
    host.handle_interrupts = true;
    let mut esil = Esil::new(host, EsilConfig::default()).unwrap();
    assert!(esil.parse("0x80,$"));
    assert_eq!(esil.host().interrupts_seen, vec![0x80]);
}

#[test]
fn host_can_veto_an_operation() {
    let mut host = Machine::default();
    host.veto_op = Some("=");
    let mut esil = Esil::new(host, EsilConfig::default()).unwrap();
    assert!(esil.parse("0x5,rax,="));
    // the vetoed assignment never ran, its operands stay on the stack
    assert_eq!(esil.host().register("rax"), 0);
    assert_eq!(esil.stack().depth(), 2);
}

#[test]
fn stack_dump_prints_top_down() {
    let mut esil = interp();
    assert!(esil.parse("1,2,STACK"));
    assert_eq!(esil.host().printed, vec!["2", "1"]);
}

#[test]
fn stack_manipulation_ops() {
    let mut esil = interp();
    assert!(esil.parse("1,2,SWAP"));
    assert_eq!(esil.pop().as_deref(), Some("1"));
    assert_eq!(esil.pop().as_deref(), Some("2"));

    assert!(esil.parse("3,DUP,POP"));
    assert_eq!(esil.pop().as_deref(), Some("3"));
    assert!(esil.stack().is_empty());

    assert!(esil.parse("1,2,3,CLEAR"));
    assert!(esil.stack().is_empty());
}

#[test]
fn num_normalizes_a_register_to_its_value() {
    let mut esil = interp();
    esil.host_mut().write_register("rax", 0x2a);
    assert!(esil.parse("rax,NUM"));
    assert_eq!(esil.pop().as_deref(), Some("0x2a"));
}

#[test]
fn restart_request_reruns_the_expression() {
    fn again(esil: &mut Esil<Machine>) -> bool {
        if esil.host().register("rax") == 0 {
            esil.write_register("rax", 1);
            esil.request_restart();
        }
        true
    }
    let mut esil = interp();
    esil.register_op("AGAIN", again);
    assert!(esil.parse("rcx,++=,AGAIN"));
    assert_eq!(esil.host().register("rcx"), 2);
}

#[test]
fn increment_decrement_registers() {
    let mut esil = interp();
    assert!(esil.parse("rax,++="));
    assert_eq!(esil.host().register("rax"), 1);
    assert!(esil.parse("rax,--="));
    assert_eq!(esil.host().register("rax"), 0);
    assert!(esil.parse("0x9,++"));
    assert_eq!(esil.pop().as_deref(), Some("0xa"));
}

#[test]
fn borrow_flag_after_subtraction() {
    // 0 - 1 borrows across the full register
    let mut esil = interp();
    assert!(esil.parse("0x1,rax,-="));
    assert_eq!(esil.host().register("rax"), u64::MAX);
    assert!(esil.condition("$b64").unwrap());
}

#[test]
fn carry_flag_after_addition() {
    let mut esil = interp();
    esil.host_mut().write_register("al", 0xff);
    assert!(esil.parse("0x1,al,+="));
    assert!(esil.condition("$c7").unwrap());
    // the full 64-bit result is 0x100, so the zero flag stays clear
    assert!(!esil.condition("$z").unwrap());
}

#[test]
fn overflow_flag_after_signed_boundary_add() {
    // 0x7f + 1 flips the sign bit of an 8-bit register
    let mut esil = interp();
    esil.host_mut().write_register("al", 0x7f);
    assert!(esil.parse("0x1,al,+="));
    assert_eq!(esil.host().register("al"), 0x80);
    assert!(esil.condition("$o").unwrap());

    esil.host_mut().write_register("al", 0x10);
    assert!(esil.parse("0x1,al,+="));
    assert!(!esil.condition("$o").unwrap());
}

#[test]
fn parity_and_sign_flags() {
    let mut esil = interp();
    esil.host_mut().write_register("al", 0x80);
    // 0x80 + 0 keeps one set bit (odd parity) and a high sign bit
    assert!(esil.parse("0x0,al,+="));
    assert!(!esil.condition("$p").unwrap());
    assert!(esil.condition("$s").unwrap());
}

#[test]
fn operators_keep_the_stack_balanced() {
    // final depth is the operands pushed ahead of the operator plus its
    // own net pop/push balance
    let cases: &[(&str, usize)] = &[
        ("1,2,+", 1),
        ("7,3,^", 1),
        ("4,5,<", 1),
        ("rax,rbx,==", 0),
        ("0x7,0x1000,=[4]", 0),
        ("0x1000,[4]", 1),
        ("3,0x1000,+=[4]", 0),
        ("9,DUP", 2),
        ("9,8,SWAP", 2),
    ];
    for (expr, depth) in cases {
        let mut esil = interp();
        esil.parse(expr);
        assert_eq!(esil.stack().depth(), *depth, "{expr}");
    }
}

#[test]
fn failed_resolution_consumes_operands_without_pushing() {
    // the unresolvable operand aborts the operator after its pops, so
    // nothing is left behind and nothing extra is pushed
    for expr in [
        "bogus,1,+",
        "bogus,1,<",
        "bogus,1,==",
        "1,bogus,=[4]",
        "bogus,[4]",
        "bogus,0x1000,+=[4]",
    ] {
        let mut esil = interp();
        esil.parse(expr);
        assert!(esil.stack().is_empty(), "{expr}");
    }
}

#[test]
fn word_size_pseudo_register() {
    let mut esil = interp();
    assert!(esil.parse("$r,0x8,=="));
    assert!(esil.condition("$z").unwrap());
}
