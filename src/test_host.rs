//! In-memory host used by the unit tests.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::host::EsilHost;

/// Host with a `BTreeMap` register file and one mapped memory window.
/// Accesses outside the window transfer only the mapped prefix.
pub struct TestHost {
    pub registers: BTreeMap<String, (u64, u32)>,
    pub memory: BTreeMap<u64, u8>,
    pub mapped: Range<u64>,
    pub printed: Vec<String>,
    pub bits: u32,
    pub big_endian: bool,
}

impl Default for TestHost {
    fn default() -> Self {
        let mut registers = BTreeMap::new();
        for name in ["rax", "rbx", "rcx", "rdx"] {
            registers.insert(name.to_owned(), (0, 64));
        }
        registers.insert("eax".to_owned(), (0, 32));
        Self {
            registers,
            memory: BTreeMap::new(),
            mapped: 0x1000..0x2000,
            printed: Vec::new(),
            bits: 64,
            big_endian: false,
        }
    }
}

impl TestHost {
    pub fn register(&self, name: &str) -> u64 {
        self.registers[name].0
    }
}

impl EsilHost for TestHost {
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

    fn print(&mut self, line: &str) {
        self.printed.push(line.to_owned());
    }
}
