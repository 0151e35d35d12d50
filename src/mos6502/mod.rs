// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! MOS 6502 support: addressing modes and the instruction table.
//!
//! The driver parses one operand into a `(mode, value)` pair, then infers
//! the final addressing mode from the value size and the mnemonic's opcode
//! map (zero-page vs. absolute promotion, relative-branch fallback).

pub mod instructions;

pub use instructions::{is_mnemonic, lookup, opcode_for};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    Implied,
    Immediate,
    Accumulator,
    ZeroPage,         // $aa
    ZeroPageIndexedX, // $aa,X
    ZeroPageIndexedY, // $aa,Y
    Absolute,         // $aaaa
    AbsoluteIndirect, // ($aaaa)
    AbsoluteIndexedX, // $aaaa,X
    AbsoluteIndexedY, // $aaaa,Y
    IndexedIndirect,  // ($aa,X)
    IndirectIndexed,  // ($aa),Y
    Relative,
}

impl AddressingMode {
    /// Attach an index register to a direct mode.
    pub fn with_index(self, register: char) -> Self {
        match (self, register.to_ascii_lowercase()) {
            (AddressingMode::Absolute, 'x') => AddressingMode::AbsoluteIndexedX,
            (AddressingMode::Absolute, 'y') => AddressingMode::AbsoluteIndexedY,
            (AddressingMode::ZeroPage, 'x') => AddressingMode::ZeroPageIndexedX,
            (AddressingMode::ZeroPage, 'y') => AddressingMode::ZeroPageIndexedY,
            _ => self,
        }
    }

    /// Switch between the zero-page and absolute variant based on the
    /// operand size in bytes.
    pub fn with_size(self, size: usize) -> Self {
        match (self, size) {
            (AddressingMode::ZeroPage, 2) => AddressingMode::Absolute,
            (AddressingMode::ZeroPageIndexedX, 2) => AddressingMode::AbsoluteIndexedX,
            (AddressingMode::ZeroPageIndexedY, 2) => AddressingMode::AbsoluteIndexedY,
            (AddressingMode::Absolute, 1) => AddressingMode::ZeroPage,
            (AddressingMode::AbsoluteIndexedX, 1) => AddressingMode::ZeroPageIndexedX,
            (AddressingMode::AbsoluteIndexedY, 1) => AddressingMode::ZeroPageIndexedY,
            _ => self,
        }
    }
}
