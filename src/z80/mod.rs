// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Zilog Z80 CPU support.
//!
//! The driver classifies each operand into a [`Param`] (register, register
//! indirect, indexed, extended addressing, immediate or condition code).
//! The instruction table in [`instructions`] maps a mnemonic to a list of
//! entries, each a vector of [`ParamPattern`]s plus a code generator;
//! dispatch picks the first entry whose patterns match, and the generator
//! returns the expression nodes to emit, one byte each.

pub mod instructions;

pub use instructions::lookup;

use crate::core::expr::NodeRef;
use crate::core::text::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    Af,
    AfPrime,
    Bc,
    De,
    Hl,
    Sp,
    Ix,
    Iy,
    I,
    R,
}

impl Register {
    pub fn from_name(name: &str) -> Option<Register> {
        let upper = name.to_ascii_uppercase();
        Some(match upper.as_str() {
            "A" => Register::A,
            "B" => Register::B,
            "C" => Register::C,
            "D" => Register::D,
            "E" => Register::E,
            "H" => Register::H,
            "L" => Register::L,
            "AF" => Register::Af,
            "AF'" => Register::AfPrime,
            "BC" => Register::Bc,
            "DE" => Register::De,
            "HL" => Register::Hl,
            "SP" => Register::Sp,
            "IX" => Register::Ix,
            "IY" => Register::Iy,
            "I" => Register::I,
            "R" => Register::R,
            _ => return None,
        })
    }

    pub const fn mask(self) -> u32 {
        1 << (self as u32)
    }

    /// Three-bit register field used in most opcodes.
    pub fn code3(self) -> u8 {
        match self {
            Register::A => 7,
            Register::B => 0,
            Register::C => 1,
            Register::D => 2,
            Register::E => 3,
            Register::H => 4,
            Register::L => 5,
            _ => panic!("register has no 3-bit code"),
        }
    }

    /// Two-bit register-pair field (`ss`/`dd`); IX and IY take HL's slot.
    pub fn pair_code(self) -> u8 {
        match self {
            Register::Bc => 0,
            Register::De => 1,
            Register::Hl | Register::Ix | Register::Iy => 2,
            Register::Sp | Register::Af => 3,
            _ => panic!("register is not a pair"),
        }
    }

    /// Index prefix byte for IX/IY.
    pub fn index_prefix(self) -> u8 {
        match self {
            Register::Ix => 0xdd,
            Register::Iy => 0xfd,
            _ => panic!("register is not an index register"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Nz,
    Z,
    Nc,
    C,
    Po,
    Pe,
    P,
    M,
}

impl Condition {
    pub fn from_name(name: &str) -> Option<Condition> {
        let upper = name.to_ascii_uppercase();
        Some(match upper.as_str() {
            "NZ" => Condition::Nz,
            "Z" => Condition::Z,
            "NC" => Condition::Nc,
            "C" => Condition::C,
            "PO" => Condition::Po,
            "PE" => Condition::Pe,
            "P" => Condition::P,
            "M" => Condition::M,
            _ => return None,
        })
    }

    pub const fn mask(self) -> u32 {
        1 << (self as u32)
    }

    /// Three-bit condition field.
    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Register,
    RegisterIndirect,
    Indexed,       // (IX+d), (IY+d)
    ExtAddressing, // (nn)
    Immediate,
    Cond,
}

/// A classified instruction operand.
#[derive(Clone)]
pub struct Param {
    pub pos: Pos,
    pub mode: AddressingMode,
    /// Offset for Indexed, value for Immediate and ExtAddressing.
    pub val: Option<NodeRef>,
    pub reg: Option<Register>,
    pub cond: Option<Condition>,
}

impl Param {
    pub fn register(pos: Pos, reg: Register) -> Self {
        Self {
            pos,
            mode: AddressingMode::Register,
            val: None,
            reg: Some(reg),
            cond: None,
        }
    }

    pub fn register_indirect(pos: Pos, reg: Register) -> Self {
        Self {
            pos,
            mode: AddressingMode::RegisterIndirect,
            val: None,
            reg: Some(reg),
            cond: None,
        }
    }

    pub fn indexed(pos: Pos, reg: Register, offset: Option<NodeRef>) -> Self {
        Self {
            pos,
            mode: AddressingMode::Indexed,
            val: offset,
            reg: Some(reg),
            cond: None,
        }
    }

    pub fn ext_addressing(pos: Pos, val: NodeRef) -> Self {
        Self {
            pos,
            mode: AddressingMode::ExtAddressing,
            val: Some(val),
            reg: None,
            cond: None,
        }
    }

    pub fn immediate(pos: Pos, val: NodeRef) -> Self {
        Self {
            pos,
            mode: AddressingMode::Immediate,
            val: Some(val),
            reg: None,
            cond: None,
        }
    }

    pub fn condition(pos: Pos, cond: Condition) -> Self {
        Self {
            pos,
            mode: AddressingMode::Cond,
            val: None,
            reg: None,
            cond: Some(cond),
        }
    }

    /// Condition field of a Cond param, or of register C standing in for
    /// the carry condition (`JP C,nn`).
    pub fn cond_code(&self) -> u8 {
        match (self.cond, self.reg) {
            (Some(c), _) => c.code(),
            (None, Some(Register::C)) => Condition::C.code(),
            _ => panic!("param is not a condition"),
        }
    }
}

/// Permitted shape for one operand position.
#[derive(Debug, Clone, Copy)]
pub struct ParamPattern {
    pub mode: AddressingMode,
    /// Permitted registers for Register / RegisterIndirect / Indexed.
    pub regs: u32,
    /// Permitted condition codes for Cond.
    pub conds: u32,
}

impl ParamPattern {
    pub fn matches(&self, param: &Param) -> bool {
        match self.mode {
            AddressingMode::Register
            | AddressingMode::RegisterIndirect
            | AddressingMode::Indexed => {
                param.mode == self.mode
                    && param.reg.map(|r| r.mask() & self.regs != 0).unwrap_or(false)
            }
            AddressingMode::ExtAddressing | AddressingMode::Immediate => param.mode == self.mode,
            AddressingMode::Cond => match param.mode {
                AddressingMode::Cond => param
                    .cond
                    .map(|c| c.mask() & self.conds != 0)
                    .unwrap_or(false),
                // register C doubles as the carry condition
                AddressingMode::Register => {
                    param.reg == Some(Register::C) && Condition::C.mask() & self.conds != 0
                }
                _ => false,
            },
        }
    }
}
