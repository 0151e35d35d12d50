// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! MOS 6502 instruction table: mnemonic to (addressing mode -> opcode).

use super::AddressingMode::{self, *};

pub struct MnemonicEntry {
    pub mnemonic: &'static str,
    pub opcodes: &'static [(AddressingMode, u8)],
}

/// Look up the opcode map for a mnemonic (case-insensitive).
pub fn lookup(mnemonic: &str) -> Option<&'static [(AddressingMode, u8)]> {
    MNEMONICS
        .iter()
        .find(|e| e.mnemonic.eq_ignore_ascii_case(mnemonic))
        .map(|e| e.opcodes)
}

pub fn is_mnemonic(name: &str) -> bool {
    lookup(name).is_some()
}

pub fn opcode_for(opcodes: &[(AddressingMode, u8)], mode: AddressingMode) -> Option<u8> {
    opcodes
        .iter()
        .find(|(m, _)| *m == mode)
        .map(|(_, opc)| *opc)
}

pub static MNEMONICS: &[MnemonicEntry] = &[
    MnemonicEntry {
        mnemonic: "adc",
        opcodes: &[
            (Immediate, 0x69),
            (ZeroPage, 0x65),
            (ZeroPageIndexedX, 0x75),
            (Absolute, 0x6d),
            (AbsoluteIndexedX, 0x7d),
            (AbsoluteIndexedY, 0x79),
            (IndexedIndirect, 0x61),
            (IndirectIndexed, 0x71),
        ],
    },
    MnemonicEntry {
        mnemonic: "and",
        opcodes: &[
            (Immediate, 0x29),
            (ZeroPage, 0x25),
            (ZeroPageIndexedX, 0x35),
            (Absolute, 0x2d),
            (AbsoluteIndexedX, 0x3d),
            (AbsoluteIndexedY, 0x39),
            (IndexedIndirect, 0x21),
            (IndirectIndexed, 0x31),
        ],
    },
    MnemonicEntry {
        mnemonic: "asl",
        opcodes: &[
            (Implied, 0x0a),
            (Accumulator, 0x0a),
            (ZeroPage, 0x06),
            (ZeroPageIndexedX, 0x16),
            (Absolute, 0x0e),
            (AbsoluteIndexedX, 0x1e),
        ],
    },
    MnemonicEntry {
        mnemonic: "bcc",
        opcodes: &[(Relative, 0x90)],
    },
    MnemonicEntry {
        mnemonic: "bcs",
        opcodes: &[(Relative, 0xb0)],
    },
    MnemonicEntry {
        mnemonic: "beq",
        opcodes: &[(Relative, 0xf0)],
    },
    MnemonicEntry {
        mnemonic: "bit",
        opcodes: &[(ZeroPage, 0x24), (Absolute, 0x2c)],
    },
    MnemonicEntry {
        mnemonic: "bmi",
        opcodes: &[(Relative, 0x30)],
    },
    MnemonicEntry {
        mnemonic: "bne",
        opcodes: &[(Relative, 0xd0)],
    },
    MnemonicEntry {
        mnemonic: "bpl",
        opcodes: &[(Relative, 0x10)],
    },
    MnemonicEntry {
        mnemonic: "brk",
        opcodes: &[(Implied, 0x00)],
    },
    MnemonicEntry {
        mnemonic: "bvc",
        opcodes: &[(Relative, 0x50)],
    },
    MnemonicEntry {
        mnemonic: "bvs",
        opcodes: &[(Relative, 0x70)],
    },
    MnemonicEntry {
        mnemonic: "clc",
        opcodes: &[(Implied, 0x18)],
    },
    MnemonicEntry {
        mnemonic: "cld",
        opcodes: &[(Implied, 0xd8)],
    },
    MnemonicEntry {
        mnemonic: "cli",
        opcodes: &[(Implied, 0x58)],
    },
    MnemonicEntry {
        mnemonic: "clv",
        opcodes: &[(Implied, 0xb8)],
    },
    MnemonicEntry {
        mnemonic: "cmp",
        opcodes: &[
            (Immediate, 0xc9),
            (ZeroPage, 0xc5),
            (ZeroPageIndexedX, 0xd5),
            (Absolute, 0xcd),
            (AbsoluteIndexedX, 0xdd),
            (AbsoluteIndexedY, 0xd9),
            (IndexedIndirect, 0xc1),
            (IndirectIndexed, 0xd1),
        ],
    },
    MnemonicEntry {
        mnemonic: "cpx",
        opcodes: &[(Immediate, 0xe0), (ZeroPage, 0xe4), (Absolute, 0xec)],
    },
    MnemonicEntry {
        mnemonic: "cpy",
        opcodes: &[(Immediate, 0xc0), (ZeroPage, 0xc4), (Absolute, 0xcc)],
    },
    MnemonicEntry {
        mnemonic: "dec",
        opcodes: &[
            (ZeroPage, 0xc6),
            (ZeroPageIndexedX, 0xd6),
            (Absolute, 0xce),
            (AbsoluteIndexedX, 0xde),
        ],
    },
    MnemonicEntry {
        mnemonic: "dex",
        opcodes: &[(Implied, 0xca)],
    },
    MnemonicEntry {
        mnemonic: "dey",
        opcodes: &[(Implied, 0x88)],
    },
    MnemonicEntry {
        mnemonic: "eor",
        opcodes: &[
            (Immediate, 0x49),
            (ZeroPage, 0x45),
            (ZeroPageIndexedX, 0x55),
            (Absolute, 0x4d),
            (AbsoluteIndexedX, 0x5d),
            (AbsoluteIndexedY, 0x59),
            (IndexedIndirect, 0x41),
            (IndirectIndexed, 0x51),
        ],
    },
    MnemonicEntry {
        mnemonic: "inc",
        opcodes: &[
            (ZeroPage, 0xe6),
            (ZeroPageIndexedX, 0xf6),
            (Absolute, 0xee),
            (AbsoluteIndexedX, 0xfe),
        ],
    },
    MnemonicEntry {
        mnemonic: "inx",
        opcodes: &[(Implied, 0xe8)],
    },
    MnemonicEntry {
        mnemonic: "iny",
        opcodes: &[(Implied, 0xc8)],
    },
    MnemonicEntry {
        mnemonic: "jmp",
        opcodes: &[(Absolute, 0x4c), (AbsoluteIndirect, 0x6c)],
    },
    MnemonicEntry {
        mnemonic: "jsr",
        opcodes: &[(Absolute, 0x20)],
    },
    MnemonicEntry {
        mnemonic: "lda",
        opcodes: &[
            (Immediate, 0xa9),
            (ZeroPage, 0xa5),
            (ZeroPageIndexedX, 0xb5),
            (Absolute, 0xad),
            (AbsoluteIndexedX, 0xbd),
            (AbsoluteIndexedY, 0xb9),
            (IndexedIndirect, 0xa1),
            (IndirectIndexed, 0xb1),
        ],
    },
    MnemonicEntry {
        mnemonic: "ldx",
        opcodes: &[
            (Immediate, 0xa2),
            (ZeroPage, 0xa6),
            (ZeroPageIndexedY, 0xb6),
            (Absolute, 0xae),
            (AbsoluteIndexedY, 0xbe),
        ],
    },
    MnemonicEntry {
        mnemonic: "ldy",
        opcodes: &[
            (Immediate, 0xa0),
            (ZeroPage, 0xa4),
            (ZeroPageIndexedX, 0xb4),
            (Absolute, 0xac),
            (AbsoluteIndexedX, 0xbc),
        ],
    },
    MnemonicEntry {
        mnemonic: "lsr",
        opcodes: &[
            (Implied, 0x4a),
            (Accumulator, 0x4a),
            (ZeroPage, 0x46),
            (ZeroPageIndexedX, 0x56),
            (Absolute, 0x4e),
            (AbsoluteIndexedX, 0x5e),
        ],
    },
    MnemonicEntry {
        mnemonic: "nop",
        opcodes: &[(Implied, 0xea)],
    },
    MnemonicEntry {
        mnemonic: "ora",
        opcodes: &[
            (Immediate, 0x09),
            (ZeroPage, 0x05),
            (ZeroPageIndexedX, 0x15),
            (Absolute, 0x0d),
            (AbsoluteIndexedX, 0x1d),
            (AbsoluteIndexedY, 0x19),
            (IndexedIndirect, 0x01),
            (IndirectIndexed, 0x11),
        ],
    },
    MnemonicEntry {
        mnemonic: "pha",
        opcodes: &[(Implied, 0x48)],
    },
    MnemonicEntry {
        mnemonic: "php",
        opcodes: &[(Implied, 0x08)],
    },
    MnemonicEntry {
        mnemonic: "pla",
        opcodes: &[(Implied, 0x68)],
    },
    MnemonicEntry {
        mnemonic: "plp",
        opcodes: &[(Implied, 0x28)],
    },
    MnemonicEntry {
        mnemonic: "rol",
        opcodes: &[
            (Implied, 0x2a),
            (Accumulator, 0x2a),
            (ZeroPage, 0x26),
            (ZeroPageIndexedX, 0x36),
            (Absolute, 0x2e),
            (AbsoluteIndexedX, 0x3e),
        ],
    },
    MnemonicEntry {
        mnemonic: "ror",
        opcodes: &[
            (Implied, 0x6a),
            (Accumulator, 0x6a),
            (ZeroPage, 0x66),
            (ZeroPageIndexedX, 0x76),
            (Absolute, 0x6e),
            (AbsoluteIndexedX, 0x7e),
        ],
    },
    MnemonicEntry {
        mnemonic: "rti",
        opcodes: &[(Implied, 0x40)],
    },
    MnemonicEntry {
        mnemonic: "rts",
        opcodes: &[(Implied, 0x60)],
    },
    MnemonicEntry {
        mnemonic: "sbc",
        opcodes: &[
            (Immediate, 0xe9),
            (ZeroPage, 0xe5),
            (ZeroPageIndexedX, 0xf5),
            (Absolute, 0xed),
            (AbsoluteIndexedX, 0xfd),
            (AbsoluteIndexedY, 0xf9),
            (IndexedIndirect, 0xe1),
            (IndirectIndexed, 0xf1),
        ],
    },
    MnemonicEntry {
        mnemonic: "sec",
        opcodes: &[(Implied, 0x38)],
    },
    MnemonicEntry {
        mnemonic: "sed",
        opcodes: &[(Implied, 0xf8)],
    },
    MnemonicEntry {
        mnemonic: "sei",
        opcodes: &[(Implied, 0x78)],
    },
    MnemonicEntry {
        mnemonic: "sta",
        opcodes: &[
            (ZeroPage, 0x85),
            (ZeroPageIndexedX, 0x95),
            (Absolute, 0x8d),
            (AbsoluteIndexedX, 0x9d),
            (AbsoluteIndexedY, 0x99),
            (IndexedIndirect, 0x81),
            (IndirectIndexed, 0x91),
        ],
    },
    MnemonicEntry {
        mnemonic: "stx",
        opcodes: &[(ZeroPage, 0x86), (ZeroPageIndexedY, 0x96), (Absolute, 0x8e)],
    },
    MnemonicEntry {
        mnemonic: "sty",
        opcodes: &[(ZeroPage, 0x84), (ZeroPageIndexedX, 0x94), (Absolute, 0x8c)],
    },
    MnemonicEntry {
        mnemonic: "tax",
        opcodes: &[(Implied, 0xaa)],
    },
    MnemonicEntry {
        mnemonic: "tay",
        opcodes: &[(Implied, 0xa8)],
    },
    MnemonicEntry {
        mnemonic: "tsx",
        opcodes: &[(Implied, 0xba)],
    },
    MnemonicEntry {
        mnemonic: "txa",
        opcodes: &[(Implied, 0x8a)],
    },
    MnemonicEntry {
        mnemonic: "txs",
        opcodes: &[(Implied, 0x9a)],
    },
    MnemonicEntry {
        mnemonic: "tya",
        opcodes: &[(Implied, 0x98)],
    },
];
