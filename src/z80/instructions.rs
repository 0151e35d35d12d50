// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Z80 instruction table.
//!
//! Every mnemonic maps to a list of entries; an entry is a vector of
//! parameter patterns plus a code generator. Dispatch is linear: the first
//! entry with matching arity and patterns wins. Generators return the
//! expression nodes to emit, exactly one byte each; 16-bit immediates are
//! split with LoByte/HiByte unaries over a shared operand node, indexed
//! displacements are emitted as their own (signed) node.

use super::{AddressingMode, Condition, Param, ParamPattern, Register};
use crate::core::errors::Error;
use crate::core::expr::{ExprNode, NodeRef, UnaryOp};
use crate::core::text::Pos;
use std::collections::HashMap;
use std::sync::OnceLock;

pub type CodeGen = Box<dyn Fn(&[Param], &mut Vec<Error>) -> Vec<NodeRef> + Send + Sync>;

pub struct OpCodeEntry {
    pub patterns: Vec<ParamPattern>,
    pub gen: CodeGen,
}

pub fn lookup(mnemonic: &str) -> Option<&'static [OpCodeEntry]> {
    table()
        .get(&mnemonic.to_ascii_lowercase())
        .map(|v| v.as_slice())
}

pub fn is_mnemonic(name: &str) -> bool {
    table().contains_key(&name.to_ascii_lowercase())
}

/// First entry whose arity and patterns match the given parameters.
pub fn find_match<'a>(entries: &'a [OpCodeEntry], params: &[Param]) -> Option<&'a CodeGen> {
    entries
        .iter()
        .find(|e| {
            e.patterns.len() == params.len()
                && e.patterns.iter().zip(params).all(|(pat, p)| pat.matches(p))
        })
        .map(|e| &e.gen)
}

fn table() -> &'static HashMap<String, Vec<OpCodeEntry>> {
    static TABLE: OnceLock<HashMap<String, Vec<OpCodeEntry>>> = OnceLock::new();
    TABLE.get_or_init(build)
}

// pattern helpers

const R8: u32 = Register::A.mask()
    | Register::B.mask()
    | Register::C.mask()
    | Register::D.mask()
    | Register::E.mask()
    | Register::H.mask()
    | Register::L.mask();
const RR: u32 =
    Register::Bc.mask() | Register::De.mask() | Register::Hl.mask() | Register::Sp.mask();
const IDX: u32 = Register::Ix.mask() | Register::Iy.mask();
const CC_ALL: u32 = Condition::Nz.mask()
    | Condition::Z.mask()
    | Condition::Nc.mask()
    | Condition::C.mask()
    | Condition::Po.mask()
    | Condition::Pe.mask()
    | Condition::P.mask()
    | Condition::M.mask();
const CC_JR: u32 =
    Condition::Nz.mask() | Condition::Z.mask() | Condition::Nc.mask() | Condition::C.mask();

fn reg(mask: u32) -> ParamPattern {
    ParamPattern {
        mode: AddressingMode::Register,
        regs: mask,
        conds: 0,
    }
}

fn ind(mask: u32) -> ParamPattern {
    ParamPattern {
        mode: AddressingMode::RegisterIndirect,
        regs: mask,
        conds: 0,
    }
}

fn idx() -> ParamPattern {
    ParamPattern {
        mode: AddressingMode::Indexed,
        regs: IDX,
        conds: 0,
    }
}

fn ext() -> ParamPattern {
    ParamPattern {
        mode: AddressingMode::ExtAddressing,
        regs: 0,
        conds: 0,
    }
}

fn imm() -> ParamPattern {
    ParamPattern {
        mode: AddressingMode::Immediate,
        regs: 0,
        conds: 0,
    }
}

fn cond(mask: u32) -> ParamPattern {
    ParamPattern {
        mode: AddressingMode::Cond,
        regs: 0,
        conds: mask,
    }
}

// code generator helpers

fn byte(pos: &Pos, v: u8) -> NodeRef {
    ExprNode::int(pos.clone(), v as i64, 1)
}

fn val(p: &Param) -> NodeRef {
    p.val.clone().expect("parameter carries a value")
}

fn lo(p: &Param) -> NodeRef {
    let n = val(p);
    let pos = n.borrow().pos.clone();
    ExprNode::unary(pos, UnaryOp::LoByte, n)
}

fn hi(p: &Param) -> NodeRef {
    let n = val(p);
    let pos = n.borrow().pos.clone();
    ExprNode::unary(pos, UnaryOp::HiByte, n)
}

/// Displacement of an indexed operand; `(IX)` means zero.
fn disp(p: &Param) -> NodeRef {
    match &p.val {
        Some(n) => n.clone(),
        None => byte(&p.pos, 0),
    }
}

/// Branch target: the value node marked relative.
fn rel(p: &Param) -> NodeRef {
    let n = val(p);
    n.borrow_mut().mark_relative();
    n
}

fn r3(p: &Param) -> u8 {
    p.reg.expect("register parameter").code3()
}

fn pair4(p: &Param) -> u8 {
    p.reg.expect("register parameter").pair_code() << 4
}

fn prefix(p: &Param) -> u8 {
    p.reg.expect("register parameter").index_prefix()
}

/// Resolved small constant (bit numbers, RST vectors, IM modes).
fn const_value(p: &Param, errors: &mut Vec<Error>) -> Option<i64> {
    let n = val(p);
    let n = n.borrow();
    if !n.is_resolved() {
        errors.push(Error::new(p.pos.clone(), "Operand must be resolved."));
        return None;
    }
    Some(n.eval())
}

fn bit_number(p: &Param, errors: &mut Vec<Error>) -> u8 {
    match const_value(p, errors) {
        Some(v) if (0..=7).contains(&v) => v as u8,
        Some(_) => {
            errors.push(Error::new(p.pos.clone(), "Bit number must be 0 to 7."));
            0
        }
        None => 0,
    }
}

struct Builder {
    map: HashMap<String, Vec<OpCodeEntry>>,
}

impl Builder {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    fn add(
        &mut self,
        mnemonic: &str,
        patterns: Vec<ParamPattern>,
        gen: impl Fn(&[Param], &mut Vec<Error>) -> Vec<NodeRef> + Send + Sync + 'static,
    ) {
        self.map
            .entry(mnemonic.to_string())
            .or_default()
            .push(OpCodeEntry {
                patterns,
                gen: Box::new(gen),
            });
    }

    /// Implied instruction with a fixed byte sequence.
    fn implied(&mut self, mnemonic: &str, bytes: &'static [u8]) {
        self.add(mnemonic, vec![], move |p: &[Param], _: &mut Vec<Error>| {
            let pos = p.first().map(|p| p.pos.clone()).unwrap_or_default();
            bytes.iter().map(|b| byte(&pos, *b)).collect()
        });
    }
}

fn build() -> HashMap<String, Vec<OpCodeEntry>> {
    let mut b = Builder::new();

    // 8-bit loads
    b.add("ld", vec![reg(R8), reg(R8)], |p, _| {
        vec![byte(&p[0].pos, 0x40 | (r3(&p[0]) << 3) | r3(&p[1]))]
    });
    b.add("ld", vec![reg(R8), ind(Register::Hl.mask())], |p, _| {
        vec![byte(&p[0].pos, 0x46 | (r3(&p[0]) << 3))]
    });
    b.add("ld", vec![reg(R8), idx()], |p, _| {
        vec![
            byte(&p[1].pos, prefix(&p[1])),
            byte(&p[0].pos, 0x46 | (r3(&p[0]) << 3)),
            disp(&p[1]),
        ]
    });
    b.add("ld", vec![ind(Register::Hl.mask()), reg(R8)], |p, _| {
        vec![byte(&p[0].pos, 0x70 | r3(&p[1]))]
    });
    b.add("ld", vec![ind(Register::Hl.mask()), imm()], |p, _| {
        vec![byte(&p[0].pos, 0x36), val(&p[1])]
    });
    b.add("ld", vec![idx(), reg(R8)], |p, _| {
        vec![
            byte(&p[0].pos, prefix(&p[0])),
            byte(&p[0].pos, 0x70 | r3(&p[1])),
            disp(&p[0]),
        ]
    });
    b.add("ld", vec![idx(), imm()], |p, _| {
        vec![
            byte(&p[0].pos, prefix(&p[0])),
            byte(&p[0].pos, 0x36),
            disp(&p[0]),
            val(&p[1]),
        ]
    });
    b.add(
        "ld",
        vec![reg(Register::A.mask()), ind(Register::Bc.mask() | Register::De.mask())],
        |p, _| {
            let opc = if p[1].reg == Some(Register::Bc) { 0x0a } else { 0x1a };
            vec![byte(&p[0].pos, opc)]
        },
    );
    b.add(
        "ld",
        vec![ind(Register::Bc.mask() | Register::De.mask()), reg(Register::A.mask())],
        |p, _| {
            let opc = if p[0].reg == Some(Register::Bc) { 0x02 } else { 0x12 };
            vec![byte(&p[0].pos, opc)]
        },
    );
    b.add(
        "ld",
        vec![reg(Register::A.mask()), reg(Register::I.mask() | Register::R.mask())],
        |p, _| {
            let opc = if p[1].reg == Some(Register::I) { 0x57 } else { 0x5f };
            vec![byte(&p[0].pos, 0xed), byte(&p[0].pos, opc)]
        },
    );
    b.add(
        "ld",
        vec![reg(Register::I.mask() | Register::R.mask()), reg(Register::A.mask())],
        |p, _| {
            let opc = if p[0].reg == Some(Register::I) { 0x47 } else { 0x4f };
            vec![byte(&p[0].pos, 0xed), byte(&p[0].pos, opc)]
        },
    );
    // 8-bit immediate load; must come after the A,I / A,R entries
    b.add("ld", vec![reg(R8), imm()], |p, _| {
        vec![byte(&p[0].pos, 0x06 | (r3(&p[0]) << 3)), val(&p[1])]
    });

    // 16-bit loads
    b.add("ld", vec![reg(RR), imm()], |p, _| {
        vec![byte(&p[0].pos, 0x01 | pair4(&p[0])), lo(&p[1]), hi(&p[1])]
    });
    b.add("ld", vec![reg(IDX), imm()], |p, _| {
        vec![
            byte(&p[0].pos, prefix(&p[0])),
            byte(&p[0].pos, 0x21),
            lo(&p[1]),
            hi(&p[1]),
        ]
    });
    b.add("ld", vec![reg(Register::Hl.mask()), ext()], |p, _| {
        vec![byte(&p[0].pos, 0x2a), lo(&p[1]), hi(&p[1])]
    });
    b.add(
        "ld",
        vec![
            reg(Register::Bc.mask() | Register::De.mask() | Register::Sp.mask()),
            ext(),
        ],
        |p, _| {
            vec![
                byte(&p[0].pos, 0xed),
                byte(&p[0].pos, 0x4b | pair4(&p[0])),
                lo(&p[1]),
                hi(&p[1]),
            ]
        },
    );
    b.add("ld", vec![reg(IDX), ext()], |p, _| {
        vec![
            byte(&p[0].pos, prefix(&p[0])),
            byte(&p[0].pos, 0x2a),
            lo(&p[1]),
            hi(&p[1]),
        ]
    });
    b.add("ld", vec![ext(), reg(Register::Hl.mask())], |p, _| {
        vec![byte(&p[0].pos, 0x22), lo(&p[0]), hi(&p[0])]
    });
    b.add(
        "ld",
        vec![
            ext(),
            reg(Register::Bc.mask() | Register::De.mask() | Register::Sp.mask()),
        ],
        |p, _| {
            vec![
                byte(&p[0].pos, 0xed),
                byte(&p[0].pos, 0x43 | pair4(&p[1])),
                lo(&p[0]),
                hi(&p[0]),
            ]
        },
    );
    b.add("ld", vec![ext(), reg(IDX)], |p, _| {
        vec![
            byte(&p[0].pos, prefix(&p[1])),
            byte(&p[0].pos, 0x22),
            lo(&p[0]),
            hi(&p[0]),
        ]
    });
    b.add("ld", vec![reg(Register::A.mask()), ext()], |p, _| {
        vec![byte(&p[0].pos, 0x3a), lo(&p[1]), hi(&p[1])]
    });
    b.add("ld", vec![ext(), reg(Register::A.mask())], |p, _| {
        vec![byte(&p[0].pos, 0x32), lo(&p[0]), hi(&p[0])]
    });
    b.add(
        "ld",
        vec![
            reg(Register::Sp.mask()),
            reg(Register::Hl.mask() | IDX),
        ],
        |p, _| match p[1].reg {
            Some(Register::Hl) => vec![byte(&p[0].pos, 0xf9)],
            _ => vec![byte(&p[0].pos, prefix(&p[1])), byte(&p[0].pos, 0xf9)],
        },
    );

    // push/pop
    b.add(
        "push",
        vec![reg(RR & !Register::Sp.mask() | Register::Af.mask())],
        |p, _| vec![byte(&p[0].pos, 0xc5 | pair4(&p[0]))],
    );
    b.add("push", vec![reg(IDX)], |p, _| {
        vec![byte(&p[0].pos, prefix(&p[0])), byte(&p[0].pos, 0xe5)]
    });
    b.add(
        "pop",
        vec![reg(RR & !Register::Sp.mask() | Register::Af.mask())],
        |p, _| vec![byte(&p[0].pos, 0xc1 | pair4(&p[0]))],
    );
    b.add("pop", vec![reg(IDX)], |p, _| {
        vec![byte(&p[0].pos, prefix(&p[0])), byte(&p[0].pos, 0xe1)]
    });

    // exchanges
    b.add(
        "ex",
        vec![reg(Register::De.mask()), reg(Register::Hl.mask())],
        |p, _| vec![byte(&p[0].pos, 0xeb)],
    );
    b.add(
        "ex",
        vec![reg(Register::Af.mask()), reg(Register::AfPrime.mask())],
        |p, _| vec![byte(&p[0].pos, 0x08)],
    );
    b.add(
        "ex",
        vec![ind(Register::Sp.mask()), reg(Register::Hl.mask())],
        |p, _| vec![byte(&p[0].pos, 0xe3)],
    );
    b.add("ex", vec![ind(Register::Sp.mask()), reg(IDX)], |p, _| {
        vec![byte(&p[0].pos, prefix(&p[1])), byte(&p[0].pos, 0xe3)]
    });
    b.implied("exx", &[0xd9]);

    // block transfer / search / io
    b.implied("ldi", &[0xed, 0xa0]);
    b.implied("ldir", &[0xed, 0xb0]);
    b.implied("ldd", &[0xed, 0xa8]);
    b.implied("lddr", &[0xed, 0xb8]);
    b.implied("cpi", &[0xed, 0xa1]);
    b.implied("cpir", &[0xed, 0xb1]);
    b.implied("cpd", &[0xed, 0xa9]);
    b.implied("cpdr", &[0xed, 0xb9]);
    b.implied("ini", &[0xed, 0xa2]);
    b.implied("inir", &[0xed, 0xb2]);
    b.implied("ind", &[0xed, 0xaa]);
    b.implied("indr", &[0xed, 0xba]);
    b.implied("outi", &[0xed, 0xa3]);
    b.implied("otir", &[0xed, 0xb3]);
    b.implied("outd", &[0xed, 0xab]);
    b.implied("otdr", &[0xed, 0xbb]);

    // 8-bit ALU; both the "op A,x" and the bare "op x" spellings
    let alu: &[(&str, u8, u8)] = &[
        ("add", 0x80, 0xc6),
        ("adc", 0x88, 0xce),
        ("sub", 0x90, 0xd6),
        ("sbc", 0x98, 0xde),
        ("and", 0xa0, 0xe6),
        ("xor", 0xa8, 0xee),
        ("or", 0xb0, 0xf6),
        ("cp", 0xb8, 0xfe),
    ];
    for &(name, base, imm_op) in alu {
        b.add(name, vec![reg(Register::A.mask()), reg(R8)], move |p, _| {
            vec![byte(&p[0].pos, base | r3(&p[1]))]
        });
        b.add(
            name,
            vec![reg(Register::A.mask()), ind(Register::Hl.mask())],
            move |p, _| vec![byte(&p[0].pos, base | 6)],
        );
        b.add(name, vec![reg(Register::A.mask()), idx()], move |p, _| {
            vec![
                byte(&p[1].pos, prefix(&p[1])),
                byte(&p[0].pos, base | 6),
                disp(&p[1]),
            ]
        });
        b.add(name, vec![reg(Register::A.mask()), imm()], move |p, _| {
            vec![byte(&p[0].pos, imm_op), val(&p[1])]
        });
        b.add(name, vec![reg(R8)], move |p, _| {
            vec![byte(&p[0].pos, base | r3(&p[0]))]
        });
        b.add(name, vec![ind(Register::Hl.mask())], move |p, _| {
            vec![byte(&p[0].pos, base | 6)]
        });
        b.add(name, vec![idx()], move |p, _| {
            vec![
                byte(&p[0].pos, prefix(&p[0])),
                byte(&p[0].pos, base | 6),
                disp(&p[0]),
            ]
        });
        b.add(name, vec![imm()], move |p, _| {
            vec![byte(&p[0].pos, imm_op), val(&p[0])]
        });
    }

    // 16-bit arithmetic
    b.add("add", vec![reg(Register::Hl.mask()), reg(RR)], |p, _| {
        vec![byte(&p[0].pos, 0x09 | pair4(&p[1]))]
    });
    b.add(
        "add",
        vec![
            reg(Register::Ix.mask()),
            reg(Register::Bc.mask()
                | Register::De.mask()
                | Register::Ix.mask()
                | Register::Sp.mask()),
        ],
        |p, _| {
            vec![byte(&p[0].pos, 0xdd), byte(&p[0].pos, 0x09 | pair4(&p[1]))]
        },
    );
    b.add(
        "add",
        vec![
            reg(Register::Iy.mask()),
            reg(Register::Bc.mask()
                | Register::De.mask()
                | Register::Iy.mask()
                | Register::Sp.mask()),
        ],
        |p, _| {
            vec![byte(&p[0].pos, 0xfd), byte(&p[0].pos, 0x09 | pair4(&p[1]))]
        },
    );
    b.add("adc", vec![reg(Register::Hl.mask()), reg(RR)], |p, _| {
        vec![byte(&p[0].pos, 0xed), byte(&p[0].pos, 0x4a | pair4(&p[1]))]
    });
    b.add("sbc", vec![reg(Register::Hl.mask()), reg(RR)], |p, _| {
        vec![byte(&p[0].pos, 0xed), byte(&p[0].pos, 0x42 | pair4(&p[1]))]
    });

    // increment / decrement
    b.add("inc", vec![reg(R8)], |p, _| {
        vec![byte(&p[0].pos, 0x04 | (r3(&p[0]) << 3))]
    });
    b.add("inc", vec![reg(RR)], |p, _| {
        vec![byte(&p[0].pos, 0x03 | pair4(&p[0]))]
    });
    b.add("inc", vec![reg(IDX)], |p, _| {
        vec![byte(&p[0].pos, prefix(&p[0])), byte(&p[0].pos, 0x23)]
    });
    b.add("inc", vec![ind(Register::Hl.mask())], |p, _| {
        vec![byte(&p[0].pos, 0x34)]
    });
    b.add("inc", vec![idx()], |p, _| {
        vec![
            byte(&p[0].pos, prefix(&p[0])),
            byte(&p[0].pos, 0x34),
            disp(&p[0]),
        ]
    });
    b.add("dec", vec![reg(R8)], |p, _| {
        vec![byte(&p[0].pos, 0x05 | (r3(&p[0]) << 3))]
    });
    b.add("dec", vec![reg(RR)], |p, _| {
        vec![byte(&p[0].pos, 0x0b | pair4(&p[0]))]
    });
    b.add("dec", vec![reg(IDX)], |p, _| {
        vec![byte(&p[0].pos, prefix(&p[0])), byte(&p[0].pos, 0x2b)]
    });
    b.add("dec", vec![ind(Register::Hl.mask())], |p, _| {
        vec![byte(&p[0].pos, 0x35)]
    });
    b.add("dec", vec![idx()], |p, _| {
        vec![
            byte(&p[0].pos, prefix(&p[0])),
            byte(&p[0].pos, 0x35),
            disp(&p[0]),
        ]
    });

    // general purpose
    b.implied("daa", &[0x27]);
    b.implied("cpl", &[0x2f]);
    b.implied("neg", &[0xed, 0x44]);
    b.implied("ccf", &[0x3f]);
    b.implied("scf", &[0x37]);
    b.implied("nop", &[0x00]);
    b.implied("halt", &[0x76]);
    b.implied("di", &[0xf3]);
    b.implied("ei", &[0xfb]);
    b.add("im", vec![imm()], |p, errors| {
        let opc = match const_value(&p[0], errors) {
            Some(0) => 0x46,
            Some(1) => 0x56,
            Some(2) => 0x5e,
            Some(_) => {
                errors.push(Error::new(p[0].pos.clone(), "Interrupt mode must be 0, 1 or 2."));
                0x46
            }
            None => 0x46,
        };
        vec![byte(&p[0].pos, 0xed), byte(&p[0].pos, opc)]
    });

    // rotates and shifts
    b.implied("rlca", &[0x07]);
    b.implied("rla", &[0x17]);
    b.implied("rrca", &[0x0f]);
    b.implied("rra", &[0x1f]);
    b.implied("rld", &[0xed, 0x6f]);
    b.implied("rrd", &[0xed, 0x67]);
    let rot: &[(&str, u8)] = &[
        ("rlc", 0x00),
        ("rrc", 0x08),
        ("rl", 0x10),
        ("rr", 0x18),
        ("sla", 0x20),
        ("sra", 0x28),
        ("srl", 0x38),
    ];
    for &(name, base) in rot {
        b.add(name, vec![reg(R8)], move |p, _| {
            vec![byte(&p[0].pos, 0xcb), byte(&p[0].pos, base | r3(&p[0]))]
        });
        b.add(name, vec![ind(Register::Hl.mask())], move |p, _| {
            vec![byte(&p[0].pos, 0xcb), byte(&p[0].pos, base | 6)]
        });
        b.add(name, vec![idx()], move |p, _| {
            vec![
                byte(&p[0].pos, prefix(&p[0])),
                byte(&p[0].pos, 0xcb),
                disp(&p[0]),
                byte(&p[0].pos, base | 6),
            ]
        });
    }

    // bit set/reset/test
    let bitops: &[(&str, u8)] = &[("bit", 0x40), ("res", 0x80), ("set", 0xc0)];
    for &(name, base) in bitops {
        b.add(name, vec![imm(), reg(R8)], move |p, errors| {
            let bit = bit_number(&p[0], errors);
            vec![
                byte(&p[0].pos, 0xcb),
                byte(&p[0].pos, base | (bit << 3) | r3(&p[1])),
            ]
        });
        b.add(name, vec![imm(), ind(Register::Hl.mask())], move |p, errors| {
            let bit = bit_number(&p[0], errors);
            vec![
                byte(&p[0].pos, 0xcb),
                byte(&p[0].pos, base | (bit << 3) | 6),
            ]
        });
        b.add(name, vec![imm(), idx()], move |p, errors| {
            let bit = bit_number(&p[0], errors);
            vec![
                byte(&p[1].pos, prefix(&p[1])),
                byte(&p[1].pos, 0xcb),
                disp(&p[1]),
                byte(&p[0].pos, base | (bit << 3) | 6),
            ]
        });
    }

    // jumps, calls and returns
    b.add("jp", vec![imm()], |p, _| {
        vec![byte(&p[0].pos, 0xc3), lo(&p[0]), hi(&p[0])]
    });
    b.add("jp", vec![cond(CC_ALL), imm()], |p, _| {
        vec![
            byte(&p[0].pos, 0xc2 | (p[0].cond_code() << 3)),
            lo(&p[1]),
            hi(&p[1]),
        ]
    });
    b.add("jp", vec![ind(Register::Hl.mask())], |p, _| {
        vec![byte(&p[0].pos, 0xe9)]
    });
    b.add("jp", vec![ind(IDX)], |p, _| {
        vec![byte(&p[0].pos, prefix(&p[0])), byte(&p[0].pos, 0xe9)]
    });
    b.add("jr", vec![imm()], |p, _| {
        vec![byte(&p[0].pos, 0x18), rel(&p[0])]
    });
    b.add("jr", vec![cond(CC_JR), imm()], |p, _| {
        vec![byte(&p[0].pos, 0x20 | (p[0].cond_code() << 3)), rel(&p[1])]
    });
    b.add("djnz", vec![imm()], |p, _| {
        vec![byte(&p[0].pos, 0x10), rel(&p[0])]
    });
    b.add("call", vec![imm()], |p, _| {
        vec![byte(&p[0].pos, 0xcd), lo(&p[0]), hi(&p[0])]
    });
    b.add("call", vec![cond(CC_ALL), imm()], |p, _| {
        vec![
            byte(&p[0].pos, 0xc4 | (p[0].cond_code() << 3)),
            lo(&p[1]),
            hi(&p[1]),
        ]
    });
    b.implied("ret", &[0xc9]);
    b.add("ret", vec![cond(CC_ALL)], |p, _| {
        vec![byte(&p[0].pos, 0xc0 | (p[0].cond_code() << 3))]
    });
    b.implied("reti", &[0xed, 0x4d]);
    b.implied("retn", &[0xed, 0x45]);
    b.add("rst", vec![imm()], |p, errors| {
        let opc = match const_value(&p[0], errors) {
            Some(v) if v >= 0 && v <= 0x38 && v % 8 == 0 => 0xc7 | v as u8,
            Some(_) => {
                errors.push(Error::new(
                    p[0].pos.clone(),
                    "RST vector must be one of $00, $08, ..., $38.",
                ));
                0xc7
            }
            None => 0xc7,
        };
        vec![byte(&p[0].pos, opc)]
    });

    // input / output
    b.add(
        "in",
        vec![reg(R8), ind(Register::C.mask())],
        |p, _| {
            vec![byte(&p[0].pos, 0xed), byte(&p[0].pos, 0x40 | (r3(&p[0]) << 3))]
        },
    );
    b.add("in", vec![reg(Register::A.mask()), ext()], |p, _| {
        vec![byte(&p[0].pos, 0xdb), val(&p[1])]
    });
    b.add(
        "out",
        vec![ind(Register::C.mask()), reg(R8)],
        |p, _| {
            vec![byte(&p[0].pos, 0xed), byte(&p[0].pos, 0x41 | (r3(&p[1]) << 3))]
        },
    );
    b.add("out", vec![ext(), reg(Register::A.mask())], |p, _| {
        vec![byte(&p[0].pos, 0xd3), val(&p[0])]
    });

    b.map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param_reg(name: &str) -> Param {
        Param::register(Pos::default(), Register::from_name(name).unwrap())
    }

    fn param_imm(v: i64) -> Param {
        Param::immediate(Pos::default(), ExprNode::int(Pos::default(), v, 2))
    }

    fn gen_bytes(mnemonic: &str, params: &[Param]) -> Vec<u8> {
        let entries = lookup(mnemonic).expect("mnemonic in table");
        let gen = find_match(entries, params).expect("entry matches");
        let mut errors = Vec::new();
        let nodes = gen(params, &mut errors);
        assert!(errors.is_empty(), "{errors:?}");
        nodes
            .iter()
            .map(|n| {
                n.borrow_mut().force_size(1);
                (n.borrow().eval() & 0xff) as u8
            })
            .collect()
    }

    #[test]
    fn ld_register_to_register() {
        assert_eq!(gen_bytes("ld", &[param_reg("a"), param_reg("b")]), vec![0x78]);
        assert_eq!(gen_bytes("ld", &[param_reg("h"), param_reg("e")]), vec![0x63]);
    }

    #[test]
    fn ld_indexed() {
        let p = [
            param_reg("a"),
            Param::indexed(
                Pos::default(),
                Register::Ix,
                Some(ExprNode::int(Pos::default(), 5, 1)),
            ),
        ];
        assert_eq!(gen_bytes("ld", &p), vec![0xdd, 0x7e, 0x05]);
    }

    #[test]
    fn ld_sixteen_bit_immediate_splits_bytes() {
        assert_eq!(
            gen_bytes("ld", &[param_reg("hl"), param_imm(0x1234)]),
            vec![0x21, 0x34, 0x12]
        );
        assert_eq!(
            gen_bytes("ld", &[param_reg("sp"), param_imm(0xc000)]),
            vec![0x31, 0x00, 0xc0]
        );
    }

    #[test]
    fn alu_single_and_double_operand_forms_agree() {
        assert_eq!(gen_bytes("add", &[param_reg("a"), param_reg("c")]), vec![0x81]);
        assert_eq!(gen_bytes("sub", &[param_reg("c")]), vec![0x91]);
        assert_eq!(gen_bytes("and", &[param_imm(0x56)]), vec![0xe6, 0x56]);
        assert_eq!(
            gen_bytes("adc", &[param_reg("hl"), param_reg("sp")]),
            vec![0xed, 0x7a]
        );
        assert_eq!(
            gen_bytes("add", &[param_reg("ix"), param_reg("de")]),
            vec![0xdd, 0x19]
        );
    }

    #[test]
    fn bit_ops_encode_bit_number() {
        assert_eq!(
            gen_bytes("res", &[param_imm(1), param_reg("c")]),
            vec![0xcb, 0x89]
        );
        let hl = Param::register_indirect(Pos::default(), Register::Hl);
        assert_eq!(gen_bytes("res", &[param_imm(2), hl]), vec![0xcb, 0x96]);
        let ix = Param::indexed(
            Pos::default(),
            Register::Ix,
            Some(ExprNode::int(Pos::default(), 0x3f, 1)),
        );
        assert_eq!(
            gen_bytes("res", &[param_imm(3), ix]),
            vec![0xdd, 0xcb, 0x3f, 0x9e]
        );
    }

    #[test]
    fn conditional_jumps_use_condition_codes() {
        let p = [
            Param::condition(Pos::default(), Condition::Nz),
            param_imm(0x1234),
        ];
        assert_eq!(gen_bytes("jp", &p), vec![0xc2, 0x34, 0x12]);
        // register C doubles as the carry condition
        let p = [param_reg("c"), param_imm(0x1234)];
        assert_eq!(gen_bytes("jp", &p), vec![0xda, 0x34, 0x12]);
    }

    #[test]
    fn rst_accepts_only_multiples_of_eight() {
        assert_eq!(gen_bytes("rst", &[param_imm(0x38)]), vec![0xff]);
        assert_eq!(gen_bytes("rst", &[param_imm(0x08)]), vec![0xcf]);
        let entries = lookup("rst").unwrap();
        let params = [param_imm(3)];
        let gen = find_match(entries, &params).unwrap();
        let mut errors = Vec::new();
        gen(&params, &mut errors);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn io_forms() {
        let c_ind = Param::register_indirect(Pos::default(), Register::C);
        assert_eq!(
            gen_bytes("in", &[param_reg("a"), c_ind.clone()]),
            vec![0xed, 0x78]
        );
        assert_eq!(
            gen_bytes("out", &[c_ind, param_reg("b")]),
            vec![0xed, 0x41]
        );
        let port = Param::ext_addressing(Pos::default(), ExprNode::int(Pos::default(), 0xfe, 2));
        assert_eq!(gen_bytes("in", &[param_reg("a"), port]), vec![0xdb, 0xfe]);
    }

    #[test]
    fn implied_sequences() {
        assert_eq!(gen_bytes("exx", &[]), vec![0xd9]);
        assert_eq!(gen_bytes("ldir", &[]), vec![0xed, 0xb0]);
        assert_eq!(gen_bytes("neg", &[]), vec![0xed, 0x44]);
        assert_eq!(gen_bytes("im", &[param_imm(2)]), vec![0xed, 0x5e]);
    }
}
