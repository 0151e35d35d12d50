// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Macro definitions: a parameter list plus the body captured as raw text
//! lines. Parameters are substituted textually at expansion time by
//! re-lexing each body line and splicing the actual argument text over
//! every identifier that names a formal.

use crate::core::scanner::{Scanner, TokenType};
use crate::core::text::{Line, Pos};

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub pos: Pos,
    pub params: Vec<String>,
    pub lines: Vec<Line>,
}

struct Replacement {
    start: usize,
    len: usize,
    text: String,
}

impl MacroDef {
    pub fn new(pos: Pos) -> Self {
        Self {
            pos,
            params: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn add_param(&mut self, name: &str) -> Result<(), String> {
        if self.params.iter().any(|p| p == name) {
            return Err(format!("Parameter {name} already exists"));
        }
        self.params.push(name.to_string());
        Ok(())
    }

    /// Body lines with each formal parameter replaced by its actual
    /// argument text.
    pub fn replace_params(&self, actuals: &[String]) -> Vec<Line> {
        self.lines
            .iter()
            .map(|line| {
                let substituted = self.substitute_line(line, actuals);
                Line {
                    filename: line.filename.clone(),
                    number: line.number,
                    chars: substituted,
                }
            })
            .collect()
    }

    fn substitute_line(&self, line: &Line, actuals: &[String]) -> Vec<char> {
        // Collect replacement spans first so untouched text keeps its
        // original characters, then splice back to front.
        let mut repls: Vec<Replacement> = Vec::new();
        let mut scanner = Scanner::new(line.clone());
        loop {
            let t = scanner.scan();
            if t.token_type == TokenType::Eol {
                break;
            }
            if t.token_type == TokenType::Ident {
                if let Some(idx) = self.params.iter().position(|p| *p == t.str_val) {
                    repls.push(Replacement {
                        start: t.pos.col - 1,
                        len: t.str_val.chars().count(),
                        text: actuals[idx].clone(),
                    });
                }
            }
        }
        // substitution errors surface when the expansion is assembled
        let _ = scanner.take_errors();

        let mut chars = line.chars.clone();
        for r in repls.iter().rev() {
            let replacement: Vec<char> = r.text.chars().collect();
            chars.splice(r.start..r.start + r.len, replacement);
        }
        chars
    }
}
