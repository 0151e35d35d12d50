// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The assembly driver.
//!
//! Drives the source line by line: label handling, conditional assembly,
//! directives, macro recording and expansion, and the per-CPU mnemonic
//! encoders. Byte emission goes through [`Assembler::emit_node`], which
//! registers a patch for every expression that is not yet resolved;
//! defining a symbol triggers resolution waves that rewrite the patched
//! bytes in place.

pub mod cli;
pub mod conditional;
pub mod includes;
pub mod listing;

#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::core::errors::{Error, ErrorSink, MacroInvocation};
use crate::core::expr::{BinaryOp, ExprNode, NodeRef, NodeType, UnaryOp};
use crate::core::macros::MacroDef;
use crate::core::scanner::{Scanner, Token, TokenType};
use crate::core::section::{Patch, Section};
use crate::core::symbol_table::{Symbol, SymbolKind, SymbolTable};
use crate::core::text::{Line, Pos, Text};
use crate::mos6502;
use crate::z80;

use conditional::ConditionStack;
use includes::{DirSearch, Includes};
use listing::ListingLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cpu {
    Mos6502,
    Z80,
}

impl Cpu {
    pub fn from_name(name: &str) -> Option<Cpu> {
        match name.to_ascii_lowercase().as_str() {
            "6502" => Some(Cpu::Mos6502),
            "z80" => Some(Cpu::Z80),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Cpu::Mos6502 => "6502",
            Cpu::Z80 => "z80",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    C128,
    C64,
    Pet,
}

impl Platform {
    pub fn from_name(name: &str) -> Option<Platform> {
        match name.to_ascii_lowercase().as_str() {
            "c128" => Some(Platform::C128),
            "c64" => Some(Platform::C64),
            "pet" => Some(Platform::Pet),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::C128 => "c128",
            Platform::C64 => "c64",
            Platform::Pet => "pet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Prg,
    Plain,
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Option<OutputFormat> {
        match name.to_ascii_lowercase().as_str() {
            "prg" => Some(OutputFormat::Prg),
            "plain" => Some(OutputFormat::Plain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Petscii,
}

impl Encoding {
    pub fn from_name(name: &str) -> Option<Encoding> {
        match name.to_ascii_lowercase().as_str() {
            "ascii" => Some(Encoding::Ascii),
            "petscii" => Some(Encoding::Petscii),
            _ => None,
        }
    }

    /// Unary applied to string and character data under this encoding.
    fn string_op(self) -> UnaryOp {
        match self {
            Encoding::Ascii => UnaryOp::Identity,
            Encoding::Petscii => UnaryOp::AsciiToPetscii,
        }
    }
}

/// The Z80 is only available in the C128.
pub fn is_valid_platform_cpu_combo(platform: Platform, cpu: Cpu) -> bool {
    cpu != Cpu::Z80 || platform == Platform::C128
}

#[derive(Clone)]
pub struct Config {
    pub include_paths: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub cpu: Cpu,
    pub platform: Platform,
    pub output: OutputFormat,
    pub encoding: Encoding,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            defines: Vec::new(),
            cpu: Cpu::Mos6502,
            platform: Platform::C128,
            output: OutputFormat::Prg,
            encoding: Encoding::Petscii,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Assemble,
    RecordMacro,
}

struct Mos6502Param {
    mode: mos6502::AddressingMode,
    val: Option<NodeRef>,
}

pub struct Assembler {
    // configuration; survives across runs
    includes: Box<dyn Includes>,
    defines: Vec<String>,
    default_cpu: Cpu,
    default_platform: Platform,
    default_output: OutputFormat,
    default_encoding: Encoding,

    // per-run state
    errors: Vec<Error>,
    warnings: Vec<Error>,
    error_modifier: Option<MacroInvocation>,
    scanner: Scanner,
    lookahead: Token,
    token_buf: Option<Token>,

    enabled: ConditionStack,
    state: State,
    current_macro: Option<Rc<RefCell<MacroDef>>>,

    cpu: Cpu,
    platform: Platform,
    output: OutputFormat,
    encoding: Encoding,

    section: Option<Section>,
    patches: BTreeMap<String, Vec<Patch>>,
    symbols: SymbolTable,

    listing_lines: Vec<ListingLine>,
    emitted: usize,
}

fn eol_token() -> Token {
    Token {
        token_type: TokenType::Eol,
        str_val: String::new(),
        int_val: 0,
        float_val: 0.0,
        pos: Pos::default(),
    }
}

fn is_local_label(name: &str) -> bool {
    name.starts_with('_')
}

impl Assembler {
    pub fn new(config: Config) -> Self {
        let includes = Box::new(DirSearch::new(config.include_paths.clone()));
        Self::with_includes(config, includes)
    }

    pub fn with_includes(config: Config, includes: Box<dyn Includes>) -> Self {
        Self {
            includes,
            defines: config.defines,
            default_cpu: config.cpu,
            default_platform: config.platform,
            default_output: config.output,
            default_encoding: config.encoding,
            errors: Vec::new(),
            warnings: Vec::new(),
            error_modifier: None,
            scanner: Scanner::new(Line::new("", 0, "")),
            lookahead: eol_token(),
            token_buf: None,
            enabled: ConditionStack::new(),
            state: State::Assemble,
            current_macro: None,
            cpu: config.cpu,
            platform: config.platform,
            output: config.output,
            encoding: config.encoding,
            section: None,
            patches: BTreeMap::new(),
            symbols: SymbolTable::new(),
            listing_lines: Vec::new(),
            emitted: 0,
        }
    }

    /// Assemble a complete source. State from any previous run is reset.
    pub fn assemble(&mut self, text: Text) {
        self.errors.clear();
        self.warnings.clear();
        self.error_modifier = None;
        self.section = None;
        self.patches.clear();
        self.enabled = ConditionStack::new();
        self.listing_lines.clear();
        self.symbols = SymbolTable::new();
        self.state = State::Assemble;
        self.current_macro = None;
        self.output = self.default_output;
        self.encoding = self.default_encoding;

        self.set_cpu(self.default_cpu);
        self.set_platform(self.default_platform);

        for name in self.defines.clone() {
            if let Err(msg) = self.add_symbol(
                &name,
                SymbolKind::Const,
                ExprNode::int(Pos::default(), 1, 1),
            ) {
                self.add_error(Pos::default(), msg);
            }
        }

        let text = self.resolve_includes(text);
        self.assemble_text(&text);

        let ll = text.last_line();
        let p = Pos::new(ll.filename.clone(), ll.number, 1);
        if self.state == State::RecordMacro {
            self.add_error(p.clone(), ".endm expected".to_string());
        }
        self.report_unresolved_symbols(&p, |_| true);
        self.report_unresolved_patches(|_| true);
        if self.enabled.depth() > 1 {
            self.add_error(p, ".endif expected".to_string());
        }
    }

    /// Convenience wrapper over [`Assembler::assemble`].
    pub fn assemble_source(&mut self, filename: &str, source: &str) {
        self.assemble(Text::process(filename, source));
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Error] {
        &self.warnings
    }

    pub fn origin(&self) -> i64 {
        self.section.as_ref().map(Section::org).unwrap_or(0)
    }

    pub fn bytes(&self) -> &[u8] {
        self.section.as_ref().map(Section::bytes).unwrap_or(&[])
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output
    }

    pub fn cpu(&self) -> Cpu {
        self.cpu
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// All labels with their addresses, in definition order.
    pub fn labels(&self) -> Vec<(String, i64)> {
        self.symbols
            .symbols()
            .iter()
            .filter(|s| s.kind == SymbolKind::Label)
            .filter_map(|s| {
                let v = s.value.as_ref()?;
                let v = v.borrow();
                v.is_resolved().then(|| (s.name.clone(), v.eval()))
            })
            .collect()
    }

    pub fn listing_lines(&self) -> &[ListingLine] {
        &self.listing_lines
    }

    /// Rendered listing for the last run.
    pub fn listing(&self) -> String {
        listing::render_listing(&self.listing_lines, self.origin(), self.bytes())
    }

    /// VICE-format label dump for the last run.
    pub fn vice_labels(&self) -> String {
        listing::render_vice_labels(&self.labels())
    }

    // ---- include resolution pre-pass ----

    fn resolve_includes(&mut self, text: Text) -> Text {
        let mut res = Text::new();
        for line in text.lines {
            self.begin_line(line.clone());
            let (t, _, label) = self.maybe_label();
            if t.token_type != TokenType::Include {
                res.append_line(self.scanner.line().clone());
                continue;
            }
            self.match_token(TokenType::Include);
            let p = self.lookahead.pos.clone();
            let filename = self.lookahead.str_val.clone();
            self.match_token(TokenType::String);
            let Some(path) = self.includes.find(&filename) else {
                self.add_error(
                    p,
                    format!("Can't find file \"{filename}\" in include paths."),
                );
                res.append_line(line);
                continue;
            };
            let content = match self.includes.read(&path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                Err(err) => {
                    self.add_error(
                        p,
                        format!("Can't read file \"{}\": {err}", path.display()),
                    );
                    String::new()
                }
            };
            if let Some(label) = label {
                let l = self.scanner.line();
                res.append_line(Line::new(l.filename.clone(), l.number, &label));
            }
            let included = self.resolve_includes(Text::process(&filename, &content));
            res.append(included);
        }
        res
    }

    // ---- line driving ----

    fn assemble_text(&mut self, text: &Text) {
        self.state = State::Assemble;
        for line in &text.lines {
            let start_pc = self.pc();
            self.emitted = 0;
            self.begin_line(line.clone());
            let add_to_listing = self.process_line();
            if add_to_listing {
                self.listing_lines.push(ListingLine {
                    addr: start_pc,
                    bytes: self.emitted,
                    line: line.clone(),
                });
            }
        }
    }

    fn begin_line(&mut self, line: Line) {
        self.scanner = Scanner::new(line);
        self.token_buf = None;
        self.lookahead = self.scanner.scan();
        self.drain_scanner_errors();
    }

    fn next_token(&mut self) {
        if let Some(t) = self.token_buf.take() {
            self.lookahead = t;
            return;
        }
        self.lookahead = self.scanner.scan();
        self.drain_scanner_errors();
    }

    fn push_token(&mut self) {
        self.token_buf = Some(self.lookahead.clone());
    }

    fn drain_scanner_errors(&mut self) {
        for e in self.scanner.take_errors() {
            self.add_error(e.pos, e.msg);
        }
    }

    fn match_token(&mut self, t: TokenType) {
        if self.lookahead.token_type != t {
            self.add_error(
                self.lookahead.pos.clone(),
                format!("Expected {}, but found {}", t, self.lookahead.token_type),
            );
        }
        self.next_token();
    }

    fn match_eol(&mut self) {
        if self.lookahead.token_type != TokenType::Semicolon
            && self.lookahead.token_type != TokenType::Eol
        {
            self.add_error(
                self.lookahead.pos.clone(),
                "';' or EOL expected".to_string(),
            );
        }
    }

    fn pc(&self) -> i64 {
        self.section.as_ref().map(Section::pc).unwrap_or(0)
    }

    /// Read an optional label: an identifier at column 1 is always a label;
    /// elsewhere only when followed by a colon. Returns the token that
    /// starts the rest of the line.
    fn maybe_label(&mut self) -> (Token, Pos, Option<String>) {
        let t = self.lookahead.clone();
        if t.token_type != TokenType::Ident {
            return (t, Pos::default(), None);
        }
        if t.pos.col == 1 {
            let label_pos = t.pos.clone();
            let label = t.str_val.clone();
            self.next_token();
            if self.lookahead.token_type == TokenType::Colon {
                self.next_token();
            }
            return (self.lookahead.clone(), label_pos, Some(label));
        }
        // not at column 1: a label only if a colon follows
        let old_lookahead = self.lookahead.clone();
        self.next_token();
        if self.lookahead.token_type == TokenType::Colon {
            let label_pos = t.pos.clone();
            let label = t.str_val.clone();
            self.next_token();
            (self.lookahead.clone(), label_pos, Some(label))
        } else {
            self.push_token();
            self.lookahead = old_lookahead.clone();
            (old_lookahead, Pos::default(), None)
        }
    }

    fn process_line(&mut self) -> bool {
        let mut add_to_listing = true;
        let (t, label_pos, label) = self.maybe_label();
        let errs = self.errors.len();

        if matches!(
            t.token_type,
            TokenType::If
                | TokenType::Ifdef
                | TokenType::Ifndef
                | TokenType::Else
                | TokenType::Endif
        ) {
            self.maybe_add_label(&label_pos, &label);
            self.handle_conditional(&t);
        } else if !self.enabled.top() {
            // conditional assembly is off; ignore the line
            return true;
        } else {
            match self.state {
                State::Assemble => add_to_listing = self.assemble_line(&t, &label_pos, &label),
                State::RecordMacro => self.record_macro(),
            }
        }

        if self.errors.len() <= errs {
            // only insist on EOL when the line produced no errors
            self.match_eol();
        }
        add_to_listing
    }

    fn handle_conditional(&mut self, t: &Token) {
        match t.token_type {
            TokenType::Ifdef | TokenType::Ifndef => {
                let negate = t.token_type == TokenType::Ifndef;
                self.next_token();
                let name = self.lookahead.str_val.clone();
                self.match_token(TokenType::Ident);
                let mut found = self.symbols.get(&name).is_some();
                if negate {
                    found = !found;
                }
                self.enabled.push(self.enabled.top() && found);
            }
            TokenType::If => {
                self.next_token();
                let p = self.lookahead.pos.clone();
                let mut e = self.expr(2, true);
                if let Some(bin_op) = rel_op(self.lookahead.token_type) {
                    self.next_token();
                    let mut e2 = self.expr(2, true);
                    let t1 = e.borrow().node_type();
                    let t2 = e2.borrow().node_type();
                    if t1 != t2 && t1.is_numeric() && t2.is_numeric() {
                        // promote the int side so both compare as floats
                        if t1 == NodeType::Int {
                            let pos = e.borrow().pos.clone();
                            e = ExprNode::binary(e, ExprNode::float(pos, 0.0), BinaryOp::Add);
                        } else {
                            let pos = e2.borrow().pos.clone();
                            e2 = ExprNode::binary(e2, ExprNode::float(pos, 0.0), BinaryOp::Add);
                        }
                        e = ExprNode::binary(e, e2, bin_op);
                    } else if t1 != t2 {
                        let pos = e2.borrow().pos.clone();
                        self.add_error(pos, "types don't match".to_string());
                    } else {
                        e = ExprNode::binary(e, e2, bin_op);
                    }
                }
                if !e.borrow().is_resolved() {
                    self.add_error(p.clone(), "expression is not resolved".to_string());
                    e = ExprNode::int(p, 1, 1);
                }
                let truthy = match e.borrow().node_type() {
                    NodeType::Int => e.borrow().eval() != 0,
                    NodeType::Float => e.borrow().eval_f64() != 0.0,
                    NodeType::String => !e.borrow().eval_str().is_empty(),
                };
                self.enabled.push(self.enabled.top() && truthy);
            }
            TokenType::Else => {
                self.next_token();
                if self.enabled.depth() == 1 {
                    self.add_error(
                        t.pos.clone(),
                        ".else without .if/.ifdef/.ifndef".to_string(),
                    );
                    return;
                }
                let v = self.enabled.pop();
                self.enabled.push(self.enabled.top() && !v);
            }
            TokenType::Endif => {
                self.next_token();
                if self.enabled.depth() == 1 {
                    self.add_error(
                        t.pos.clone(),
                        ".endif without .if/.ifdef/.ifndef".to_string(),
                    );
                    return;
                }
                self.enabled.pop();
            }
            _ => unreachable!("not a conditional token"),
        }
    }

    fn maybe_add_label(&mut self, label_pos: &Pos, label: &Option<String>) {
        if let Some(label) = label {
            self.add_label(label_pos, label);
        }
    }

    fn assemble_line(&mut self, t: &Token, label_pos: &Pos, label: &Option<String>) -> bool {
        let mut add_to_listing = true;

        if t.token_type == TokenType::Semicolon || t.token_type == TokenType::Eol {
            self.maybe_add_label(label_pos, label);
            return true;
        }

        // label placement rules
        match t.token_type {
            TokenType::Equ | TokenType::Macro => {
                if label.is_none() {
                    self.add_error(t.pos.clone(), "Label is necessary".to_string());
                }
            }
            TokenType::Org => {
                if label.is_some() {
                    self.add_error(label_pos.clone(), "Label is not allowed".to_string());
                }
            }
            _ => self.maybe_add_label(label_pos, label),
        }

        match t.token_type {
            TokenType::Incbin => {
                self.next_token();
                let p = self.lookahead.pos.clone();
                let filename = self.lookahead.str_val.clone();
                self.match_token(TokenType::String);
                let Some(path) = self.includes.find(&filename) else {
                    self.add_error(
                        p,
                        format!("Can't find file \"{filename}\" in include paths."),
                    );
                    return true;
                };
                match self.includes.read(&path) {
                    Ok(data) => {
                        for b in data {
                            self.emit_node(ExprNode::int(p.clone(), b as i64, 1));
                        }
                    }
                    Err(err) => {
                        self.add_error(
                            p,
                            format!("Can't read file \"{}\": {err}", path.display()),
                        );
                    }
                }
            }
            TokenType::Byte => {
                self.next_token();
                let mut nodes = self.db_op();
                while self.lookahead.token_type == TokenType::Comma {
                    self.next_token();
                    nodes.extend(self.db_op());
                }
                for n in nodes {
                    self.emit_node(n);
                }
            }
            TokenType::Word => {
                self.next_token();
                let mut nodes = vec![self.word_op()];
                while self.lookahead.token_type == TokenType::Comma {
                    self.next_token();
                    nodes.push(self.word_op());
                }
                for n in nodes {
                    self.emit_node(n);
                }
            }
            TokenType::Float => {
                self.next_token();
                let mut nodes = vec![self.float_db_op()];
                while self.lookahead.token_type == TokenType::Comma {
                    self.next_token();
                    nodes.push(self.float_db_op());
                }
                for n in nodes {
                    self.emit_node(n);
                }
            }
            TokenType::Reserve => {
                self.next_token();
                let pos = self.lookahead.pos.clone();
                let size_node = self.expr(2, false);
                let count = if size_node.borrow().is_resolved() {
                    size_node.borrow().eval()
                } else {
                    self.add_error(pos.clone(), "Expression is unresolved".to_string());
                    1
                };
                let mut fill = ExprNode::int(pos.clone(), 0, 1);
                while self.lookahead.token_type == TokenType::Comma {
                    self.next_token();
                    let p = self.lookahead.pos.clone();
                    let vals = self.db_op();
                    if vals.len() > 1 {
                        self.add_error(p, "Strings not allowed.".to_string());
                    }
                    fill = vals[0].clone();
                }
                for _ in 0..count {
                    self.emit_node(fill.clone());
                }
            }
            TokenType::Org => {
                self.next_token();
                let org_node = self.expr(2, false);
                let org = if org_node.borrow().is_resolved() {
                    org_node.borrow().eval()
                } else {
                    self.add_error(
                        t.pos.clone(),
                        "Can't use forward declarations in .org".to_string(),
                    );
                    0
                };
                if self.section.is_some() {
                    let max = self.pc();
                    let mut org = org;
                    if org < max {
                        self.add_error(
                            t.pos.clone(),
                            format!("New origin {org} is lower than current pc {max}"),
                        );
                        org = max;
                    }
                    let section = self.section.as_mut().expect("section exists");
                    for _ in 0..(org - max) {
                        section.emit(0);
                    }
                } else {
                    self.section = Some(Section::new(org));
                }
            }
            TokenType::Align => {
                self.next_token();
                let node = self.expr(2, false);
                if !node.borrow().is_resolved() {
                    self.add_error(
                        t.pos.clone(),
                        "Can't use forward declarations in .align".to_string(),
                    );
                    return true;
                }
                let n = node.borrow().eval();
                if n > 0 {
                    let to_add = (n - self.pc() % n) % n;
                    if let Some(section) = &mut self.section {
                        for _ in 0..to_add {
                            section.emit(0);
                        }
                    }
                }
            }
            TokenType::Equ => {
                self.next_token();
                let pos = t.pos.clone();
                let val = self.expr(2, true);
                if let Some(label) = label {
                    if let Err(msg) = self.add_symbol(label, SymbolKind::Const, val) {
                        self.add_error(pos, msg);
                    }
                }
            }
            TokenType::Cpu => {
                self.next_token();
                let cpu = self.lookahead.str_val.clone();
                let pos = self.lookahead.pos.clone();
                self.match_token(TokenType::String);
                match Cpu::from_name(&cpu) {
                    Some(c) if is_valid_platform_cpu_combo(self.platform, c) => self.set_cpu(c),
                    Some(_) => self.add_error(
                        pos,
                        format!(
                            "CPU \"{cpu}\" not supported for platform \"{}\"",
                            self.platform.name()
                        ),
                    ),
                    None => self.add_error(pos, format!("Unknown CPU \"{cpu}\"")),
                }
            }
            TokenType::Platform => {
                if self.section.as_ref().map(|s| s.size() > 0).unwrap_or(false) {
                    self.add_error(t.pos.clone(), "Can't change platform anymore".to_string());
                    return true;
                }
                self.next_token();
                let platform = self.lookahead.str_val.clone();
                let pos = self.lookahead.pos.clone();
                self.match_token(TokenType::String);
                match Platform::from_name(&platform) {
                    Some(p) if is_valid_platform_cpu_combo(p, self.cpu) => self.set_platform(p),
                    Some(_) => self.add_error(
                        pos,
                        format!(
                            "Platform \"{platform}\" not supported for CPU \"{}\"",
                            self.cpu.name()
                        ),
                    ),
                    None => self.add_error(pos, format!("Unknown platform \"{platform}\"")),
                }
            }
            TokenType::Encoding => {
                self.next_token();
                let name = self.lookahead.str_val.clone();
                let pos = self.lookahead.pos.clone();
                self.match_token(TokenType::String);
                match Encoding::from_name(&name) {
                    Some(e) => self.encoding = e,
                    None => self.add_error(pos, format!("Unknown encoding \"{name}\"")),
                }
            }
            TokenType::Output => {
                self.next_token();
                let name = self.lookahead.str_val.clone();
                let pos = self.lookahead.pos.clone();
                self.match_token(TokenType::String);
                match OutputFormat::from_name(&name) {
                    Some(o) => self.output = o,
                    None => self.add_error(pos, format!("Unknown output format \"{name}\"")),
                }
            }
            TokenType::Fail => {
                self.next_token();
                let msg = self.lookahead.str_val.clone();
                self.match_token(TokenType::String);
                self.add_error(t.pos.clone(), msg);
            }
            TokenType::Macro => {
                self.next_token();
                let macro_name = label.clone().unwrap_or_default();
                let def = Rc::new(RefCell::new(MacroDef::new(t.pos.clone())));
                self.current_macro = Some(def.clone());
                if mos6502::is_mnemonic(&macro_name) || z80::instructions::is_mnemonic(&macro_name)
                {
                    self.add_error(
                        label_pos.clone(),
                        format!("Can't use mnemonic \"{macro_name}\" as macro name"),
                    );
                }
                if self
                    .symbols
                    .add(Symbol::with_macro(macro_name.clone(), def))
                    .is_err()
                {
                    self.add_error(
                        label_pos.clone(),
                        format!("\"{macro_name}\" is already defined"),
                    );
                }
                if self.lookahead.token_type != TokenType::Eol {
                    self.macro_param();
                    while self.lookahead.token_type == TokenType::Comma {
                        self.next_token();
                        self.macro_param();
                    }
                }
                self.state = State::RecordMacro;
            }
            TokenType::Endm => {
                self.add_error(t.pos.clone(), ".endm without .macro".to_string());
            }
            TokenType::Ident => {
                let op = t.str_val.clone();
                self.next_token();
                let found = self
                    .symbols
                    .get(&op)
                    .map(|s| (s.kind, s.macro_def.clone()));
                match found {
                    Some((SymbolKind::Macro, def)) => {
                        let def = def.expect("macro symbol carries a body");
                        self.handle_macro_instantiation(&def, t.pos.clone());
                        add_to_listing = false;
                    }
                    Some(_) => {
                        self.add_error(t.pos.clone(), format!("\"{op}\" is not a macro"));
                        return true;
                    }
                    None => match self.cpu {
                        Cpu::Mos6502 => self.handle_6502_mnemonic(t),
                        Cpu::Z80 => self.handle_z80_mnemonic(t),
                    },
                }
            }
            _ => {
                self.add_error(t.pos.clone(), "Identifier or directive expected".to_string());
            }
        }
        add_to_listing
    }

    fn set_cpu(&mut self, cpu: Cpu) {
        debug!(cpu = cpu.name(), "switching cpu");
        self.symbols.remove("CPU");
        let _ = self.symbols.add(Symbol::with_value(
            "CPU",
            SymbolKind::Const,
            ExprNode::string(Pos::default(), cpu.name()),
        ));
        self.cpu = cpu;
    }

    fn set_platform(&mut self, platform: Platform) {
        debug!(platform = platform.name(), "switching platform");
        self.symbols.remove("PLATFORM");
        let _ = self.symbols.add(Symbol::with_value(
            "PLATFORM",
            SymbolKind::Const,
            ExprNode::string(Pos::default(), platform.name()),
        ));
        self.platform = platform;
    }

    // ---- macros ----

    fn macro_param(&mut self) {
        let name = self.lookahead.str_val.clone();
        let pos = self.lookahead.pos.clone();
        self.match_token(TokenType::Ident);
        if let Some(m) = &self.current_macro {
            if m.borrow_mut().add_param(&name).is_err() {
                self.add_error(pos, format!("Parameter {name} is already used"));
            }
        }
    }

    fn record_macro(&mut self) {
        let (t, label_pos, label) = self.maybe_label();
        match t.token_type {
            TokenType::Macro => {
                self.add_error(t.pos.clone(), "Nested macros are not allowed".to_string());
            }
            TokenType::Endm => {
                self.next_token();
                if label.is_some() {
                    self.add_error(label_pos, "Labels not allowed for .endm".to_string());
                }
                self.state = State::Assemble;
            }
            _ => {
                if let Some(m) = &self.current_macro {
                    m.borrow_mut().lines.push(self.scanner.line().clone());
                }
                // scan to EOL so the driver's end-of-line check is happy
                while self.lookahead.token_type != TokenType::Eol {
                    self.next_token();
                }
            }
        }
    }

    fn act_macro_param(&mut self) -> String {
        // actmacroparam := ["#" ["<"|">"]] expr
        let start = self.lookahead.pos.clone();
        if self.lookahead.token_type == TokenType::Hash {
            self.next_token();
            if self.lookahead.token_type == TokenType::Lt
                || self.lookahead.token_type == TokenType::Gt
            {
                self.next_token();
            }
        }
        self.expr(2, true);
        let end = self.lookahead.pos.clone();
        self.scanner.line().extract(&start, &end).trim().to_string()
    }

    fn handle_macro_instantiation(&mut self, def: &Rc<RefCell<MacroDef>>, call_pos: Pos) {
        let param_start = self.lookahead.pos.clone();
        let mut actuals = Vec::new();
        if self.lookahead.token_type != TokenType::Semicolon
            && self.lookahead.token_type != TokenType::Eol
        {
            actuals.push(self.act_macro_param());
            while self.lookahead.token_type == TokenType::Comma {
                self.next_token();
                actuals.push(self.act_macro_param());
            }
        }

        let expected = def.borrow().params.len();
        if actuals.len() != expected {
            self.add_error(
                param_start,
                format!(
                    "Wrong number of arguments: {expected} expected, {} found",
                    actuals.len()
                ),
            );
            return;
        }

        debug!(line = call_pos.line, "expanding macro");
        let lines = def.borrow().replace_params(&actuals);

        // local labels outside the macro are hidden during expansion
        let saved_locals = self
            .symbols
            .remove_matching(|s| s.kind == SymbolKind::Label && is_local_label(&s.name));

        let saved_modifier = self
            .error_modifier
            .replace(MacroInvocation { call_pos });
        self.assemble_text(&Text { lines });
        self.error_modifier = saved_modifier;

        // locals mentioned in the arguments belong to the caller's scope
        let mut passed_in = BTreeSet::new();
        for actual in &actuals {
            for l in extract_local_labels(actual) {
                passed_in.insert(l);
            }
        }
        let local_except_passed_in = |name: &str| {
            is_local_label(name) && !passed_in.contains(&name.to_ascii_lowercase())
        };

        let p = self.lookahead.pos.clone();
        self.report_unresolved_symbols(&p, &local_except_passed_in);

        let created_in_macro: BTreeSet<String> = self
            .symbols
            .symbols()
            .iter()
            .filter(|s| s.kind == SymbolKind::Label && is_local_label(&s.name))
            .map(|s| s.name.to_ascii_lowercase())
            .collect();
        self.report_unresolved_patches(|name| created_in_macro.contains(name));

        self.symbols
            .remove_matching(|s| local_except_passed_in(&s.name));

        // reinstate the caller's locals; re-adding resolves patches that
        // were created against passed-in labels
        for sym in saved_locals {
            if let Some(val) = sym.value {
                let _ = self.add_symbol(&sym.name, sym.kind, val);
            }
        }
    }

    // ---- symbols, labels and patches ----

    fn add_label(&mut self, pos: &Pos, label: &str) {
        let pc = self.pc();
        if let Err(msg) = self.add_symbol(label, SymbolKind::Label, ExprNode::int(pos.clone(), pc, 2))
        {
            self.add_error(pos.clone(), msg);
            return;
        }
        if !is_local_label(label) {
            self.report_unresolved_symbols(pos, is_local_label);
            self.symbols
                .remove_matching(|s| is_local_label(&s.name));
        }
    }

    fn add_symbol(&mut self, name: &str, kind: SymbolKind, val: NodeRef) -> Result<(), String> {
        self.symbols
            .add(Symbol::with_value(name, kind, val.clone()))?;
        let resolved = val.borrow().is_resolved() && val.borrow().node_type() == NodeType::Int;
        if resolved {
            let value = val.borrow().eval();
            self.resolve_dependencies(name, value);
        }
        Ok(())
    }

    fn resolve_dependencies(&mut self, symbol: &str, val: i64) {
        let symbol = symbol.to_ascii_lowercase();
        trace!(symbol = %symbol, val, "resolving dependents");

        if let Some(patches) = self.patches.remove(&symbol) {
            let mut remaining = Vec::new();
            for p in patches {
                p.node.borrow_mut().resolve(&symbol, val);
                if p.node.borrow().is_resolved() {
                    let mut errs = Vec::new();
                    if let Some(section) = &mut self.section {
                        section.apply_patch(&p, &mut errs);
                    }
                    for e in errs {
                        self.add_error(e.pos, e.msg);
                    }
                } else {
                    remaining.push(p);
                }
            }
            if !remaining.is_empty() {
                self.patches.insert(symbol.clone(), remaining);
            }
        }

        // cascade into symbols whose value expressions mention the name
        let pending: Vec<(String, NodeRef)> = self
            .symbols
            .symbols()
            .iter()
            .filter(|s| s.kind != SymbolKind::Macro)
            .filter_map(|s| s.value.clone().map(|v| (s.name.clone(), v)))
            .filter(|(_, v)| !v.borrow().is_resolved())
            .collect();
        for (name, v) in pending {
            v.borrow_mut().resolve(&symbol, val);
            if v.borrow().is_resolved() {
                if let Err(msg) = v.borrow().check_range() {
                    let pos = v.borrow().pos.clone();
                    self.add_error(pos, msg);
                }
                let value = v.borrow().eval();
                self.resolve_dependencies(&name, value);
            }
        }
    }

    fn register_patch(&mut self, pc: i64, node: &NodeRef) {
        for sym in node.borrow().unresolved_symbols() {
            self.patches
                .entry(sym)
                .or_default()
                .push(Patch {
                    pc,
                    node: node.clone(),
                });
        }
    }

    fn report_unresolved_symbols(&mut self, pos: &Pos, filter: impl Fn(&str) -> bool) {
        let unresolved: Vec<(String, BTreeSet<String>)> = self
            .symbols
            .symbols()
            .iter()
            .filter(|s| s.kind != SymbolKind::Macro && filter(&s.name))
            .filter_map(|s| {
                let v = s.value.as_ref()?;
                let v = v.borrow();
                if v.is_resolved() {
                    None
                } else {
                    Some((s.name.clone(), v.unresolved_symbols()))
                }
            })
            .collect();
        for (name, syms) in unresolved {
            if syms.is_empty() {
                self.add_error(pos.clone(), format!("Undefined label \"{name}\""));
            } else {
                let list: Vec<String> = syms.into_iter().collect();
                self.add_error(
                    pos.clone(),
                    format!(
                        "Undefined symbols in definition of {name}: {}",
                        list.join(", ")
                    ),
                );
            }
        }
    }

    fn report_unresolved_patches(&mut self, filter: impl Fn(&str) -> bool) {
        let mut pending: Vec<(Pos, String)> = Vec::new();
        for (label, patches) in &self.patches {
            if !filter(label) {
                continue;
            }
            for p in patches {
                if !p.node.borrow().is_resolved() {
                    pending.push((p.node.borrow().pos.clone(), label.clone()));
                }
            }
        }
        for (pos, label) in pending {
            self.add_error(pos, format!("Undefined label \"{label}\""));
        }
    }

    // ---- emission ----

    fn emit_node(&mut self, node: NodeRef) {
        if self.section.is_none() {
            let pos = self.scanner.line_start();
            self.add_error(pos, "No .org specified".to_string());
            self.section = Some(Section::new(0));
        }

        let node_type = node.borrow().node_type();
        match node_type {
            NodeType::String => {
                let s = node.borrow().eval_str();
                let section = self.section.as_mut().expect("section exists");
                for ch in s.chars() {
                    section.emit((ch as u32 & 0xff) as u8);
                    self.emitted += 1;
                }
            }
            NodeType::Float => {
                if !node.borrow().is_resolved() {
                    let pos = node.borrow().pos.clone();
                    self.add_error(pos, "Can't emit unresolved float".to_string());
                    return;
                }
                let v = node.borrow().eval_f64();
                let (bytes, in_range) = encode_float(v);
                if !in_range {
                    let pos = node.borrow().pos.clone();
                    self.add_error(pos, "Number is out of range.".to_string());
                }
                let section = self.section.as_mut().expect("section exists");
                for b in bytes {
                    section.emit(b);
                }
                self.emitted += 5;
            }
            NodeType::Int => {
                let resolved = node.borrow().is_resolved();
                let relative = node.borrow().is_relative();
                let pc = self.pc();
                let mut size = node.borrow().result_size();
                let mut val = 0;
                if resolved {
                    if relative {
                        val = node.borrow().eval() - (pc + 1);
                        if !(-128..=127).contains(&val) {
                            let pos = node.borrow().pos.clone();
                            self.add_error(pos, "Branch target too far away.".to_string());
                        }
                        size = 1;
                    } else {
                        if let Err(msg) = node.borrow().check_range() {
                            let pos = node.borrow().pos.clone();
                            self.add_error(pos, msg);
                        }
                        val = node.borrow().eval();
                    }
                } else {
                    // placeholder zeros; the patch rewrites them later
                    self.register_patch(pc, &node);
                }
                let section = self.section.as_mut().expect("section exists");
                for _ in 0..size {
                    section.emit((val & 0xff) as u8);
                    val >>= 8;
                }
                self.emitted += size;
            }
        }
    }

    // ---- expression parsing ----

    fn expr(&mut self, size: usize, strings_allowed: bool) -> NodeRef {
        // expr := ["-"] term { "+"|"-"|"|" term }
        let mut neg = false;
        let mut neg_pos = Pos::default();
        if self.lookahead.token_type == TokenType::Minus {
            neg = true;
            neg_pos = self.lookahead.pos.clone();
            self.next_token();
        }
        let mut node = self.term(size, strings_allowed);
        if neg {
            if !node.borrow().node_type().is_numeric() {
                self.add_error(
                    neg_pos,
                    "Operation not supported on non-numeric types".to_string(),
                );
            } else {
                node = ExprNode::unary(neg_pos, UnaryOp::Negate, node);
            }
        }

        loop {
            let op = match self.lookahead.token_type {
                TokenType::Plus => BinaryOp::Add,
                TokenType::Minus => BinaryOp::Sub,
                TokenType::Bar => BinaryOp::BitOr,
                _ => break,
            };
            self.next_token();
            let p = self.lookahead.pos.clone();
            let n2 = self.term(size, strings_allowed);
            if !n2.borrow().node_type().is_numeric() || !node.borrow().node_type().is_numeric() {
                self.add_error(p, "operation only supported on numeric types".to_string());
            } else {
                node = ExprNode::binary(node, n2, op);
            }
        }
        node
    }

    fn term(&mut self, size: usize, strings_allowed: bool) -> NodeRef {
        // term := factor { "*"|"/"|"%"|"&"|"^" factor }
        let mut node = self.factor(size, strings_allowed);
        loop {
            let op = match self.lookahead.token_type {
                TokenType::Asterisk => BinaryOp::Mul,
                TokenType::Slash => BinaryOp::Div,
                TokenType::Percent => BinaryOp::Mod,
                TokenType::Ampersand => BinaryOp::BitAnd,
                TokenType::Caret => BinaryOp::BitXor,
                _ => break,
            };
            self.next_token();
            let p = self.lookahead.pos.clone();
            let n2 = self.factor(size, strings_allowed);
            if !n2.borrow().node_type().is_numeric() || !node.borrow().node_type().is_numeric() {
                self.add_error(p, "operation only supported on numeric types".to_string());
            } else {
                if matches!(op, BinaryOp::Div | BinaryOp::Mod)
                    && n2.borrow().is_resolved()
                    && n2.borrow().node_type() == NodeType::Int
                    && n2.borrow().eval() == 0
                {
                    self.add_error(p, "Division by zero".to_string());
                    continue;
                }
                node = ExprNode::binary(node, n2, op);
            }
        }
        node
    }

    fn factor(&mut self, size: usize, strings_allowed: bool) -> NodeRef {
        // factor := "~" factor | number | char-const | string | ident | "(" expr ")" | "*"
        let p = self.lookahead.pos.clone();
        match self.lookahead.token_type {
            TokenType::Tilde => {
                self.next_token();
                let node = self.factor(size, strings_allowed);
                if node.borrow().node_type() != NodeType::Int {
                    self.add_error(p, "operation only supported on int type".to_string());
                    node
                } else {
                    ExprNode::unary(p, UnaryOp::BitNot, node)
                }
            }
            TokenType::Integer => {
                let val = self.lookahead.int_val;
                if !value_fits(val, size) {
                    self.add_error(
                        p.clone(),
                        format!(
                            "Constant ${val:x} (decimal {val}) is wider than {} bits",
                            size * 8
                        ),
                    );
                }
                let node = ExprNode::int(p, val, natural_size(val).min(size));
                self.next_token();
                node
            }
            TokenType::FloatLit => {
                let val = self.lookahead.float_val;
                let node = ExprNode::float(p, val);
                self.next_token();
                node
            }
            TokenType::Char => {
                let val = self.lookahead.str_val.chars().next().unwrap_or('\0');
                let inner = ExprNode::int(p.clone(), val as i64, 1);
                let node = ExprNode::unary(p, self.encoding.string_op(), inner);
                self.next_token();
                node
            }
            TokenType::String => {
                let s = self.lookahead.str_val.clone();
                let node = if strings_allowed {
                    ExprNode::string(p, s)
                } else {
                    self.add_error(p.clone(), "Strings are not allowed".to_string());
                    ExprNode::int(p, 0, 1)
                };
                self.next_token();
                node
            }
            TokenType::Ident => {
                let sym = self.lookahead.str_val.clone();
                enum Resolved {
                    Int(i64),
                    Float(f64),
                    Str(String),
                    No,
                }
                let resolved = match self.symbols.get(&sym).and_then(|s| s.value.as_ref()) {
                    Some(val) => {
                        let val = val.borrow();
                        if val.is_resolved() {
                            match val.node_type() {
                                NodeType::Int => Resolved::Int(val.eval()),
                                NodeType::Float => Resolved::Float(val.eval_f64()),
                                NodeType::String => Resolved::Str(val.eval_str()),
                            }
                        } else {
                            Resolved::No
                        }
                    }
                    None => Resolved::No,
                };
                let node = match resolved {
                    Resolved::Int(v) => ExprNode::int(p, v, natural_size(v).min(size)),
                    Resolved::Float(f) => ExprNode::float(p, f),
                    Resolved::Str(s) if strings_allowed => ExprNode::string(p, s),
                    Resolved::Str(_) => {
                        self.add_error(p.clone(), "Strings not allowed".to_string());
                        ExprNode::int(p, 0, size)
                    }
                    Resolved::No => ExprNode::symbol(p, sym, size),
                };
                self.next_token();
                node
            }
            TokenType::LParen => {
                self.next_token();
                let node = self.expr(size, strings_allowed);
                self.match_token(TokenType::RParen);
                node
            }
            TokenType::Asterisk => {
                self.next_token();
                if size < 2 {
                    self.add_error(
                        p.clone(),
                        format!(
                            "Current PC is 16 bits wide, expected is a {} bit wide value",
                            size * 8
                        ),
                    );
                    return ExprNode::int(p, 0, size);
                }
                ExprNode::int(p, self.pc(), 2)
            }
            _ => {
                self.add_error(
                    p.clone(),
                    format!(
                        "'~', '*', number or identifier expected, found {}",
                        self.lookahead.token_type
                    ),
                );
                ExprNode::int(p, 0, 1)
            }
        }
    }

    /// One `.byte` item: `<expr`, `>expr`, `scr(...)` or a basic item.
    fn db_op(&mut self) -> Vec<NodeRef> {
        let p = self.lookahead.pos.clone();
        match self.lookahead.token_type {
            TokenType::Lt => {
                self.next_token();
                let n = self.expr(2, false);
                vec![ExprNode::unary(p, UnaryOp::LoByte, n)]
            }
            TokenType::Gt => {
                self.next_token();
                let n = self.expr(2, false);
                vec![ExprNode::unary(p, UnaryOp::HiByte, n)]
            }
            TokenType::Ident if self.lookahead.str_val.eq_ignore_ascii_case("scr") => {
                // "scr" "(" basicDbOp { "," basicDbOp } ")"
                self.next_token();
                self.match_token(TokenType::LParen);
                let mut nodes = Vec::new();
                let n = self.basic_db_op();
                nodes.push(wrap_screen(n));
                while self.lookahead.token_type == TokenType::Comma {
                    self.next_token();
                    let n = self.basic_db_op();
                    nodes.push(wrap_screen(n));
                }
                self.match_token(TokenType::RParen);
                nodes
            }
            _ => vec![self.basic_db_op()],
        }
    }

    fn basic_db_op(&mut self) -> NodeRef {
        let n = self.expr(1, true);
        if n.borrow().node_type() == NodeType::String {
            let pos = n.borrow().pos.clone();
            return ExprNode::unary(pos, self.encoding.string_op(), n);
        }
        n
    }

    /// One `.word` item, widened to two bytes.
    fn word_op(&mut self) -> NodeRef {
        let n = self.expr(2, false);
        n.borrow_mut().force_size(2);
        n
    }

    fn float_db_op(&mut self) -> NodeRef {
        let n = self.expr(1, false);
        let t = n.borrow().node_type();
        match t {
            NodeType::Int => {
                // force conversion to the float layout
                let pos = n.borrow().pos.clone();
                ExprNode::binary(n, ExprNode::float(pos, 0.0), BinaryOp::Add)
            }
            NodeType::Float => n,
            NodeType::String => {
                let pos = n.borrow().pos.clone();
                self.add_error(pos.clone(), "Type must be float".to_string());
                ExprNode::float(pos, 0.0)
            }
        }
    }

    // ---- 6502 encoding ----

    fn handle_6502_mnemonic(&mut self, t: &Token) {
        let Some(op_codes) = mos6502::lookup(&t.str_val) else {
            self.add_error(t.pos.clone(), format!("{} is not a valid mnemonic", t.str_val));
            return;
        };

        let mut param = self.mos6502_param();
        let mut op_code = mos6502::opcode_for(op_codes, param.mode);

        use mos6502::AddressingMode as Am;
        if op_code.is_none() && param.mode == Am::ZeroPage {
            // try the regular absolute mode instead
            param.mode = Am::Absolute;
            op_code = mos6502::opcode_for(op_codes, param.mode);
            if op_code.is_some() {
                if let Some(val) = &param.val {
                    val.borrow_mut().force_size(2);
                }
            }
        }

        if op_code.is_none() && param.mode == Am::Absolute {
            // maybe it's a relative branch
            op_code = mos6502::opcode_for(op_codes, Am::Relative);
            if op_code.is_some() {
                param.mode = Am::Relative;
                if let Some(val) = &param.val {
                    val.borrow_mut().mark_relative();
                }
            }
        } else if op_code.is_none() && param.mode == Am::AbsoluteIndexedX {
            op_code = mos6502::opcode_for(op_codes, Am::ZeroPageIndexedX);
            if op_code.is_some() {
                param.mode = Am::ZeroPageIndexedX;
                if let Some(val) = &param.val {
                    if !val.borrow_mut().force_size(1) {
                        self.add_error(t.pos.clone(), "parameter too big for 1 byte".to_string());
                    }
                }
            }
        } else if op_code.is_none() && param.mode == Am::AbsoluteIndexedY {
            op_code = mos6502::opcode_for(op_codes, Am::ZeroPageIndexedY);
            if op_code.is_some() {
                param.mode = Am::ZeroPageIndexedY;
                if let Some(val) = &param.val {
                    if !val.borrow_mut().force_size(1) {
                        self.add_error(t.pos.clone(), "parameter too big for 1 byte".to_string());
                    }
                }
            }
        }

        let Some(op_code) = op_code else {
            self.add_error(t.pos.clone(), "Invalid parameter.".to_string());
            return;
        };

        self.emit_node(ExprNode::int(t.pos.clone(), op_code as i64, 1));
        if let Some(val) = param.val {
            self.emit_node(val);
        }
    }

    fn mos6502_param(&mut self) -> Mos6502Param {
        // param := "#" ["<"|">"] expr
        //        | expr [ "," ("X"|"Y") ]
        //        | "(" expr ")" [ "," ("X"|"Y") ]
        //        | "(" expr "," "X" ")"
        //        | "A"
        use mos6502::AddressingMode as Am;

        if self.lookahead.token_type == TokenType::Semicolon
            || self.lookahead.token_type == TokenType::Eol
        {
            return Mos6502Param {
                mode: Am::Implied,
                val: None,
            };
        }

        match self.lookahead.token_type {
            TokenType::Hash => {
                self.next_token();
                let p = self.lookahead.pos.clone();
                let node = match self.lookahead.token_type {
                    TokenType::Lt => {
                        self.next_token();
                        ExprNode::unary(p, UnaryOp::LoByte, self.expr(2, false))
                    }
                    TokenType::Gt => {
                        self.next_token();
                        ExprNode::unary(p, UnaryOp::HiByte, self.expr(2, false))
                    }
                    _ => self.expr(1, false),
                };
                Mos6502Param {
                    mode: Am::Immediate,
                    val: Some(node),
                }
            }
            TokenType::LParen => {
                // ($aaaa) | ($aa,X) | ($aa),Y
                self.next_token();
                let node = self.expr(2, false);
                if self.lookahead.token_type == TokenType::Comma {
                    // ($aa,X)
                    self.next_token();
                    if !node.borrow_mut().force_size(1) {
                        let val = node.borrow().eval();
                        self.add_error(
                            self.lookahead.pos.clone(),
                            format!("Address ${val:x} is too large, only 8 bits allowed"),
                        );
                    }
                    let reg = self.lookahead.str_val.clone();
                    let pos = self.lookahead.pos.clone();
                    self.match_token(TokenType::Ident);
                    if !reg.eq_ignore_ascii_case("x") {
                        self.add_error(pos, format!("Register X expected, found {reg}."));
                    }
                    self.match_token(TokenType::RParen);
                    Mos6502Param {
                        mode: Am::IndexedIndirect,
                        val: Some(node),
                    }
                } else {
                    self.match_token(TokenType::RParen);
                    if self.lookahead.token_type == TokenType::Comma {
                        // ($aa),Y
                        self.next_token();
                        if !node.borrow_mut().force_size(1) {
                            let val = node.borrow().eval();
                            self.add_error(
                                self.lookahead.pos.clone(),
                                format!("Address ${val:x} is too large, only 8 bits allowed"),
                            );
                        }
                        let reg = self.lookahead.str_val.clone();
                        let pos = self.lookahead.pos.clone();
                        self.match_token(TokenType::Ident);
                        if !reg.eq_ignore_ascii_case("y") {
                            self.add_error(pos, format!("Register Y expected, found {reg}."));
                        }
                        Mos6502Param {
                            mode: Am::IndirectIndexed,
                            val: Some(node),
                        }
                    } else {
                        node.borrow_mut().force_size(2);
                        Mos6502Param {
                            mode: Am::AbsoluteIndirect,
                            val: Some(node),
                        }
                    }
                }
            }
            TokenType::Ident if self.lookahead.str_val.eq_ignore_ascii_case("a") => {
                self.next_token();
                Mos6502Param {
                    mode: Am::Accumulator,
                    val: None,
                }
            }
            _ => {
                let node = self.expr(2, false);
                let mut am = Am::Absolute.with_size(node.borrow().result_size());
                if self.lookahead.token_type == TokenType::Comma {
                    self.next_token();
                    let s = self.lookahead.str_val.clone();
                    let pos = self.lookahead.pos.clone();
                    self.match_token(TokenType::Ident);
                    let mut index = s.chars().next().unwrap_or('x');
                    if !s.eq_ignore_ascii_case("x") && !s.eq_ignore_ascii_case("y") {
                        self.add_error(pos, format!("Expected 'X' or 'Y', but got {s}."));
                        index = 'x';
                    }
                    am = am.with_index(index);
                }
                Mos6502Param {
                    mode: am,
                    val: Some(node),
                }
            }
        }
    }

    // ---- Z80 encoding ----

    fn handle_z80_mnemonic(&mut self, t: &Token) {
        let Some(entries) = z80::instructions::lookup(&t.str_val) else {
            self.add_error(t.pos.clone(), format!("{} is not a valid mnemonic", t.str_val));
            return;
        };

        let mut params = Vec::new();
        if self.lookahead.token_type != TokenType::Semicolon
            && self.lookahead.token_type != TokenType::Eol
        {
            params.push(self.z80_param());
            if self.lookahead.token_type == TokenType::Comma {
                self.next_token();
                params.push(self.z80_param());
            }
        }

        let Some(gen) = z80::instructions::find_match(entries, &params) else {
            self.add_error(t.pos.clone(), format!("Bad parameters for {}", t.str_val));
            return;
        };
        let mut errs = Vec::new();
        let nodes = gen(&params, &mut errs);
        for e in errs {
            self.add_error(e.pos, e.msg);
        }
        for n in nodes {
            // code generators only emit bytes; enforce the size here
            n.borrow_mut().force_size(1);
            self.emit_node(n);
        }
    }

    fn z80_param(&mut self) -> z80::Param {
        // param := ["<"|">"] expr
        //        | register | cond
        //        | "(" register ["+"|"-" expr] ")"
        //        | "(" expr ")"
        //        | expr
        let p = self.lookahead.pos.clone();
        match self.lookahead.token_type {
            TokenType::Lt | TokenType::Gt => {
                let op = if self.lookahead.token_type == TokenType::Gt {
                    UnaryOp::HiByte
                } else {
                    UnaryOp::LoByte
                };
                self.next_token();
                let node = ExprNode::unary(p.clone(), op, self.expr(2, false));
                z80::Param::immediate(p, node)
            }
            TokenType::Ident => {
                if self.symbols.get(&self.lookahead.str_val).is_none() {
                    // registers and conditions only when it isn't a symbol
                    if let Some(reg) = z80::Register::from_name(&self.lookahead.str_val) {
                        self.next_token();
                        return z80::Param::register(p, reg);
                    }
                    if let Some(cond) = z80::Condition::from_name(&self.lookahead.str_val) {
                        self.next_token();
                        return z80::Param::condition(p, cond);
                    }
                }
                z80::Param::immediate(p, self.expr(2, false))
            }
            TokenType::LParen => {
                self.next_token();
                if self.lookahead.token_type == TokenType::Ident {
                    if let Some(reg) = z80::Register::from_name(&self.lookahead.str_val) {
                        self.next_token();
                        let mut param = z80::Param::register_indirect(p.clone(), reg);
                        if self.lookahead.token_type == TokenType::Plus
                            || self.lookahead.token_type == TokenType::Minus
                        {
                            let neg = self.lookahead.token_type == TokenType::Minus;
                            let neg_pos = self.lookahead.pos.clone();
                            self.next_token();
                            let mut node = self.expr(1, false);
                            if neg {
                                node = ExprNode::unary(neg_pos, UnaryOp::Negate, node);
                            }
                            node.borrow_mut().force_size(1);
                            node.borrow_mut().mark_signed();
                            param = z80::Param::indexed(p, reg, Some(node));
                        }
                        self.match_token(TokenType::RParen);
                        return param;
                    }
                }
                let node = self.expr(2, false);
                self.match_token(TokenType::RParen);
                z80::Param::ext_addressing(p, node)
            }
            _ => {
                let node = self.expr(2, false);
                z80::Param::immediate(p, node)
            }
        }
    }

    // ---- error sink ----

    pub(crate) fn add_error(&mut self, pos: Pos, msg: String) {
        let mut err = Error::new(pos, msg);
        if let Some(modifier) = &self.error_modifier {
            err = modifier.modify(err);
        }
        self.errors.push(err);
    }

    #[allow(dead_code)]
    pub(crate) fn add_warning(&mut self, pos: Pos, msg: String) {
        let mut err = Error::new(pos, msg);
        if let Some(modifier) = &self.error_modifier {
            err = modifier.modify(err);
        }
        self.warnings.push(err);
    }
}

impl ErrorSink for Assembler {
    fn add_error(&mut self, pos: Pos, msg: String) {
        Assembler::add_error(self, pos, msg);
    }
}

fn rel_op(t: TokenType) -> Option<BinaryOp> {
    match t {
        TokenType::Eq => Some(BinaryOp::Eq),
        TokenType::Ne => Some(BinaryOp::Ne),
        TokenType::Lt => Some(BinaryOp::Lt),
        TokenType::Le => Some(BinaryOp::Le),
        TokenType::Gt => Some(BinaryOp::Gt),
        TokenType::Ge => Some(BinaryOp::Ge),
        _ => None,
    }
}

fn value_fits(val: i64, size: usize) -> bool {
    (val as u64) >> (size * 8) == 0
}

/// Minimal byte size of a non-negative value; anything else needs a word.
fn natural_size(val: i64) -> usize {
    if (0..=0xff).contains(&val) {
        1
    } else {
        2
    }
}

fn wrap_screen(n: NodeRef) -> NodeRef {
    let pos = n.borrow().pos.clone();
    ExprNode::unary(pos, UnaryOp::ScreenCode, n)
}

/// Local labels mentioned in a macro argument's text.
fn extract_local_labels(actual: &str) -> Vec<String> {
    let text = Text::process("", actual);
    let mut scanner = Scanner::new(text.lines[0].clone());
    let mut labels = Vec::new();
    loop {
        let t = scanner.scan();
        if t.token_type == TokenType::Eol {
            break;
        }
        if t.token_type == TokenType::Ident && is_local_label(&t.str_val) {
            labels.push(t.str_val.to_ascii_lowercase());
        }
    }
    labels
}

/// Encode a float into the target's native 5-byte layout: biased base-2
/// exponent, then four mantissa bytes with the sign folded into the top
/// bit (cleared for positive values since the leading mantissa bit is
/// always set). Zero is all zeroes. The bool is false when the exponent
/// leaves the representable range.
fn encode_float(v: f64) -> ([u8; 5], bool) {
    let mut res = [0u8; 5];
    if v == 0.0 {
        return (res, true);
    }
    let sign = v < 0.0;
    let v = v.abs();

    let mut e = (v.log2() + 1.0).floor();
    let mut in_range = true;
    if !(-127.0..=127.0).contains(&e) {
        in_range = false;
        e = 0.0;
    }
    let mut m = v / 2f64.powf(e);

    for slot in res.iter_mut().skip(1) {
        let scaled = (m * 256.0) as i64;
        *slot = scaled as u8;
        m = m * 256.0 - scaled as f64;
    }
    res[0] = (e as i64 + 128) as u8;
    if !sign {
        res[1] &= 0x7f;
    }
    (res, in_range)
}
