// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

use super::includes::MemoryIncludes;
use super::{Assembler, Config, OutputFormat};

fn test_config() -> Config {
    Config {
        output: OutputFormat::Plain,
        ..Config::default()
    }
}

fn assemble(src: &str) -> Assembler {
    let mut asm = Assembler::new(test_config());
    asm.assemble_source("test.asm", src);
    asm
}

fn assemble_bytes(src: &str) -> Vec<u8> {
    let asm = assemble(src);
    assert!(
        asm.errors().is_empty(),
        "unexpected errors for {src:?}: {:?}",
        asm.errors().iter().map(|e| e.to_string()).collect::<Vec<_>>()
    );
    asm.bytes().to_vec()
}

fn assemble_errors(src: &str) -> Vec<String> {
    let asm = assemble(src);
    asm.errors().iter().map(|e| e.msg.clone()).collect()
}

fn z80_bytes(line: &str) -> Vec<u8> {
    assemble_bytes(&format!("  .cpu \"z80\"\n  .org 0\n  {line}\n"))
}

fn m6502_bytes(line: &str) -> Vec<u8> {
    assemble_bytes(&format!("  .org 0\n  {line}\n"))
}

// ---- end-to-end scenarios ----

#[test]
fn forward_reference_is_patched() {
    let bytes = assemble_bytes("   .org 0\n   jmp label\nlabel nop\n");
    assert_eq!(bytes, vec![0x4c, 0x03, 0x00, 0xea]);
}

#[test]
fn relative_branch_backward() {
    let bytes = assemble_bytes("   .org 0\nl nop\n  bne l\n");
    assert_eq!(bytes, vec![0xea, 0xd0, 0xfd]);
}

#[test]
fn recursive_symbol_chain_resolves() {
    let bytes = assemble_bytes(
        "   .org 0\nt1 .equ t2\nt2 .equ t3\nt3 .equ t4\nt4 .equ $1234\n   jmp t1\n",
    );
    assert_eq!(bytes, vec![0x4c, 0x34, 0x12]);
}

#[test]
fn local_labels_are_scoped_between_globals() {
    let bytes = assemble_bytes("   .org 0\nA  jmp _x\n_x nop\nB  jmp _x\n_x brk\n");
    assert_eq!(bytes, vec![0x4c, 0x03, 0x00, 0xea, 0x4c, 0x07, 0x00, 0x00]);
}

#[test]
fn macro_with_local_label_and_parameter() {
    let bytes = assemble_bytes(
        " .org 0\nm .macro dest\n_l beq _l\n  jmp dest\n  .endm\nstart m start\n",
    );
    assert_eq!(bytes, vec![0xf0, 0xfe, 0x4c, 0x00, 0x00]);
}

#[test]
fn z80_indexed_load() {
    let bytes = assemble_bytes(".cpu \"z80\"\n .org 0\n ld a,(ix+5)\n");
    assert_eq!(bytes, vec![0xdd, 0x7e, 0x05]);
}

#[test]
fn screen_code_mapping() {
    let bytes = assemble_bytes("   .org 0\n  .byte scr(\"A\")\n");
    assert_eq!(bytes, vec![0x01]);
}

#[test]
fn float_encoding() {
    let bytes = assemble_bytes("   .org 0\n  .float 2\n");
    assert_eq!(bytes, vec![0x82, 0x00, 0x00, 0x00, 0x00]);
}

// ---- boundary behaviors ----

#[test]
fn branch_to_self_is_minus_two() {
    let bytes = assemble_bytes("   .org 0\nl beq l\n");
    assert_eq!(bytes, vec![0xf0, 0xfe]);
}

#[test]
fn byte_of_256_is_rejected() {
    let errors = assemble_errors("   .org 0\n  .byte 256\n");
    assert!(!errors.is_empty());
    assert!(errors[0].contains("wider than 8 bits"));
    assert_eq!(assemble_bytes("   .org 0\n  .byte 255\n"), vec![0xff]);
}

#[test]
fn org_at_current_pc_is_a_noop() {
    let bytes = assemble_bytes("   .org 0\n  nop\n  .org 1\n  nop\n");
    assert_eq!(bytes, vec![0xea, 0xea]);
}

#[test]
fn org_below_pc_is_an_error_and_pc_is_unchanged() {
    let asm = assemble("   .org 10\n  nop\n  .org 5\n  nop\n");
    assert_eq!(asm.errors().len(), 1);
    assert!(asm.errors()[0].msg.contains("lower than current pc"));
    assert_eq!(asm.bytes(), &[0xea, 0xea]);
}

#[test]
fn org_gap_is_zero_filled() {
    let bytes = assemble_bytes("   .org 0\n  nop\n  .org 4\n  nop\n");
    assert_eq!(bytes, vec![0xea, 0, 0, 0, 0xea]);
}

// ---- universal invariants ----

#[test]
fn reassembly_is_idempotent() {
    let src = "   .org 0\n  jmp fwd\n  .byte bad\nfwd nop\n";
    let mut asm = Assembler::new(test_config());
    asm.assemble_source("test.asm", src);
    let bytes1 = asm.bytes().to_vec();
    let errors1: Vec<String> = asm.errors().iter().map(|e| e.to_string()).collect();
    let labels1 = asm.labels();
    asm.assemble_source("test.asm", src);
    assert_eq!(asm.bytes(), bytes1.as_slice());
    let errors2: Vec<String> = asm.errors().iter().map(|e| e.to_string()).collect();
    assert_eq!(errors2, errors1);
    assert_eq!(asm.labels(), labels1);
}

#[test]
fn symbol_lookup_is_case_insensitive() {
    let bytes = assemble_bytes("   .org 0\nfoo .equ $12\n  lda FOO\n  lda foo\n");
    assert_eq!(bytes, vec![0xa5, 0x12, 0xa5, 0x12]);
}

#[test]
fn equ_reference_matches_inline_value() {
    let via_equ = assemble_bytes("   .org 0\nv .equ $1234\n  jmp v\n");
    let inline = assemble_bytes("   .org 0\n  jmp $1234\n");
    assert_eq!(via_equ, inline);
}

#[test]
fn disabled_block_contributes_nothing() {
    let bytes = assemble_bytes("   .org 0\n  .if 0\n  nop\nlbl .byte 1\n  .endif\n  rts\n");
    assert_eq!(bytes, vec![0x60]);
    // the label inside the dead block must not exist
    let errors = assemble_errors("   .org 0\n  .if 0\nlbl nop\n  .endif\n  jmp lbl\n");
    assert!(errors.iter().any(|e| e.contains("Undefined label \"lbl\"")));
}

#[test]
fn unresolved_reference_emits_zeros_until_defined() {
    let asm = assemble("   .org 0\n  jmp nowhere\n");
    assert_eq!(asm.bytes(), &[0x4c, 0x00, 0x00]);
    assert!(asm
        .errors()
        .iter()
        .any(|e| e.msg.contains("Undefined label \"nowhere\"")));
}

// ---- directives ----

#[test]
fn word_widens_one_byte_values() {
    let bytes = assemble_bytes("   .org 0\n  .word $1234, 5\n");
    assert_eq!(bytes, vec![0x34, 0x12, 0x05, 0x00]);
}

#[test]
fn byte_lists_strings_and_lo_hi() {
    let bytes = assemble_bytes("   .org 0\n  .byte 1, \"ab\", <$1234, >$1234\n");
    assert_eq!(bytes, vec![0x01, 0x41, 0x42, 0x34, 0x12]);
}

#[test]
fn ascii_encoding_leaves_strings_untouched() {
    let bytes = assemble_bytes("   .org 0\n  .encoding \"ascii\"\n  .byte \"ab\"\n");
    assert_eq!(bytes, vec![0x61, 0x62]);
}

#[test]
fn petscii_encoding_folds_lowercase_up() {
    let bytes = assemble_bytes("   .org 0\n  .byte \"ab\"\n");
    assert_eq!(bytes, vec![0x41, 0x42]);
}

#[test]
fn char_literal_is_encoded_once() {
    let bytes = assemble_bytes("   .org 0\n  lda #'a'\n");
    assert_eq!(bytes, vec![0xa9, 0x41]);
}

#[test]
fn scr_maps_each_inner_expression() {
    let bytes = assemble_bytes("   .org 0\n  .byte scr(\"AB\", $20)\n");
    assert_eq!(bytes, vec![0x01, 0x02, 0x20]);
}

#[test]
fn reserve_repeats_fill_byte() {
    let bytes = assemble_bytes("   .org 0\n  .reserve 3, $aa\n  rts\n");
    assert_eq!(bytes, vec![0xaa, 0xaa, 0xaa, 0x60]);
    let bytes = assemble_bytes("   .org 0\n  .reserve 2\n");
    assert_eq!(bytes, vec![0, 0]);
}

#[test]
fn reserve_rejects_string_fill() {
    let errors = assemble_errors("   .org 0\n  .reserve 2, \"ab\"\n");
    assert!(errors.iter().any(|e| e.contains("Strings not allowed")));
}

#[test]
fn reserve_count_must_be_resolved() {
    let errors = assemble_errors("   .org 0\n  .reserve n\nn .equ 2\n");
    assert!(errors.iter().any(|e| e.contains("Expression is unresolved")));
}

#[test]
fn align_pads_to_boundary() {
    let bytes = assemble_bytes("   .org 0\n  nop\n  .align 4\n  rts\n");
    assert_eq!(bytes, vec![0xea, 0, 0, 0, 0x60]);
    // already aligned: no padding
    let bytes = assemble_bytes("   .org 0\n  .align 4\n  rts\n");
    assert_eq!(bytes, vec![0x60]);
}

#[test]
fn float_list_and_negative_values() {
    let bytes = assemble_bytes("   .org 0\n  .float 1, -2\n");
    assert_eq!(
        bytes,
        vec![0x81, 0x00, 0x00, 0x00, 0x00, 0x82, 0x80, 0x00, 0x00, 0x00]
    );
}

#[test]
fn fail_reports_its_message() {
    let errors = assemble_errors("   .org 0\n  .fail \"blow up here\"\n");
    assert_eq!(errors, vec!["blow up here".to_string()]);
}

#[test]
fn fail_in_disabled_block_is_silent() {
    let bytes = assemble_bytes("   .org 0\n  .if 0\n  .fail \"nope\"\n  .endif\n  rts\n");
    assert_eq!(bytes, vec![0x60]);
}

#[test]
fn output_format_is_recorded() {
    let asm = assemble("   .org $0801\n  .output \"prg\"\n  rts\n");
    assert_eq!(asm.output_format(), OutputFormat::Prg);
    assert_eq!(asm.origin(), 0x0801);
}

#[test]
fn cpu_and_platform_pseudo_constants() {
    // CPU starts as "6502" and follows .cpu; comparing strings works in .if
    let bytes = assemble_bytes(
        "   .org 0\n  .if CPU = \"6502\"\n  nop\n  .endif\n  .if CPU = \"z80\"\n  brk\n  .endif\n",
    );
    assert_eq!(bytes, vec![0xea]);
    let bytes = assemble_bytes("   .org 0\n  .if PLATFORM = \"c128\"\n  rts\n  .endif\n");
    assert_eq!(bytes, vec![0x60]);
}

#[test]
fn platform_change_after_emission_is_rejected() {
    let errors = assemble_errors("   .org 0\n  nop\n  .platform \"c64\"\n");
    assert!(errors.iter().any(|e| e.contains("Can't change platform anymore")));
}

#[test]
fn z80_needs_c128() {
    let errors = assemble_errors("  .platform \"c64\"\n  .cpu \"z80\"\n");
    assert!(errors
        .iter()
        .any(|e| e.contains("CPU \"z80\" not supported for platform \"c64\"")));
}

#[test]
fn unknown_names_are_reported() {
    assert!(assemble_errors("  .cpu \"8086\"\n")
        .iter()
        .any(|e| e.contains("Unknown CPU")));
    assert!(assemble_errors("  .platform \"amiga\"\n")
        .iter()
        .any(|e| e.contains("Unknown platform")));
    assert!(assemble_errors("  .encoding \"ebcdic\"\n")
        .iter()
        .any(|e| e.contains("Unknown encoding")));
    assert!(assemble_errors("  .output \"elf\"\n")
        .iter()
        .any(|e| e.contains("Unknown output format")));
}

// ---- conditional assembly ----

#[test]
fn ifdef_respects_configured_defines() {
    let mut config = test_config();
    config.defines = vec!["DEBUG".to_string()];
    let mut asm = Assembler::new(config);
    asm.assemble_source(
        "test.asm",
        "   .org 0\n  .ifdef DEBUG\n  nop\n  .else\n  brk\n  .endif\n",
    );
    assert!(asm.errors().is_empty());
    assert_eq!(asm.bytes(), &[0xea]);

    let bytes = assemble_bytes("   .org 0\n  .ifdef DEBUG\n  nop\n  .else\n  brk\n  .endif\n");
    assert_eq!(bytes, vec![0x00]);
}

#[test]
fn ifndef_inverts_the_test() {
    let bytes = assemble_bytes("   .org 0\n  .ifndef DEBUG\n  nop\n  .endif\n");
    assert_eq!(bytes, vec![0xea]);
}

#[test]
fn nested_conditionals_stay_disabled() {
    let bytes = assemble_bytes(
        "   .org 0\n  .if 0\n  .if 1\n  nop\n  .endif\n  .else\n  rts\n  .endif\n",
    );
    assert_eq!(bytes, vec![0x60]);
}

#[test]
fn if_supports_relational_operators() {
    let bytes = assemble_bytes("   .org 0\nn .equ 5\n  .if n > 3\n  nop\n  .endif\n");
    assert_eq!(bytes, vec![0xea]);
    let bytes = assemble_bytes("   .org 0\nn .equ 5\n  .if n <= 3\n  nop\n  .endif\n");
    assert_eq!(bytes, vec![]);
}

#[test]
fn stray_else_and_endif_are_errors() {
    assert!(assemble_errors("  .else\n")
        .iter()
        .any(|e| e.contains(".else without .if")));
    assert!(assemble_errors("  .endif\n")
        .iter()
        .any(|e| e.contains(".endif without .if")));
}

#[test]
fn unclosed_conditional_is_reported_at_end() {
    assert!(assemble_errors("   .org 0\n  .if 1\n  nop\n")
        .iter()
        .any(|e| e.contains(".endif expected")));
}

#[test]
fn unresolved_if_expression_is_an_error() {
    let errors = assemble_errors("   .org 0\n  .if later\n  nop\n  .endif\nlater .equ 1\n");
    assert!(errors.iter().any(|e| e.contains("expression is not resolved")));
}

// ---- macros ----

#[test]
fn macro_arguments_are_textual() {
    let bytes = assemble_bytes(
        " .org 0\nloadi .macro val\n  lda val\n  .endm\n  loadi #<$1234\n  loadi #>$1234\n",
    );
    assert_eq!(bytes, vec![0xa9, 0x34, 0xa9, 0x12]);
}

#[test]
fn macro_argument_count_is_checked() {
    let errors = assemble_errors(" .org 0\nm .macro a,b\n  nop\n  .endm\n  m 1\n");
    assert!(errors
        .iter()
        .any(|e| e.contains("Wrong number of arguments: 2 expected, 1 found")));
}

#[test]
fn macro_errors_name_the_call_site() {
    let errors = assemble_errors(" .org 0\nm .macro\n  .byte 256\n  .endm\n  m\n");
    assert!(errors
        .iter()
        .any(|e| e.contains("(called from test.asm, line 5)")));
}

#[test]
fn nested_macro_definitions_are_rejected() {
    let errors = assemble_errors("m .macro\nn .macro\n  .endm\n  .endm\n");
    assert!(errors.iter().any(|e| e.contains("Nested macros are not allowed")));
}

#[test]
fn endm_without_macro_is_an_error() {
    assert!(assemble_errors("  .endm\n")
        .iter()
        .any(|e| e.contains(".endm without .macro")));
}

#[test]
fn unclosed_macro_is_reported_at_end() {
    assert!(assemble_errors("m .macro\n  nop\n")
        .iter()
        .any(|e| e.contains(".endm expected")));
}

#[test]
fn macro_name_must_not_collide() {
    assert!(assemble_errors("lda .macro\n  .endm\n")
        .iter()
        .any(|e| e.contains("Can't use mnemonic \"lda\" as macro name")));
    assert!(assemble_errors("m .equ 1\nm .macro\n  .endm\n")
        .iter()
        .any(|e| e.contains("\"m\" is already defined")));
}

#[test]
fn duplicate_macro_parameters_are_rejected() {
    assert!(assemble_errors("m .macro a,a\n  .endm\n")
        .iter()
        .any(|e| e.contains("Parameter a is already used")));
}

#[test]
fn macro_requires_a_name_label() {
    assert!(assemble_errors("  .macro\n  .endm\n")
        .iter()
        .any(|e| e.contains("Label is necessary")));
}

#[test]
fn macro_expansion_is_inlined_per_call() {
    let bytes = assemble_bytes(
        " .org 0\ntwice .macro op\n  op\n  op\n  .endm\n  twice nop\n  twice rts\n",
    );
    assert_eq!(bytes, vec![0xea, 0xea, 0x60, 0x60]);
}

#[test]
fn macro_locals_do_not_leak_into_caller_scope() {
    // _l is defined inside the expansion; the caller's _l is restored after
    let bytes = assemble_bytes(
        " .org 0\nm .macro\n_l nop\n  jmp _l\n  .endm\n_l brk\n  m\n  jmp _l\n",
    );
    // _l brk at 0; macro at 1: _l nop, jmp _l(=1); then jmp _l resolves to 0
    assert_eq!(
        bytes,
        vec![0x00, 0xea, 0x4c, 0x01, 0x00, 0x4c, 0x00, 0x00]
    );
}

// ---- includes ----

fn assemble_with_includes(src: &str, includes: MemoryIncludes) -> Assembler {
    let mut asm = Assembler::with_includes(test_config(), Box::new(includes));
    asm.assemble_source("main.asm", src);
    asm
}

#[test]
fn include_inlines_the_file() {
    let mut inc = MemoryIncludes::new();
    inc.insert("lib.asm", "  nop\n");
    let asm = assemble_with_includes("   .org 0\n  .include \"lib.asm\"\n  rts\n", inc);
    assert!(asm.errors().is_empty());
    assert_eq!(asm.bytes(), &[0xea, 0x60]);
}

#[test]
fn include_label_is_emitted_before_content() {
    let mut inc = MemoryIncludes::new();
    inc.insert("lib.asm", "  nop\n");
    let asm = assemble_with_includes(
        "   .org 0\nlib .include \"lib.asm\"\n  jmp lib\n",
        inc,
    );
    assert!(asm.errors().is_empty());
    assert_eq!(asm.bytes(), &[0xea, 0x4c, 0x00, 0x00]);
}

#[test]
fn nested_includes_are_resolved() {
    let mut inc = MemoryIncludes::new();
    inc.insert("a.asm", "  .include \"b.asm\"\n  nop\n");
    inc.insert("b.asm", "  rts\n");
    let asm = assemble_with_includes("   .org 0\n  .include \"a.asm\"\n", inc);
    assert!(asm.errors().is_empty());
    assert_eq!(asm.bytes(), &[0x60, 0xea]);
}

#[test]
fn missing_include_is_reported() {
    let asm = assemble_with_includes("   .org 0\n  .include \"gone.asm\"\n", MemoryIncludes::new());
    assert!(asm
        .errors()
        .iter()
        .any(|e| e.msg.contains("Can't find file \"gone.asm\"")));
}

#[test]
fn incbin_emits_raw_bytes() {
    let mut inc = MemoryIncludes::new();
    inc.insert("blob.bin", vec![0xde, 0xad, 0xbe, 0xef]);
    let asm = assemble_with_includes("   .org 0\n  .incbin \"blob.bin\"\n", inc);
    assert!(asm.errors().is_empty());
    assert_eq!(asm.bytes(), &[0xde, 0xad, 0xbe, 0xef]);
}

// ---- 6502 encoding ----

#[test]
fn mos6502_addressing_modes() {
    assert_eq!(m6502_bytes("lda #$56"), vec![0xa9, 0x56]);
    assert_eq!(m6502_bytes("lda $56"), vec![0xa5, 0x56]);
    assert_eq!(m6502_bytes("lda $0078,X"), vec![0xb5, 0x78]);
    assert_eq!(m6502_bytes("lda $1234"), vec![0xad, 0x34, 0x12]);
    assert_eq!(m6502_bytes("lda $1234,x"), vec![0xbd, 0x34, 0x12]);
    assert_eq!(m6502_bytes("lda $1234,y"), vec![0xb9, 0x34, 0x12]);
    assert_eq!(m6502_bytes("lda ($9a,x)"), vec![0xa1, 0x9a]);
    assert_eq!(m6502_bytes("lda ($bc),y"), vec![0xb1, 0xbc]);
    assert_eq!(m6502_bytes("ldx $12,y"), vec![0xb6, 0x12]);
    assert_eq!(m6502_bytes("jmp ($1234)"), vec![0x6c, 0x34, 0x12]);
    assert_eq!(m6502_bytes("asl a"), vec![0x0a]);
    assert_eq!(m6502_bytes("asl $12"), vec![0x06, 0x12]);
    assert_eq!(m6502_bytes("rts"), vec![0x60]);
}

#[test]
fn mos6502_immediate_lo_hi() {
    assert_eq!(m6502_bytes("lda #<$1234"), vec![0xa9, 0x34]);
    assert_eq!(m6502_bytes("lda #>$1234"), vec![0xa9, 0x12]);
}

#[test]
fn mos6502_zero_page_promotion_widens_when_needed() {
    // jsr has no zero-page form: a one-byte operand widens to absolute
    assert_eq!(m6502_bytes("jsr $56"), vec![0x20, 0x56, 0x00]);
}

#[test]
fn mos6502_absolute_indexed_falls_back_to_zero_page() {
    // sty has no absolute,X form; a small operand falls back to $aa,X
    assert_eq!(m6502_bytes("sty $12,x"), vec![0x94, 0x12]);
    let errors = assemble_errors("   .org 0\n  sty $1234,x\n");
    assert!(errors.iter().any(|e| e.contains("parameter too big for 1 byte")));
}

#[test]
fn mos6502_invalid_mnemonic_and_parameter() {
    assert!(assemble_errors("   .org 0\n  mov a,b\n")
        .iter()
        .any(|e| e.contains("mov is not a valid mnemonic")));
    assert!(assemble_errors("   .org 0\n  jmp #5\n")
        .iter()
        .any(|e| e.contains("Invalid parameter.")));
}

#[test]
fn branch_out_of_range_backward() {
    let errors = assemble_errors("   .org 0\nl .reserve 128\n  beq l\n");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0], "Branch target too far away.");
}

#[test]
fn branch_out_of_range_forward() {
    let errors = assemble_errors("   .org 0\n  beq l\n  .reserve 128\nl:\n");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0], "Branch target too far away.");
}

#[test]
fn emitting_without_org_is_reported() {
    let asm = assemble("  nop\n");
    assert!(asm.errors().iter().any(|e| e.msg.contains("No .org specified")));
    assert_eq!(asm.bytes(), &[0xea]);
}

// ---- Z80 encoding ----

#[test]
fn z80_loads() {
    assert_eq!(z80_bytes("ld a,b"), vec![0x78]);
    assert_eq!(z80_bytes("ld b,$56"), vec![0x06, 0x56]);
    assert_eq!(z80_bytes("ld a,(hl)"), vec![0x7e]);
    assert_eq!(z80_bytes("ld (hl),e"), vec![0x73]);
    assert_eq!(z80_bytes("ld (hl),$34"), vec![0x36, 0x34]);
    assert_eq!(z80_bytes("ld a,(bc)"), vec![0x0a]);
    assert_eq!(z80_bytes("ld a,(de)"), vec![0x1a]);
    assert_eq!(z80_bytes("ld (bc),a"), vec![0x02]);
    assert_eq!(z80_bytes("ld a,($5678)"), vec![0x3a, 0x78, 0x56]);
    assert_eq!(z80_bytes("ld ($5678),a"), vec![0x32, 0x78, 0x56]);
    assert_eq!(z80_bytes("ld a,i"), vec![0xed, 0x57]);
    assert_eq!(z80_bytes("ld r,a"), vec![0xed, 0x4f]);
    assert_eq!(z80_bytes("ld hl,$1234"), vec![0x21, 0x34, 0x12]);
    assert_eq!(z80_bytes("ld sp,$c000"), vec![0x31, 0x00, 0xc0]);
    assert_eq!(z80_bytes("ld ix,$1234"), vec![0xdd, 0x21, 0x34, 0x12]);
    assert_eq!(z80_bytes("ld hl,($5678)"), vec![0x2a, 0x78, 0x56]);
    assert_eq!(z80_bytes("ld bc,($5678)"), vec![0xed, 0x4b, 0x78, 0x56]);
    assert_eq!(z80_bytes("ld ($5678),hl"), vec![0x22, 0x78, 0x56]);
    assert_eq!(z80_bytes("ld ($5678),de"), vec![0xed, 0x53, 0x78, 0x56]);
    assert_eq!(z80_bytes("ld ($5678),iy"), vec![0xfd, 0x22, 0x78, 0x56]);
    assert_eq!(z80_bytes("ld sp,hl"), vec![0xf9]);
    assert_eq!(z80_bytes("ld sp,ix"), vec![0xdd, 0xf9]);
    assert_eq!(z80_bytes("ld (ix+$12),c"), vec![0xdd, 0x71, 0x12]);
    assert_eq!(z80_bytes("ld (iy-$12),$34"), vec![0xfd, 0x36, 0xee, 0x34]);
}

#[test]
fn z80_stack_and_exchange() {
    assert_eq!(z80_bytes("push bc"), vec![0xc5]);
    assert_eq!(z80_bytes("push af"), vec![0xf5]);
    assert_eq!(z80_bytes("push ix"), vec![0xdd, 0xe5]);
    assert_eq!(z80_bytes("pop hl"), vec![0xe1]);
    assert_eq!(z80_bytes("ex de,hl"), vec![0xeb]);
    assert_eq!(z80_bytes("ex af,af'"), vec![0x08]);
    assert_eq!(z80_bytes("ex (sp),hl"), vec![0xe3]);
    assert_eq!(z80_bytes("ex (sp),iy"), vec![0xfd, 0xe3]);
    assert_eq!(z80_bytes("exx"), vec![0xd9]);
}

#[test]
fn z80_block_operations() {
    assert_eq!(z80_bytes("ldir"), vec![0xed, 0xb0]);
    assert_eq!(z80_bytes("lddr"), vec![0xed, 0xb8]);
    assert_eq!(z80_bytes("cpir"), vec![0xed, 0xb1]);
    assert_eq!(z80_bytes("otir"), vec![0xed, 0xb3]);
}

#[test]
fn z80_alu() {
    assert_eq!(z80_bytes("adc a,$56"), vec![0xce, 0x56]);
    assert_eq!(z80_bytes("adc a,c"), vec![0x89]);
    assert_eq!(z80_bytes("adc a,(hl)"), vec![0x8e]);
    assert_eq!(z80_bytes("adc a,(ix+$12)"), vec![0xdd, 0x8e, 0x12]);
    assert_eq!(z80_bytes("adc a,(iy-$12)"), vec![0xfd, 0x8e, 0xee]);
    assert_eq!(z80_bytes("adc hl,sp"), vec![0xed, 0x7a]);
    assert_eq!(z80_bytes("add a,$56"), vec![0xc6, 0x56]);
    assert_eq!(z80_bytes("add a,c"), vec![0x81]);
    assert_eq!(z80_bytes("add hl,sp"), vec![0x39]);
    assert_eq!(z80_bytes("add ix,de"), vec![0xdd, 0x19]);
    assert_eq!(z80_bytes("add iy,de"), vec![0xfd, 0x19]);
    assert_eq!(z80_bytes("and $56"), vec![0xe6, 0x56]);
    assert_eq!(z80_bytes("and c"), vec![0xa1]);
    assert_eq!(z80_bytes("and (hl)"), vec![0xa6]);
    assert_eq!(z80_bytes("sub e"), vec![0x93]);
    assert_eq!(z80_bytes("sbc hl,de"), vec![0xed, 0x52]);
    assert_eq!(z80_bytes("xor a"), vec![0xaf]);
    assert_eq!(z80_bytes("or (iy-$12)"), vec![0xfd, 0xb6, 0xee]);
    assert_eq!(z80_bytes("cp $20"), vec![0xfe, 0x20]);
}

#[test]
fn z80_inc_dec() {
    assert_eq!(z80_bytes("inc a"), vec![0x3c]);
    assert_eq!(z80_bytes("inc hl"), vec![0x23]);
    assert_eq!(z80_bytes("inc ix"), vec![0xdd, 0x23]);
    assert_eq!(z80_bytes("inc (hl)"), vec![0x34]);
    assert_eq!(z80_bytes("inc (ix+3)"), vec![0xdd, 0x34, 0x03]);
    assert_eq!(z80_bytes("dec a"), vec![0x3d]);
    assert_eq!(z80_bytes("dec sp"), vec![0x3b]);
    assert_eq!(z80_bytes("dec (iy-1)"), vec![0xfd, 0x35, 0xff]);
}

#[test]
fn z80_rotates_and_bits() {
    assert_eq!(z80_bytes("rlca"), vec![0x07]);
    assert_eq!(z80_bytes("rra"), vec![0x1f]);
    assert_eq!(z80_bytes("rlc b"), vec![0xcb, 0x00]);
    assert_eq!(z80_bytes("srl (hl)"), vec![0xcb, 0x3e]);
    assert_eq!(z80_bytes("sla (ix+2)"), vec![0xdd, 0xcb, 0x02, 0x26]);
    assert_eq!(z80_bytes("bit 0,(hl)"), vec![0xcb, 0x46]);
    assert_eq!(z80_bytes("bit 1,(ix+$12)"), vec![0xdd, 0xcb, 0x12, 0x4e]);
    assert_eq!(z80_bytes("bit 2,(iy-$12)"), vec![0xfd, 0xcb, 0xee, 0x56]);
    assert_eq!(z80_bytes("bit 3,c"), vec![0xcb, 0x59]);
    assert_eq!(z80_bytes("res 1,c"), vec![0xcb, 0x89]);
    assert_eq!(z80_bytes("res 2,(hl)"), vec![0xcb, 0x96]);
    assert_eq!(z80_bytes("res 3,(ix+63)"), vec![0xdd, 0xcb, 0x3f, 0x9e]);
    assert_eq!(z80_bytes("res 4,(iy-27)"), vec![0xfd, 0xcb, 0xe5, 0xa6]);
    assert_eq!(z80_bytes("set 7,a"), vec![0xcb, 0xff]);
    assert_eq!(z80_bytes("rld"), vec![0xed, 0x6f]);
}

#[test]
fn z80_jumps_calls_returns() {
    assert_eq!(z80_bytes("jp $5678"), vec![0xc3, 0x78, 0x56]);
    assert_eq!(z80_bytes("jp nz,$5678"), vec![0xc2, 0x78, 0x56]);
    assert_eq!(z80_bytes("jp c,$5678"), vec![0xda, 0x78, 0x56]);
    assert_eq!(z80_bytes("jp m,$5678"), vec![0xfa, 0x78, 0x56]);
    assert_eq!(z80_bytes("jp (hl)"), vec![0xe9]);
    assert_eq!(z80_bytes("jp (ix)"), vec![0xdd, 0xe9]);
    assert_eq!(z80_bytes("call $5678"), vec![0xcd, 0x78, 0x56]);
    assert_eq!(z80_bytes("call po,$5678"), vec![0xe4, 0x78, 0x56]);
    assert_eq!(z80_bytes("ret"), vec![0xc9]);
    assert_eq!(z80_bytes("ret z"), vec![0xc8]);
    assert_eq!(z80_bytes("ret c"), vec![0xd8]);
    assert_eq!(z80_bytes("reti"), vec![0xed, 0x4d]);
    assert_eq!(z80_bytes("rst $28"), vec![0xef]);
    assert_eq!(z80_bytes("im 1"), vec![0xed, 0x56]);
}

#[test]
fn z80_relative_branches() {
    let bytes = assemble_bytes("  .cpu \"z80\"\n  .org 0\nfoo: nop\n  nop\n  djnz foo\n");
    assert_eq!(bytes, vec![0x00, 0x00, 0x10, 0xfc]);
    let bytes = assemble_bytes("  .cpu \"z80\"\n  .org 0\n  djnz foo\n  nop\n  nop\nfoo: nop\n");
    assert_eq!(bytes, vec![0x10, 0x02, 0x00, 0x00, 0x00]);
    let bytes = assemble_bytes("  .cpu \"z80\"\n  .org 0\nl: nop\n  jr nc,l\n  jr z,l\n");
    assert_eq!(bytes, vec![0x00, 0x30, 0xfd, 0x28, 0xfb]);
    let bytes = assemble_bytes("  .cpu \"z80\"\n  .org 0\nl: nop\n  jr c,l\n");
    assert_eq!(bytes, vec![0x00, 0x38, 0xfd]);
}

#[test]
fn z80_io() {
    assert_eq!(z80_bytes("in a,($fe)"), vec![0xdb, 0xfe]);
    assert_eq!(z80_bytes("in a,(c)"), vec![0xed, 0x78]);
    assert_eq!(z80_bytes("in d,(c)"), vec![0xed, 0x50]);
    assert_eq!(z80_bytes("out ($fe),a"), vec![0xd3, 0xfe]);
    assert_eq!(z80_bytes("out (c),b"), vec![0xed, 0x41]);
}

#[test]
fn z80_indexed_displacement_is_range_checked() {
    let errors = assemble_errors("  .cpu \"z80\"\n  .org 0\n  ld a,(ix+200)\n");
    assert!(!errors.is_empty());
}

#[test]
fn z80_bad_parameters_are_reported() {
    assert!(assemble_errors("  .cpu \"z80\"\n  .org 0\n  ld (bc),c\n")
        .iter()
        .any(|e| e.contains("Bad parameters for ld")));
    assert!(assemble_errors("  .cpu \"z80\"\n  .org 0\n  frob a\n")
        .iter()
        .any(|e| e.contains("frob is not a valid mnemonic")));
}

// ---- listing and labels ----

#[test]
fn listing_shows_emitting_lines() {
    let asm = assemble("  .org $1000\n  lda #5\nloop jmp loop\n");
    assert!(asm.errors().is_empty());
    let listing = asm.listing();
    assert_eq!(
        listing,
        "1000 | a9 05          |   lda #5\n1002 | 4c 02 10       | loop jmp loop\n"
    );
}

#[test]
fn listing_skips_macro_invocation_lines() {
    let asm = assemble(" .org 0\nm .macro\n  nop\n  .endm\n  m\n");
    assert!(asm.errors().is_empty());
    let listing = asm.listing();
    assert_eq!(listing, "0000 | ea             |   nop\n");
}

#[test]
fn vice_label_dump_is_sorted_and_prefixed() {
    let asm = assemble("  .org $1000\nstart nop\nloop jmp loop\n");
    assert!(asm.errors().is_empty());
    assert_eq!(
        asm.vice_labels(),
        "al C:1001 .loop\nal C:1000 .start\n"
    );
}

#[test]
fn labels_report_their_addresses() {
    let asm = assemble("  .org $0801\none nop\ntwo nop\n");
    assert_eq!(
        asm.labels(),
        vec![("one".to_string(), 0x0801), ("two".to_string(), 0x0802)]
    );
}

// ---- expressions ----

#[test]
fn expression_operators() {
    assert_eq!(m6502_bytes("lda #2+3*4"), vec![0xa9, 0x0e]);
    assert_eq!(m6502_bytes("lda #$10|$03"), vec![0xa9, 0x13]);
    assert_eq!(m6502_bytes("lda #$ff&$0f"), vec![0xa9, 0x0f]);
    assert_eq!(m6502_bytes("lda #$0f^$ff"), vec![0xa9, 0xf0]);
    assert_eq!(m6502_bytes("lda #10%3"), vec![0xa9, 0x01]);
    assert_eq!(m6502_bytes("lda #10/2"), vec![0xa9, 0x05]);
    assert_eq!(m6502_bytes("lda #(2+3)*4"), vec![0xa9, 0x14]);
    assert_eq!(m6502_bytes("lda #~$fe&$ff"), vec![0xa9, 0x01]);
}

#[test]
fn radix_literals_in_operands() {
    assert_eq!(m6502_bytes("lda #%1010"), vec![0xa9, 0x0a]);
    assert_eq!(m6502_bytes("lda #&17"), vec![0xa9, 0x0f]);
}

#[test]
fn pc_symbol_in_expressions() {
    let bytes = assemble_bytes("   .org $1000\n  jmp *\n");
    assert_eq!(bytes, vec![0x4c, 0x00, 0x10]);
    let bytes = assemble_bytes("   .org $1000\n  .word *+2\n");
    assert_eq!(bytes, vec![0x02, 0x10]);
}

#[test]
fn division_by_zero_is_reported() {
    assert!(assemble_errors("   .org 0\n  .byte 1/0\n")
        .iter()
        .any(|e| e.contains("Division by zero")));
}

#[test]
fn strings_rejected_outside_string_contexts() {
    assert!(assemble_errors("   .org 0\n  .word \"ab\"\n")
        .iter()
        .any(|e| e.contains("Strings are not allowed")));
}

#[test]
fn missing_eol_is_reported() {
    assert!(assemble_errors("   .org 0\n  lda #5 q\n")
        .iter()
        .any(|e| e.contains("';' or EOL expected")));
}

#[test]
fn duplicate_symbol_is_reported() {
    assert!(assemble_errors("   .org 0\nfoo nop\nfoo nop\n")
        .iter()
        .any(|e| e.contains("already defined")));
}

#[test]
fn equ_chain_left_unresolved_is_reported() {
    let errors = assemble_errors("   .org 0\na .equ b\n  nop\n");
    assert!(errors
        .iter()
        .any(|e| e.contains("Undefined symbols in definition of a: b")));
}
