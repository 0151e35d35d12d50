// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use super::{is_valid_platform_cpu_combo, Config, Cpu, Encoding, OutputFormat, Platform};

pub const VERSION: &str = "0.9";

const LONG_ABOUT: &str = "Cross-assembler for Commodore 8-bit machines.

Assembles a single source file for the MOS 6502 or the Zilog Z80 (C128
only) into a binary image. By default the image is written with a
two-byte load-address header (prg); use --plain to suppress it.";

#[derive(Parser, Debug)]
#[command(
    name = "cbmforge",
    version = VERSION,
    about = "Cross-assembler for Commodore 8-bit machines (6502/Z80)",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        short = 'I',
        long = "include",
        value_name = "DIR",
        action = ArgAction::Append,
        long_help = "Directory searched for .include/.incbin files (repeatable, in order)."
    )]
    pub include_paths: Vec<PathBuf>,
    #[arg(
        short = 'D',
        long = "define",
        value_name = "NAME",
        action = ArgAction::Append,
        long_help = "Predefine NAME as the integer constant 1 (repeatable)."
    )]
    pub defines: Vec<String>,
    #[arg(
        long = "cpu",
        value_name = "CPU",
        default_value = "6502",
        long_help = "Default CPU: 6502 or z80. Source may switch with .cpu."
    )]
    pub cpu: String,
    #[arg(
        long = "platform",
        value_name = "PLATFORM",
        default_value = "c128",
        long_help = "Target platform: c128, c64 or pet. z80 requires c128."
    )]
    pub platform: String,
    #[arg(
        long = "encoding",
        value_name = "ENC",
        default_value = "petscii",
        long_help = "Default string encoding for .byte data: ascii or petscii."
    )]
    pub encoding: String,
    #[arg(
        long = "plain",
        action = ArgAction::SetTrue,
        long_help = "Write the raw byte image without the two-byte load-address header."
    )]
    pub plain: bool,
    #[arg(
        short = 'l',
        long = "listing",
        action = ArgAction::SetTrue,
        long_help = "Print a listing of all byte-emitting lines to stdout."
    )]
    pub listing: bool,
    #[arg(
        long = "dump-labels",
        action = ArgAction::SetTrue,
        long_help = "Print the label table in VICE monitor format to stdout."
    )]
    pub dump_labels: bool,
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
    /// Assembly source file.
    pub infile: PathBuf,
    /// Output file; defaults to the input base with .prg or .bin appended.
    pub outfile: Option<PathBuf>,
}

pub fn validate_cli(cli: &Cli) -> Result<Config, String> {
    let cpu = Cpu::from_name(&cli.cpu).ok_or_else(|| format!("Unknown CPU \"{}\"", cli.cpu))?;
    let platform = Platform::from_name(&cli.platform)
        .ok_or_else(|| format!("Unknown platform \"{}\"", cli.platform))?;
    let encoding = Encoding::from_name(&cli.encoding)
        .ok_or_else(|| format!("Unknown encoding \"{}\"", cli.encoding))?;
    if !is_valid_platform_cpu_combo(platform, cpu) {
        return Err(format!(
            "CPU \"{}\" not supported for platform \"{}\"",
            cpu.name(),
            platform.name()
        ));
    }
    Ok(Config {
        include_paths: cli.include_paths.clone(),
        defines: cli.defines.clone(),
        cpu,
        platform,
        output: if cli.plain {
            OutputFormat::Plain
        } else {
            OutputFormat::Prg
        },
        encoding,
    })
}

/// Output path: as given, or the input base with an extension that
/// matches the output format.
pub fn resolve_output_path(cli: &Cli, output: OutputFormat) -> PathBuf {
    if let Some(out) = &cli.outfile {
        return out.clone();
    }
    let ext = match output {
        OutputFormat::Prg => "prg",
        OutputFormat::Plain => "bin",
    };
    cli.infile.with_extension(ext)
}
