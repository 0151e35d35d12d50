// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for cbmforge.

use std::fs;
use std::io::Write;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cbmforge::assembler::cli::{resolve_output_path, validate_cli, Cli};
use cbmforge::assembler::{Assembler, OutputFormat};

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match validate_cli(&cli) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            process::exit(1);
        }
    };

    let source = match fs::read_to_string(&cli.infile) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("Can't read {}: {err}", cli.infile.display());
            process::exit(1);
        }
    };

    let mut assembler = Assembler::new(config);
    assembler.assemble_source(&cli.infile.to_string_lossy(), &source);

    for warning in assembler.warnings() {
        eprintln!("warning: {warning}");
    }
    if !assembler.errors().is_empty() {
        for error in assembler.errors() {
            eprintln!("error: {error}");
        }
        process::exit(1);
    }

    if cli.listing {
        print!("{}", assembler.listing());
    }
    if cli.dump_labels {
        print!("{}", assembler.vice_labels());
    }

    let out_path = resolve_output_path(&cli, assembler.output_format());
    let mut out = match fs::File::create(&out_path) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("Can't create {}: {err}", out_path.display());
            process::exit(1);
        }
    };
    let result = match assembler.output_format() {
        OutputFormat::Prg => {
            let origin = assembler.origin() as u16;
            out.write_all(&origin.to_le_bytes())
                .and_then(|_| out.write_all(assembler.bytes()))
        }
        OutputFormat::Plain => out.write_all(assembler.bytes()),
    };
    if let Err(err) = result {
        eprintln!("Can't write {}: {err}", out_path.display());
        process::exit(1);
    }
}
