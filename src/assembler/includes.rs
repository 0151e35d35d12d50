// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! File access for `.include` and `.incbin`.
//!
//! The assembler only needs two capabilities: locating a file through the
//! include path list and reading it whole. Tests substitute an in-memory
//! implementation.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

pub trait Includes {
    /// Locate `name` in the include paths; `None` if not found.
    fn find(&self, name: &str) -> Option<PathBuf>;

    /// Read the located file whole.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Directory-search implementation over an ordered path list.
pub struct DirSearch {
    paths: Vec<PathBuf>,
}

impl DirSearch {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Includes for DirSearch {
    fn find(&self, name: &str) -> Option<PathBuf> {
        self.paths.iter().map(|p| p.join(name)).find(|f| f.is_file())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// In-memory include set for tests.
#[derive(Default)]
pub struct MemoryIncludes {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryIncludes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, content: impl Into<Vec<u8>>) {
        self.files.insert(name.to_string(), content.into());
    }
}

impl Includes for MemoryIncludes {
    fn find(&self, name: &str) -> Option<PathBuf> {
        self.files.contains_key(name).then(|| PathBuf::from(name))
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(&path.to_string_lossy().to_string())
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such include"))
    }
}
