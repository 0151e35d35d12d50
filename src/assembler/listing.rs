// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Listing and label-dump rendering.

use crate::core::text::Line;

/// Per-line listing record: start address, number of emitted bytes, raw line.
#[derive(Debug, Clone)]
pub struct ListingLine {
    pub addr: i64,
    pub bytes: usize,
    pub line: Line,
}

/// Render the listing: one line per source line that emitted bytes, as
/// `hhhh | b0 b1 b2 b3 b4 | source`. At most five bytes are shown; the
/// byte field is padded to five slots.
pub fn render_listing(lines: &[ListingLine], origin: i64, image: &[u8]) -> String {
    let mut out = String::new();
    for l in lines {
        if l.bytes == 0 {
            continue;
        }
        let start = (l.addr - origin) as usize;
        let end = (start + l.bytes).min(image.len());
        let shown = &image[start..end.min(start + 5)];
        let byte_strs: Vec<String> = shown.iter().map(|b| format!("{b:02x}")).collect();
        out.push_str(&format!(
            "{:04x} | {:<14} | {}\n",
            l.addr,
            byte_strs.join(" "),
            l.line.text()
        ));
    }
    out
}

/// Render labels in VICE monitor format: `al C:<hex4> .<name>`, sorted
/// lexicographically. Names without a leading dot get one.
pub fn render_vice_labels(labels: &[(String, i64)]) -> String {
    let mut sorted: Vec<&(String, i64)> = labels.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = String::new();
    for (name, val) in sorted {
        let name = if name.starts_with('.') {
            name.clone()
        } else {
            format!(".{name}")
        };
        out.push_str(&format!("al C:{:04x} {}\n", val, name));
    }
    out
}
