//! Listing renderer: fixed-column hex dump of a code block with annotations.
//!
//! The renderer is a pure function over the final item sequence. Each row
//! starts with the position as six lowercase hex digits (most-significant
//! digit first), one space, then the bytes in 3-character `"xx "` slots. A
//! row wraps before it would cross column `TEXT_COL - BYTE_WIDTH`.
//! Annotations render on the line they were emitted into, padded out to
//! `TEXT_COL`.

use alloc::string::String;
use core::fmt::Write;

use crate::block::{CodeBlock, Item};

/// Column where annotation text begins.
const TEXT_COL: usize = 32;
/// Width of one rendered byte slot (`"xx "`).
const BYTE_WIDTH: usize = 3;

/// Render the listing for positions in `[from, to)`. Bytes outside the
/// slice are skipped but still advance the position.
///
/// A pure function over the block's final item sequence; unresolved
/// deferred items contribute nothing, so call it after assembly.
pub fn render(block: &CodeBlock, from: u64, to: Option<u64>) -> String {
    let to = to.unwrap_or(u64::MAX);
    let mut out = String::new();
    let mut line = String::new();
    let mut pos = block.start_pos();

    for item in block.items() {
        match item {
            Item::Byte(byte) => {
                if pos >= from && pos < to {
                    if line.is_empty() {
                        let _ = write!(line, "{:06x} ", pos);
                    } else if line.len() + BYTE_WIDTH > TEXT_COL {
                        out.push_str(&line);
                        out.push('\n');
                        line.clear();
                        let _ = write!(line, "{:06x} ", pos);
                    }
                    let _ = write!(line, "{:02x} ", byte);
                }
                pos += 1;
            }
            Item::Listing(text) => {
                if pos >= from && pos < to {
                    if line.is_empty() {
                        let _ = write!(line, "{:06x} ", pos);
                    }
                    while line.len() < TEXT_COL {
                        line.push(' ');
                    }
                    out.push_str(&line);
                    out.push_str(text);
                    out.push('\n');
                    line.clear();
                }
            }
            Item::Label(_) | Item::Deferred(_) => {}
        }
    }

    if !line.is_empty() {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing_block() -> CodeBlock {
        let mut block = CodeBlock::new();
        block.set_listing(true);
        block
    }

    #[test]
    fn rows_wrap_after_eight_bytes() {
        let mut block = listing_block();
        for i in 0..10 {
            block.gen8(i);
        }
        block.assemble().unwrap();
        assert_eq!(
            block.listing_string(0, None),
            "000000 00 01 02 03 04 05 06 07 \n000008 08 09 \n"
        );
    }

    #[test]
    fn annotation_is_padded_to_text_column() {
        let mut block = listing_block();
        block.gen8(0x90).gen_listing("nop");
        block.gen8(0xc3).gen_listing("ret");
        block.assemble().unwrap();
        assert_eq!(
            block.listing_string(0, None),
            "000000 90                       nop\n000001 c3                       ret\n"
        );
    }

    #[test]
    fn positions_honor_start_pos() {
        let mut block = listing_block();
        block.set_start_pos(0xbeef);
        block.gen8(0x01);
        block.assemble().unwrap();
        assert_eq!(block.listing_string(0, None), "00beef 01 \n");
    }

    #[test]
    fn slice_skips_bytes_but_advances_position() {
        let mut block = listing_block();
        for i in 0..6 {
            block.gen8(i);
        }
        block.assemble().unwrap();
        assert_eq!(block.listing_string(2, Some(4)), "000002 02 03 \n");
    }

    #[test]
    fn disabled_listing_collects_nothing() {
        let mut block = CodeBlock::new();
        block.gen8(0x90).gen_listing("nop");
        block.assemble().unwrap();
        assert_eq!(block.listing_string(0, None), "000000 90 \n");
    }
}
