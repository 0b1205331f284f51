//! Property-based tests using proptest.
//!
//! These tests verify address-arithmetic and assembly invariants across
//! generated input spaces, complementing the targeted unit and integration
//! tests.

use jitblock::{Addr, CodeBlock, Endian};
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────────

fn arb_endian() -> impl Strategy<Value = Endian> {
    prop_oneof![Just(Endian::Little), Just(Endian::Big)]
}

/// A primitive emission op: `(width_bits, value)`.
fn arb_emit_op() -> impl Strategy<Value = (u32, i64)> {
    (
        prop::sample::select(vec![8u32, 16, 32, 64]),
        any::<i64>(),
    )
}

// ── Address properties ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn addr32_bytes_round_trip(value in any::<u32>(), endian in arb_endian()) {
        let a = Addr::from_u64(u64::from(value), 32).unwrap();
        let bytes = a.bytes_endian(endian);
        prop_assert_eq!(bytes.len(), 4);
        let back = Addr::from_bytes(&bytes, endian).unwrap();
        prop_assert_eq!(back, a);
    }

    #[test]
    fn addr64_bytes_round_trip(value in any::<u64>(), endian in arb_endian()) {
        let a = Addr::from_u64(value, 64).unwrap();
        let back = Addr::from_bytes(&a.bytes_endian(endian), endian).unwrap();
        prop_assert_eq!(back, a);
    }

    #[test]
    fn add_then_sub_offset_is_identity(
        base in any::<u32>(),
        offset in -0x4000_0000i64..0x4000_0000i64,
    ) {
        // A 64-bit base well inside the range so neither direction can
        // carry out of the width.
        let a = Addr::from_u64(u64::from(base) + (1u64 << 33), 64).unwrap();
        let round = a.add_offset(offset).unwrap().sub_offset(offset).unwrap();
        prop_assert_eq!(round, a);
    }

    #[test]
    fn complement_negates(value in any::<u32>()) {
        let a = Addr::from_u64(u64::from(value), 32).unwrap();
        let sum = a.complement().add(&a).unwrap();
        prop_assert_eq!(sum.to_u64(), 0xffff_ffff);
    }

    #[test]
    fn cmp_matches_integer_order(lhs in any::<u64>(), rhs in any::<u64>()) {
        let a = Addr::from_u64(lhs, 64).unwrap();
        let b = Addr::from_u64(rhs, 64).unwrap();
        prop_assert_eq!(a.cmp_addr(&b).unwrap(), lhs.cmp(&rhs));
    }
}

// ── Assembly properties ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn emission_conserves_bytes(
        ops in prop::collection::vec(arb_emit_op(), 0..64),
        endian in arb_endian(),
    ) {
        let mut block = CodeBlock::new();
        block.set_endian(endian);
        let mut expected = 0u64;
        for (width, value) in &ops {
            block.gen_number(*width, *value).unwrap();
            expected += u64::from(width / 8);
        }
        let len = block.assemble().unwrap();
        prop_assert_eq!(len, expected);
        prop_assert_eq!(block.byte_count(), len);
        prop_assert_eq!(block.bytes().len() as u64, len);
    }

    #[test]
    fn reassembly_reproduces_bytes(
        ops in prop::collection::vec(arb_emit_op(), 0..32),
    ) {
        let mut block = CodeBlock::new();
        for (width, value) in &ops {
            block.gen_number(*width, *value).unwrap();
        }
        block.align(8, 0, 0xcc).unwrap();
        let len = block.assemble().unwrap();
        let bytes = block.bytes();
        prop_assert_eq!(block.assemble().unwrap(), len);
        prop_assert_eq!(block.bytes(), bytes);
    }

    #[test]
    fn align_lands_on_boundary(
        pre in 0u64..48,
        multiple in 1u64..32,
        offset in 0u64..32,
    ) {
        let mut block = CodeBlock::new();
        for _ in 0..pre {
            block.gen8(0);
        }
        block.align(multiple, offset, 0).unwrap();
        let mark = block.label();
        block.gen_label(mark).unwrap();
        let len = block.assemble().unwrap();
        let pos = block.label_pos(mark).unwrap();
        prop_assert_eq!(pos, len);
        prop_assert_eq!(pos % multiple, offset % multiple);
        prop_assert!(pos - pre < multiple);
    }

    #[test]
    fn labels_partition_the_stream(
        chunks in prop::collection::vec(0u64..16, 1..12),
    ) {
        // A label after each chunk of bytes must sit at the running sum.
        let mut block = CodeBlock::new();
        let mut marks = Vec::new();
        let mut running = 0u64;
        for chunk in &chunks {
            for _ in 0..*chunk {
                block.gen8(0x90);
            }
            running += chunk;
            let mark = block.label();
            block.gen_label(mark).unwrap();
            marks.push((mark, running));
        }
        let len = block.assemble().unwrap();
        prop_assert_eq!(len, running);
        for (mark, expected) in marks {
            prop_assert_eq!(block.label_pos(mark), Some(expected));
        }
    }
}
