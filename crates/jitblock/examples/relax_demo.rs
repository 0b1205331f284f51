//! Demonstrates deferred-item relaxation and listing output.
//!
//! Emits a backward jump whose encoding length depends on the distance to
//! its target, assembles the block twice (near and far), and prints the
//! listing of the far variant.

use jitblock::{CodeBlock, DeferredCheck, DeferredProduce, LabelId};

fn gen_jump(block: &mut CodeBlock, target: LabelId) {
    let short_check: DeferredCheck = Box::new(move |b, pos| {
        let dest = b.label_pos(target).unwrap() as i64;
        Ok((-128..=127).contains(&(dest - (pos as i64 + 2))).then_some(2))
    });
    let short_produce: DeferredProduce = Box::new(move |b, pos, out| {
        let dest = b.label_pos(target).unwrap() as i64;
        out.push(0xEB);
        out.push((dest - (pos as i64 + 2)) as u8);
    });
    let long_check: DeferredCheck = Box::new(|_, _| Ok(Some(5)));
    let long_produce: DeferredProduce = Box::new(move |b, pos, out| {
        let dest = b.label_pos(target).unwrap() as i64;
        out.push(0xE9);
        out.extend_from_slice(&((dest - (pos as i64 + 5)) as i32).to_le_bytes());
    });
    block
        .gen_deferred(
            vec![short_check, long_check],
            vec![short_produce, long_produce],
        )
        .unwrap();
}

fn build(fill: usize) -> CodeBlock {
    let mut block = CodeBlock::new();
    block.set_listing(true);
    let target = block.label();
    block.gen_label(target).unwrap();
    block.gen8(0x90).gen_listing("nop");
    for _ in 1..fill {
        block.gen8(0x00);
    }
    block.gen_listing("fill");
    gen_jump(&mut block, target);
    block.gen_listing("jmp back");
    block
}

fn main() {
    let mut near = build(100);
    let near_len = near.assemble().unwrap();
    println!("near: {} bytes (short form kept)", near_len);

    let mut far = build(200);
    let far_len = far.assemble().unwrap();
    println!("far:  {} bytes (relaxed to long form)\n", far_len);

    print!("{}", far.listing_string(190, None));
}
