//! Arena sub-allocation and uniform block change tracking.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use glam::Vec4;
use rstest::rstest;

use deferred_renderer::error::ArenaError;
use deferred_renderer::uniform::{ArenaKind, UniformArena, UniformBlock, UniformValue};

#[test]
fn test_small_allocations_take_full_alignment_steps() {
    let mut arena = UniformArena::new(ArenaKind::ObjectData, 1024, 256);

    let offsets: Vec<usize> = (0..3).map(|_| arena.allocate(10).unwrap()).collect();
    assert_eq!(offsets, vec![0, 256, 512]);
    assert_eq!(arena.allocate(10).unwrap(), 768);
    assert!(matches!(
        arena.allocate(10),
        Err(ArenaError::Exhausted { arena: ArenaKind::ObjectData, capacity: 1024, .. })
    ));
}

#[rstest]
#[case(1, &[3, 0, 7, 1])]
#[case(16, &[10, 40, 0, 3])]
#[case(256, &[10, 300, 64, 1])]
fn test_advance_is_aligned_and_monotonic(#[case] alignment: usize, #[case] sizes: &[usize]) {
    let mut arena = UniformArena::new(ArenaKind::ShaderParameters, 4096, alignment);
    let mut previous = Vec::new();

    for size in sizes {
        let offset = arena.advance(alignment).unwrap();
        assert_eq!(offset % alignment, 0);
        assert!(previous.iter().all(|p| offset >= *p));
        arena.write(offset, &vec![0xAB; *size]).unwrap();
        arena.allocate(*size).unwrap();
        previous.push(offset);
    }

    arena.reset();
    assert_eq!(arena.advance(alignment).unwrap(), 0);
}

#[test]
fn test_populate_reports_only_real_changes() {
    let mut arena = UniformArena::new(ArenaKind::ObjectData, 1024, 256);
    let counter = Arc::new(AtomicU32::new(7));

    let mut block = UniformBlock::new("Tint", ArenaKind::ObjectData);
    block.add("Color", || UniformValue::Vec4(Vec4::new(1.0, 0.5, 0.25, 1.0)));
    let c = counter.clone();
    block.add("Count", move || UniformValue::UInt(c.load(Ordering::Relaxed)));
    block.add("Scale", || UniformValue::Float(2.0));

    assert!(block.populate(&mut arena, 0).unwrap());
    assert!(!block.populate(&mut arena, 0).unwrap());
    let before = arena.bytes(0..block.size()).to_vec();

    counter.store(8, Ordering::Relaxed);
    assert!(block.populate(&mut arena, 0).unwrap());
    let after = arena.bytes(0..block.size()).to_vec();

    let count = block.member_range("Count").unwrap();
    for (i, (old, new)) in before.iter().zip(&after).enumerate() {
        if count.contains(&i) {
            continue;
        }
        assert_eq!(old, new, "byte {i} outside Count changed");
    }
    assert_ne!(before[count.clone()], after[count]);
}

#[test]
fn test_populate_at_new_offset_counts_as_change() {
    let mut arena = UniformArena::new(ArenaKind::ObjectData, 1024, 256);
    let mut block = UniformBlock::new("Tint", ArenaKind::ObjectData);
    block.add("Scale", || UniformValue::Float(2.0));

    assert!(block.populate(&mut arena, 0).unwrap());
    assert!(block.populate(&mut arena, 256).unwrap());
    assert_eq!(block.offset(), Some(256));
    assert_eq!(block.member_range("Scale"), Some(256..260));
}
