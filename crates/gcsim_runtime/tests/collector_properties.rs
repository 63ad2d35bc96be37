use gcsim_runtime::{
    GcConfig, GcError, GcEvent, GcStrategy, GcStrategyTrait, MemorySink, NullSink, ObjectId,
    create_collector,
};

fn id(raw: u64) -> ObjectId {
    ObjectId::new(raw)
}

fn collector(strategy: GcStrategy) -> Box<dyn GcStrategyTrait> {
    let config = GcConfig::new(strategy).with_max_heap_size(64 * 1024 * 1024);
    create_collector(config, Box::new(NullSink))
}

fn allocate_range(gc: &mut dyn GcStrategyTrait, ids: std::ops::RangeInclusive<u64>, size: usize) {
    for raw in ids {
        gc.allocate_with_id(id(raw), size).unwrap();
    }
}

#[test]
fn test_acyclic_cascade_under_reference_counting() {
    let mut gc = collector(GcStrategy::ReferenceCounting);
    let n = 10;
    for raw in 1..=n {
        gc.allocate_with_id(id(raw), raw as usize).unwrap();
    }
    gc.add_root(id(1)).unwrap();
    for raw in 1..n {
        gc.add_reference(id(raw), id(raw + 1)).unwrap();
    }
    let before = gc.total_memory();
    assert_eq!(before, (1..=n as usize).sum::<usize>());

    gc.remove_root(id(1)).unwrap();
    assert_eq!(gc.alive_objects(), 0);
    assert_eq!(gc.total_memory(), 0);
    assert_eq!(gc.summary().bytes_freed, before);
}

#[test]
fn test_cycle_leaks_under_reference_counting() {
    let mut gc = collector(GcStrategy::ReferenceCounting);
    allocate_range(gc.as_mut(), 1..=2, 16);
    gc.add_root(id(1)).unwrap();
    gc.add_reference(id(1), id(2)).unwrap();
    gc.add_reference(id(2), id(1)).unwrap();
    gc.remove_root(id(1)).unwrap();

    // Nothing short of breaking the cycle reclaims it.
    gc.collect();
    gc.allocate(16).unwrap();
    gc.collect();
    for raw in [1, 2] {
        assert_eq!(gc.object(id(raw)).unwrap().ref_count(), 1);
    }
    assert_eq!(gc.cycle_leaks(), vec![id(1), id(2)]);
    gc.check_invariants().unwrap();
}

#[test]
fn test_cycle_reclaimed_by_mark_sweep() {
    let mut gc = collector(GcStrategy::MarkSweep);
    allocate_range(gc.as_mut(), 1..=2, 16);
    gc.add_reference(id(1), id(2)).unwrap();
    gc.add_reference(id(2), id(1)).unwrap();

    assert_eq!(gc.collect(), 32);
    assert_eq!(gc.alive_objects(), 0);
}

#[test]
fn test_cascade_deletion_leaves_cycle_mark_sweep_does_not() {
    let mut results = Vec::new();
    for strategy in [GcStrategy::CascadeDeletion, GcStrategy::MarkSweep] {
        let mut gc = collector(strategy);
        allocate_range(gc.as_mut(), 1..=3, 8);
        gc.add_root(id(1)).unwrap();
        gc.add_reference(id(1), id(2)).unwrap();
        gc.add_reference(id(2), id(3)).unwrap();
        gc.add_reference(id(3), id(2)).unwrap();
        gc.remove_reference(id(1), id(2)).unwrap();
        gc.collect();
        results.push(gc.heap().ids());
    }
    assert_eq!(results[0], vec![id(1), id(2), id(3)]);
    assert_eq!(results[1], vec![id(1)]);
}

#[test]
fn test_second_collection_frees_nothing() {
    for strategy in GcStrategy::ALL {
        let mut gc = collector(strategy);
        allocate_range(gc.as_mut(), 1..=4, 8);
        gc.add_root(id(1)).unwrap();
        gc.add_reference(id(1), id(2)).unwrap();
        gc.add_reference(id(3), id(4)).unwrap();
        gc.add_reference(id(4), id(3)).unwrap();

        gc.collect();
        assert_eq!(gc.collect(), 0, "{strategy}");
    }
}

#[test]
fn test_deleted_identities_are_never_reused() {
    for strategy in GcStrategy::ALL {
        let mut gc = collector(strategy);
        let a = gc.allocate(8).unwrap();
        let b = gc.allocate(8).unwrap();
        gc.add_root(a).unwrap();
        gc.add_reference(a, b).unwrap();
        gc.remove_reference(a, b).unwrap();
        gc.collect();

        assert!(!gc.contains(b), "{strategy}");
        assert_eq!(gc.add_reference(a, b), Err(GcError::MissingObject(b)));
        assert_eq!(gc.add_root(b), Err(GcError::MissingObject(b)));
        assert!(matches!(
            gc.allocate_with_id(b, 8),
            Err(GcError::InvalidIdentity { .. })
        ));
        for _ in 0..5 {
            assert_ne!(gc.allocate(8).unwrap(), b);
        }
    }
}

#[test]
fn test_roots_are_immune() {
    for strategy in [GcStrategy::MarkSweep, GcStrategy::CascadeDeletion] {
        let mut gc = collector(strategy);
        let root = gc.allocate(8).unwrap();
        let other = gc.allocate(8).unwrap();
        gc.add_root(root).unwrap();
        gc.add_reference(root, other).unwrap();
        gc.remove_reference(root, other).unwrap();

        gc.collect();
        assert!(gc.contains(root), "{strategy}");
        assert!(!gc.contains(other), "{strategy}");
    }
}

#[test]
fn test_edge_round_trip_restores_state() {
    for strategy in GcStrategy::ALL {
        let mut gc = collector(strategy);
        allocate_range(gc.as_mut(), 1..=3, 8);
        gc.add_root(id(1)).unwrap();
        gc.add_root(id(2)).unwrap();
        gc.add_reference(id(3), id(2)).unwrap();

        let before = gc.snapshot();
        gc.add_reference(id(1), id(2)).unwrap();
        gc.remove_reference(id(1), id(2)).unwrap();
        assert_eq!(gc.snapshot(), before, "{strategy}");
        gc.check_invariants().unwrap();
    }
}

#[test]
fn test_concrete_scenario() {
    let sink = MemorySink::new();
    let config = GcConfig::new(GcStrategy::ReferenceCounting);
    let mut gc = create_collector(config, Box::new(sink.clone()));

    gc.allocate_with_id(id(1), 32).unwrap();
    gc.allocate_with_id(id(2), 48).unwrap();
    gc.add_reference(id(1), id(2)).unwrap();
    assert_eq!(gc.object(id(2)).unwrap().ref_count(), 1);

    gc.remove_reference(id(1), id(2)).unwrap();
    assert_eq!(gc.heap().ids(), vec![id(1)]);
    assert_eq!(gc.total_memory(), 32);
    assert_eq!(sink.events().last(), Some(&GcEvent::Delete { object_id: id(2) }));
}

#[test]
fn test_long_chains_do_not_overflow() {
    const LEN: u64 = 100_000;
    for strategy in [GcStrategy::ReferenceCounting, GcStrategy::CascadeDeletion] {
        let mut gc = collector(strategy);
        allocate_range(gc.as_mut(), 1..=LEN, 1);
        gc.add_root(id(1)).unwrap();
        for raw in 1..LEN {
            gc.add_reference(id(raw), id(raw + 1)).unwrap();
        }
        gc.clear_logs();

        gc.remove_reference(id(1), id(2)).unwrap();
        assert_eq!(gc.alive_objects(), 1, "{strategy}");
        assert_eq!(gc.total_memory(), 1);
    }
}

#[test]
fn test_sentinel_identity_is_rejected() {
    assert!(matches!(
        ObjectId::from_raw(0),
        Err(GcError::InvalidIdentity { raw: 0, .. })
    ));
    let mut gc = collector(GcStrategy::MarkSweep);
    assert!(matches!(
        gc.allocate_with_id(ObjectId::ROOT, 8),
        Err(GcError::InvalidIdentity { .. })
    ));
}
