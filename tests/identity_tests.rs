use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use runtime_tracer::{
    CountingSink, ObjectRef, ObjectStateTable, RecordKind, Tracer, TracerConfig, NO_ID,
};

#[test]
fn concurrent_assignment_never_duplicates_ids() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let table = Arc::new(ObjectStateTable::new());
    let mut workers = Vec::new();
    for _ in 0..THREADS {
        let table = Arc::clone(&table);
        workers.push(thread::spawn(move || {
            let mut ids = Vec::with_capacity(PER_THREAD);
            for _ in 0..PER_THREAD {
                ids.push(table.assign_id(&ObjectRef::new()));
            }
            ids
        }));
    }

    let mut all = HashSet::new();
    for worker in workers {
        for id in worker.join().unwrap() {
            assert!(id > 0);
            assert!(all.insert(id), "id {id} issued twice");
        }
    }
    assert_eq!(all.len(), THREADS * PER_THREAD);
    assert_eq!(table.live_count(), THREADS * PER_THREAD);
}

#[test]
fn reclaimed_ids_become_assignable_again() {
    let table = ObjectStateTable::new();
    let objects: Vec<ObjectRef> = (0..64).map(|_| ObjectRef::new()).collect();
    for obj in &objects {
        table.assign_id(obj);
    }

    // Visit only the even-indexed objects this cycle.
    for obj in objects.iter().step_by(2) {
        table.increment_lifetime(obj);
    }
    let mut removed = Vec::new();
    table.gc(|id| removed.push(id));
    assert_eq!(removed.len(), 32);
    assert_eq!(table.live_count(), 32);

    // Freed ids are found again by the free-bit scan, lowest first.
    let replacement = ObjectRef::new();
    let recycled = table.assign_id(&replacement);
    assert_eq!(recycled, *removed.iter().min().unwrap());
}

#[test]
fn ids_survive_cycles_while_visited() {
    let table = ObjectStateTable::new();
    let obj = ObjectRef::new();
    let id = table.assign_id(&obj);

    for _ in 0..5 {
        table.increment_lifetime(&obj);
        table.gc(|dead| panic!("live object reclaimed: {dead}"));
        assert_eq!(obj.id(), id);
    }
}

#[test]
fn unseen_ids_are_negative_and_strictly_decreasing() {
    let table = ObjectStateTable::new();
    for expected in 1..=10i64 {
        let obj = ObjectRef::new();
        assert_eq!(table.assign_unseen_id(&obj), -expected);
    }
    // Positive assignment is unaffected by the unseen counter.
    let obj = ObjectRef::new();
    assert_eq!(table.assign_id(&obj), 1);
}

#[test]
fn read_id_uses_the_zero_sentinel() {
    let table = ObjectStateTable::new();
    let obj = ObjectRef::new();
    assert_eq!(table.read_id(None), NO_ID);
    assert_eq!(table.read_id(Some(&obj)), NO_ID);
    let id = table.assign_id(&obj);
    assert_eq!(table.read_id(Some(&obj)), id);
}

#[test]
fn first_access_without_creation_emits_one_unseen_record() {
    let sink = CountingSink::new();
    let counts = sink.counts();
    let tracer = Tracer::new(TracerConfig::default(), Box::new(sink));

    let handle = tracer.register_thread();
    let foreign = ObjectRef::new();
    let member = runtime_tracer::register_name("Foreign.field");
    handle.record_get_field(&foreign, member);
    handle.record_get_field(&foreign, member);
    handle.record_put_field_int(&foreign, member, 9);
    handle.finalize();

    assert_eq!(counts.of(RecordKind::Unseen), 1);
    assert_eq!(counts.of(RecordKind::GetField), 2);
    assert_eq!(counts.of(RecordKind::PutFieldInt), 1);
    assert_eq!(foreign.id(), -1);
}

#[test]
fn gc_cycle_records_removals_and_boundary() {
    let sink = CountingSink::new();
    let counts = sink.counts();
    let tracer = Tracer::new(TracerConfig::default(), Box::new(sink));

    let handle = tracer.register_thread();
    let objects: Vec<ObjectRef> = (0..10).map(|_| ObjectRef::new()).collect();
    for obj in &objects {
        handle.record_new(obj);
    }
    // Only the first three survive this cycle.
    for obj in &objects[..3] {
        tracer.survivor(obj);
    }
    handle.gc_cycle();
    handle.finalize();

    assert_eq!(counts.of(RecordKind::Removal), 7);
    assert_eq!(counts.of(RecordKind::Gc), 1);
    assert_eq!(tracer.identity_table().live_count(), 3);
}
