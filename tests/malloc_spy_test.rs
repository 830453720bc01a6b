//! Allocation spy bookkeeping, driven the way the COM allocator drives it.

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;
use std::thread;

use comkit::com::{ComRc, Unknown, E_INVALIDARG, E_NOINTERFACE, IID_IMALLOCSPY, IID_ISTREAM, IID_IUNKNOWN, S_OK};
use comkit::malloc_spy::{MallocSpy, MallocSpyHooks};
use proptest::prelude::*;

fn addr(value: usize) -> *mut c_void {
    value as *mut c_void
}

/// Simulates one allocate call observed by `spy`.
fn allocate(spy: &MallocSpy, size: usize, block: *mut c_void) -> *mut c_void {
    assert_eq!(spy.pre_alloc(size), size);
    spy.post_alloc(block)
}

fn free(spy: &MallocSpy, block: *mut c_void) {
    let request = spy.pre_free(block, true);
    assert_eq!(request, block);
    spy.post_free(true);
}

#[test]
fn test_allocate_then_free() {
    let spy = MallocSpy::new();
    let p = addr(0x1000);

    assert_eq!(allocate(&spy, 4, p), p);
    assert!(spy.is_allocated(p));
    assert_eq!(spy.allocated_count(), 1);

    free(&spy, p);
    assert!(!spy.is_allocated(p));
    assert!(spy.is_deleted(p));
    assert_eq!(spy.deleted_count(), 1);
}

#[test]
fn test_double_free_counts_twice() {
    let spy = MallocSpy::new();
    let p = addr(0x2000);
    spy.post_alloc(p);

    free(&spy, p);
    free(&spy, p);
    assert_eq!(spy.deleted_count(), 2);
    assert!(spy.is_deleted(p));
}

#[test]
fn test_free_of_unknown_address() {
    let spy = MallocSpy::new();
    let p = addr(0x3000);
    free(&spy, p);
    assert!(spy.is_deleted(p));
    assert_eq!(spy.allocated_count(), 0);
}

#[test]
fn test_realloc_retires_old_block() {
    let spy = MallocSpy::new();
    let old = addr(0x4000);
    let new = addr(0x5000);
    spy.post_alloc(old);

    let mut request = ptr::null_mut();
    assert_eq!(spy.pre_realloc(old, 64, Some(&mut request), true), 64);
    assert_eq!(request, old);
    assert_eq!(spy.post_realloc(new, true), new);

    assert!(spy.is_deleted(old));
    assert!(!spy.is_allocated(old));
    assert!(spy.is_allocated(new));
}

#[test]
fn test_pass_through_hooks() {
    let spy = MallocSpy::new();
    let p = addr(0x6000);
    assert_eq!(spy.pre_get_size(p, false), p);
    assert_eq!(spy.post_get_size(12, false), 12);
    assert_eq!(spy.pre_did_alloc(p, false), p);
    assert_eq!(spy.post_did_alloc(p, false, 1), 1);
    spy.pre_heap_minimize();
    spy.post_heap_minimize();
    assert_eq!(spy.allocated_count(), 0);
    assert_eq!(spy.deleted_count(), 0);
}

#[test]
fn test_query_interface() {
    let spy = ComRc::new(MallocSpy::new());

    for iid in [IID_IUNKNOWN, IID_IMALLOCSPY] {
        let mut object = ptr::null_mut();
        assert_eq!(spy.query_interface(&iid, Some(&mut object)), S_OK);
        assert_eq!(object, spy.as_ptr().cast::<c_void>());
        assert_eq!(spy.release(), 1);
    }

    let mut object = addr(1);
    assert_eq!(spy.query_interface(&IID_ISTREAM, Some(&mut object)), E_NOINTERFACE);
    assert!(object.is_null());
    assert_eq!(spy.query_interface(&IID_IUNKNOWN, None), E_INVALIDARG);
    assert_eq!(spy.ref_count(), 1);
}

#[test]
fn test_concurrent_readers_see_completed_writes() {
    let spy = Arc::new(MallocSpy::new());
    let blocks: Vec<usize> = (1..=64).map(|i| i * 0x10).collect();

    let writer = {
        let spy = Arc::clone(&spy);
        let blocks = blocks.clone();
        thread::spawn(move || {
            for block in blocks {
                spy.post_alloc(addr(block));
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let spy = Arc::clone(&spy);
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..200 {
                    let count = spy.allocated_count();
                    assert!(count >= last, "count went backwards: {count} < {last}");
                    last = count;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(spy.allocated_count(), blocks.len());
    assert!(blocks.iter().all(|&b| spy.is_allocated(addr(b))));
}

proptest! {
    #[test]
    fn prop_allocated_after_post_alloc(a in 1usize..usize::MAX) {
        let spy = MallocSpy::new();
        spy.post_alloc(addr(a));
        prop_assert!(spy.is_allocated(addr(a)));
        prop_assert!(!spy.is_deleted(addr(a)));
    }

    #[test]
    fn prop_deleted_after_pre_free(a in 1usize..usize::MAX, allocated in any::<bool>()) {
        let spy = MallocSpy::new();
        if allocated {
            spy.post_alloc(addr(a));
        }
        spy.pre_free(addr(a), true);
        prop_assert!(!spy.is_allocated(addr(a)));
        prop_assert!(spy.is_deleted(addr(a)));
    }

    #[test]
    fn prop_every_free_counts(frees in 1usize..16) {
        let spy = MallocSpy::new();
        let p = addr(0x8000);
        for _ in 0..frees {
            spy.pre_free(p, true);
        }
        prop_assert_eq!(spy.deleted_count(), frees);
    }

    #[test]
    fn prop_free_reallocated_block(blocks in prop::collection::hash_set(1usize..1 << 20, 1..32)) {
        let spy = MallocSpy::new();
        for &b in &blocks {
            spy.post_alloc(addr(b));
        }
        for &b in &blocks {
            spy.pre_free(addr(b), true);
        }
        prop_assert_eq!(spy.allocated_count(), 0);
        prop_assert_eq!(spy.deleted_count(), blocks.len());
        // Reallocating a freed address makes it live again.
        let first = *blocks.iter().next().unwrap();
        spy.post_alloc(addr(first));
        prop_assert!(spy.is_allocated(addr(first)));
    }
}
