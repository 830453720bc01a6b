//! Release tracking through the installed global allocator.

use std::alloc::{alloc, dealloc, Layout};

use comkit::com::{ComRc, Unknown, IID_IUNKNOWN};
use comkit::malloc_spy::MallocSpy;
use comkit::memory::{self, is_deleted, start_tracking, stop_tracking, tracker};
use comkit::{expect_deleted, expect_uninitialized, install_tracking_allocator};
use serial_test::serial;

install_tracking_allocator!();

#[test]
#[serial]
fn test_dropped_box_is_deleted() {
    let value = Box::new([7u64; 4]);
    let ptr: *const [u64; 4] = &*value;

    start_tracking(ptr);
    assert!(!is_deleted(ptr));
    drop(value);
    expect_deleted!(ptr);

    stop_tracking();
    assert!(!is_deleted(ptr));
}

#[test]
#[serial]
fn test_untracked_release_is_ignored() {
    let watched = Box::new(1u32);
    let other = Box::new(2u32);
    let watched_ptr: *const u32 = &*watched;
    let other_ptr: *const u32 = &*other;

    start_tracking(watched_ptr);
    drop(other);
    assert!(!is_deleted(other_ptr));
    assert!(!is_deleted(watched_ptr));
    assert_eq!(tracker().deleted_count(), 0);

    drop(watched);
    assert_eq!(tracker().deleted_count(), 1);
    stop_tracking();
}

#[test]
#[serial]
fn test_fresh_allocation_is_uninitialized() {
    let layout = Layout::new::<[u8; 16]>();
    unsafe {
        let block = alloc(layout);
        assert!(!block.is_null());
        expect_uninitialized!(block);
        block.write(0);
        assert!(!memory::is_uninitialized(block));
        dealloc(block, layout);
    }
}

#[test]
#[serial]
fn test_heap_spy_destroyed_on_last_release() {
    let spy = ComRc::new(MallocSpy::new());
    let second = spy.clone();
    let ptr = spy.as_ptr();
    start_tracking(ptr);

    drop(spy);
    assert!(!is_deleted(ptr));
    assert_eq!(second.ref_count(), 1);

    drop(second);
    expect_deleted!(ptr);
    stop_tracking();
}

#[test]
#[serial]
fn test_heap_spy_released_through_interface_pointer() {
    let raw = ComRc::into_raw(ComRc::new(MallocSpy::new()));
    start_tracking(raw);

    // SAFETY: raw holds the reference handed out by into_raw.
    let spy: &dyn Unknown = unsafe { &*raw };
    let mut unknown = std::ptr::null_mut();
    assert!(spy.query_interface(&IID_IUNKNOWN, Some(&mut unknown)).is_ok());
    assert_eq!(unknown, raw.cast::<std::ffi::c_void>());

    assert_eq!(spy.release(), 1);
    assert!(!is_deleted(raw));
    assert_eq!(spy.release(), 0);
    expect_deleted!(raw);
    stop_tracking();
}

#[test]
#[serial]
fn test_released_reference_keeps_object_alive() {
    let spy = ComRc::new(MallocSpy::new());
    let ptr = spy.as_ptr();
    start_tracking(ptr);

    spy.add_ref();
    assert_eq!(spy.release(), 1);
    assert!(!is_deleted(ptr));

    drop(spy);
    expect_deleted!(ptr);
    stop_tracking();
}

#[test]
#[serial]
fn test_reset_keeps_tracking_enabled() {
    let value = Box::new(5u16);
    let ptr: *const u16 = &*value;
    start_tracking(ptr);
    tracker().reset();

    assert!(tracker().is_tracking());
    assert_eq!(tracker().tracked_count(), 0);
    drop(value);
    assert!(!is_deleted(ptr));
    stop_tracking();
    assert!(!tracker().is_tracking());
}

#[test]
#[serial]
fn test_allocations_on_other_threads_are_tracked() {
    let value = Box::new(vec![1u8; 32]);
    let ptr: *const Vec<u8> = &*value;
    start_tracking(ptr);

    // Box<Vec<u8>> is Send; the release happens on another thread.
    std::thread::spawn(move || drop(value)).join().unwrap();
    expect_deleted!(ptr);
    stop_tracking();
}
