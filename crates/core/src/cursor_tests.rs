use super::*;

#[test]
fn starts_at_one() {
    let allocator = CursorAllocator::new();
    assert_eq!(allocator.current(), 0);
    assert_eq!(allocator.next(), 1);
}

#[test]
fn strictly_increasing() {
    let allocator = CursorAllocator::new();
    let mut previous = allocator.next();
    for _ in 0..100 {
        let next = allocator.next();
        assert!(next > previous);
        previous = next;
    }
}

#[test]
fn current_reflects_last_issued() {
    let allocator = CursorAllocator::new();
    allocator.next();
    allocator.next();
    let third = allocator.next();
    assert_eq!(allocator.current(), third);
}
