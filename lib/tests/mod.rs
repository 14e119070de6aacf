use crate::*;


#[test]
fn allocate_protect_patch_release() {
    let address = allocate(0, 0x4000, MemoryMode::ReadWrite).unwrap();

    unsafe {
        assert!(patch(address + 0x1000, 7).unwrap());
        protect(address, 0x4000, MemoryMode::Read, None).unwrap();
        assert!(patch_protected(address + 0x1000, 8, MemoryMode::Read).unwrap());
        assert_eq!((address as usize as *const u64).add(0x200).read(), 8);
        deallocate(address, 0x4000).unwrap();
    }
}

#[test]
fn aligned_allocations_in_custom_window() {
    let window = AddressWindow::default().with_min(0x100_0000_0000).unwrap();
    let mut regions = Vec::new();
    for alignment in [0x1000, 0x1_0000, 0x20_0000] {
        let address =
            allocate_aligned_in(&window, 0, 0x1000, MemoryMode::ReadWrite, alignment).unwrap();
        assert_eq!(address % alignment, 0);
        assert!(window.contains(address, 0x1000));
        regions.push(unsafe { Region::from_raw(address, 0x1000, MemoryMode::ReadWrite) });
    }
}

#[test]
fn concurrent_regions_on_many_threads() {
    let handles = (0..8u64)
        .map(|i| {
            std::thread::spawn(move || {
                let mut region = Region::allocate(0x1000, MemoryMode::ReadWrite).unwrap();
                for offset in (0..0x1000).step_by(8) {
                    region.patch(offset, i << 32 | offset as u64).unwrap();
                }
                region.protect(MemoryMode::Read).unwrap();
                let intact = region
                    .as_slice()
                    .unwrap()
                    .chunks_exact(8)
                    .enumerate()
                    .all(|(n, word)| {
                        u64::from_ne_bytes(word.try_into().unwrap()) == i << 32 | (n as u64 * 8)
                    });
                intact
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
}

#[test]
fn concurrent_patches_never_tear() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const A: u64 = 0x1111_1111_1111_1111;
    const B: u64 = 0x2222_2222_2222_2222;

    let region = Region::allocate(0x1000, MemoryMode::ReadWrite).unwrap();
    let address = region.address();
    unsafe { patch(address, A).unwrap() };

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let done = done.clone();
        std::thread::spawn(move || {
            let word = unsafe { std::sync::atomic::AtomicU64::from_ptr(address as usize as *mut u64) };
            while !done.load(Ordering::Acquire) {
                let value = word.load(Ordering::Acquire);
                assert!(value == A || value == B, "torn read 0x{:x}", value);
            }
        })
    };

    for i in 0..10_000 {
        unsafe { patch(address, if i % 2 == 0 { B } else { A }).unwrap() };
    }
    done.store(true, Ordering::Release);
    reader.join().unwrap();
    drop(region);
}
