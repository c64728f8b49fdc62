use crate::kalloc::KMEM;
use crate::{MAKE_SATP, PA2PTE, PGROUNDDOWN, PGROUNDUP, printf, PTE2PA, PTE_FLAGS, PX};
use crate::memlayout::{KERNBASE, PHYSTOP, PLIC, TRAMPOLINE, UART0, VIRTIO0};
use crate::proc::{myproc, proc_mapstacks};
use crate::riscv::{MAXVA, PageTable, PGSIZE, Pte, PTE_R, PTE_SIZE, PTE_U, PTE_V, PTE_W, PTE_X, sfence_vma, w_satp};
use crate::string::{memmove, memset};

/*
 * the kernel's page table.
 */
pub static mut KERNEL_PAGETABLE: Option<&'static PageTable> = None;

extern {
    static etext: u8; // kernel.ld sets this to end of kernel code.
    static trampoline: u8; // linked in asm::trampoline
}

// Make a direct-map page table for the kernel.
fn kvmmake<'a>() -> &'a PageTable {
    let kpgtbl = unsafe {
        let pg: *mut PageTable = KMEM.kalloc();
        if pg.is_null() {
            panic!("failed to alloc for root page table");
        }
        memset(pg as *mut u8, 0, PGSIZE);
        pg.as_mut().unwrap()
    };

    // uart registers
    kvmmap(kpgtbl, UART0, UART0, PGSIZE, PTE_R | PTE_W);

    // virtio mmio disk interface
    kvmmap(kpgtbl, VIRTIO0, VIRTIO0, PGSIZE, PTE_R | PTE_W);

    // PLIC
    kvmmap(kpgtbl, PLIC, PLIC, 0x400000, PTE_R | PTE_W);

    let etext_addr = (unsafe { &etext } as *const u8).expose_addr();
    // map kernel text executable and read-only.
    kvmmap(kpgtbl, KERNBASE, KERNBASE, etext_addr - KERNBASE, PTE_R | PTE_X);

    // map kernel data and the physical RAM we'll make use of.
    kvmmap(kpgtbl, etext_addr, etext_addr, PHYSTOP - etext_addr, PTE_R | PTE_W);

    let trampoline_addr = (unsafe { &trampoline } as *const u8).expose_addr();
    // map the trampoline for trap entry/exit to
    // the highest virtual address in the kernel.
    kvmmap(kpgtbl, TRAMPOLINE, trampoline_addr, PGSIZE, PTE_R | PTE_X);

    // allocate and map a kernel stack for each process.
    proc_mapstacks(kpgtbl);

    kpgtbl
}

// Initialize the one KERNEL_PAGETABLE
pub fn kvminit() {
    unsafe {
        KERNEL_PAGETABLE = Some(kvmmake());
    }
}

// add a mapping to the kernel page table.
// only used when booting.
// does not flush TLB or enable paging.
pub fn kvmmap(kpgtbl: &mut PageTable, va: usize, pa: usize, sz: usize, perm: usize) {
    if map_region(kpgtbl, va, pa, sz, perm) != 0 {
        panic!("kvmmap");
    }
}

// Create PTEs for virtual addresses starting at va that refer to
// physical addresses starting at pa. va and size might not
// be page-aligned. Returns 0 on success, -1 if walk_create() couldn't
// allocate a needed page-table page.
pub fn map_region(pagetable: &mut PageTable, va: usize, mut pa: usize, size: usize, perm: usize) -> i32 {
    if size == 0 {
        panic!("map_region: size");
    }

    let mut a: usize = PGROUNDDOWN!(va);
    let last: usize = PGROUNDDOWN!(va + size - 1);

    loop {
        let pte: Option<&mut Pte> = walk_create(pagetable, a);
        if pte.is_none() {
            return -1;
        }

        let pte = pte.unwrap();
        if pte.0 & PTE_V != 0 {
            printf!("a: {:x}, Pte: {:x}\n", a, pte.0);
            panic!("map_region: remap");
        }

        (*pte) = Pte(PA2PTE!(pa) | perm | PTE_V);
        if a == last {
            break;
        }

        a += PGSIZE;
        pa += PGSIZE;
    }
    return 0;
}

// Map a single page. A thin wrapper over map_region for callers that only
// ever deal with one page at a time (e.g. lazily faulted-in heap pages).
pub fn map_page(pagetable: &mut PageTable, va: usize, pa: usize, perm: usize) -> i32 {
    map_region(pagetable, va, pa, PGSIZE, perm)
}

// Remove npages of mappings starting from va. va must be page-aligned.
// A page with no mapping at all is skipped rather than treated as an
// error, since rudimentary zero-fill pages may never have been faulted
// in. Optionally free the underlying physical memory.
pub fn uvmunmap(pagetable: &mut PageTable, va: usize, npages: usize, do_free: bool) {
    if (va % PGSIZE) != 0 {
        panic!("uvmunmap: not aligned");
    }

    let mut a = va;
    while a < va + npages * PGSIZE {
        let pte = walk_lookup(pagetable, a);
        if pte == 0 {
            a += PGSIZE;
            continue;
        }

        if PTE_FLAGS!(pte) == PTE_V {
            panic!("uvmunmap: not a leaf");
        }

        if do_free {
            let pa = PTE2PA!(pte);
            unsafe { KMEM.kfree(pa as *mut PageTable); }
        }

        if let Some(slot) = walk(pagetable, a, 0) {
            *slot = Pte(0);
        }

        a += PGSIZE;
    }
}

// Return the address of the PTE in page table pagetable
// that corresponds to virtual address va. If alloc!=0,
// create any required page-table pages.
//
// The risc-v Sv39 scheme has three levels of page-table
// pages. A page-table page contains 512 64-bit PTEs.
// A 64-bit virtual address is split into five fields:
//   39..63 -- must be zero.
//   30..38 -- 9 bits of level-2 index.
//   21..29 -- 9 bits of level-1 index.
//   12..20 -- 9 bits of level-0 index.
//    0..11 -- 12 bits of byte offset within the page.
fn walk(pagetable: &mut PageTable, va: usize, alloc: usize) -> Option<&mut Pte> {
    if va >= MAXVA {
        panic!("walk");
    }

    let mut curr_pgtbl = pagetable;
    for level in (1..3).rev() {
        let pte = &mut (curr_pgtbl.0)[PX!(level, va)];
        if pte.0 & PTE_V == PTE_V {
            unsafe { curr_pgtbl = (PTE2PA!(pte.0) as *mut PageTable).as_mut().unwrap(); }
        } else {
            if alloc == 0 {
                return None;
            }

            unsafe {
                let next_level_pgtbl: *mut PageTable = KMEM.kalloc();
                if next_level_pgtbl.is_null() {
                    return None;
                }

                memset(next_level_pgtbl as *mut u8, 0, PGSIZE);

                *pte = Pte(PA2PTE!(next_level_pgtbl.expose_addr()) | PTE_V);
                curr_pgtbl = next_level_pgtbl.as_mut().unwrap();
            }
        }
    }

    Some(&mut (curr_pgtbl.0)[PX!(0, va)])
}

// Allocating variant of walk: creates any missing interior page-table
// pages along the way.
fn walk_create(pagetable: &mut PageTable, va: usize) -> Option<&mut Pte> {
    walk(pagetable, va, 1)
}

// Read-only variant of walk: returns 0 if any level of the walk is
// missing rather than allocating. Returns the raw PTE value rather
// than a reference, since a subsequent kfree could otherwise leave
// callers holding a dangling pointer.
fn walk_lookup(pagetable: &mut PageTable, va: usize) -> usize {
    match walk(pagetable, va, 0) {
        None => 0,
        Some(pte) => pte.0,
    }
}

// Look up a virtual address, return the physical address,
// or 0 if not mapped.
// Can only be used to look up user pages.
pub fn walkaddr(pagetable: &mut PageTable, va: usize) -> usize {
    if va >= MAXVA {
        return 0;
    }

    let pte = walk_lookup(pagetable, va);
    if pte == 0 {
        return 0;
    }
    if pte & PTE_V == 0 {
        return 0;
    }
    if pte & PTE_U == 0 {
        return 0;
    }
    PTE2PA!(pte)
}

// Switch h/w page table register to the kernel's page table,
// and enable paging.
pub fn kvminithart() {
    // wait for any previous writes to the page table memory to finish.
    sfence_vma();

    let addr = unsafe { (KERNEL_PAGETABLE.unwrap() as *const PageTable).expose_addr() };
    let satp = MAKE_SATP!(addr);
    w_satp(satp);

    // flush stale entries from the TLB.
    sfence_vma();
}

// create an empty user page table.
// returns 0 if out of memory.
pub fn uvmcreate<'a>() -> Option<&'a mut PageTable> {
    unsafe {
        let pagetable: *mut PageTable = KMEM.kalloc();
        if pagetable.is_null() {
            return None;
        }
        memset(pagetable as *mut u8, 0, PGSIZE);
        pagetable.as_mut()
    }
}

// Load the user initcode into address 0 of pagetable,
// for the very first process.
// sz must be less than a page.
pub fn uvmfirst(pagetable: &mut PageTable, src: *const u8, sz: usize) {
    if sz >= PGSIZE {
        panic!("uvmfirst: more than a page");
    }

    let mem: *mut u8 = unsafe { KMEM.kalloc() };
    memset(mem, 0, PGSIZE);
    map_region(pagetable, 0, mem.expose_addr(), PGSIZE, PTE_W | PTE_R | PTE_X | PTE_U);
    memmove(mem, src, sz);
}

// Handle a page fault against a rudimentary zero-fill heap: if va falls
// within [0, sz) and has no mapping yet, back it with a freshly zeroed
// frame. Returns 0 on success, -1 if va is outside the process's address
// space, already mapped, or memory is exhausted.
pub fn vmfault(pagetable: &mut PageTable, va: usize, sz: usize) -> i32 {
    let va = PGROUNDDOWN!(va);
    if va >= PGROUNDUP!(sz) {
        return -1;
    }

    if walk_lookup(pagetable, va) != 0 {
        return -1;
    }

    let mem: *mut u8 = unsafe { KMEM.kalloc() };
    if mem.is_null() {
        return -1;
    }
    memset(mem, 0, PGSIZE);

    if map_page(pagetable, va, mem.expose_addr(), PTE_W | PTE_R | PTE_U) != 0 {
        unsafe { KMEM.kfree(mem) };
        return -1;
    }

    0
}

// Recursively free page-table pages.
// All leaf mappings must already have been removed.
fn freewalk(pagetable: &mut PageTable) {
    // there are 2^9 = 512 PTEs in a page table.
    for pte in &mut pagetable.0 {
        if pte.0 & PTE_V != 0 && pte.0 & (PTE_R | PTE_W | PTE_X) == 0 {
            // this PTE points to a lower-level page table.
            let child_pgtbl = unsafe { (PTE2PA!(pte.0) as *mut PageTable).as_mut().unwrap() };
            freewalk(child_pgtbl);
            *pte = Pte(0);
        } else if pte.0 & PTE_V != 0 {
            panic!("freewalk: leaf");
        }
    }

    unsafe { KMEM.kfree(pagetable) };
}

// Free user memory pages,
// then free page-table pages.
pub fn uvmfree(pagetable: &mut PageTable, sz: usize) {
    if sz > 0 {
        uvmunmap(pagetable, 0, PGROUNDUP!(sz) / PGSIZE, true);
    }
    freewalk(pagetable);
}

// Given a parent process's page table, copy its memory into a child's
// page table. Every present page in the parent is given a freshly
// allocated physical frame in the child; the child never aliases the
// parent's frame. Mappings made before a failure are torn down so the
// child is left with no partial state.
pub fn uvmcopy(old: &mut PageTable, new: &mut PageTable, sz: usize) -> i32 {
    let mut i = 0;
    while i < sz {
        let pte = walk_lookup(old, i);
        if pte == 0 {
            panic!("uvmcopy: pte should exist");
        }
        if pte & PTE_V == 0 {
            panic!("uvmcopy: page not present");
        }

        let pa = PTE2PA!(pte);
        let flags = PTE_FLAGS!(pte);

        let mem: *mut u8 = unsafe { KMEM.kalloc() };
        if mem.is_null() {
            uvmunmap(new, 0, i / PGSIZE, true);
            return -1;
        }
        memmove(mem, pa as *const u8, PGSIZE);

        if map_page(new, i, mem.expose_addr(), flags) != 0 {
            unsafe { KMEM.kfree(mem) };
            uvmunmap(new, 0, i / PGSIZE, true);
            return -1;
        }

        i += PGSIZE;
    }

    0
}

// Copy from kernel to user: copy len bytes from src to virtual address
// dstva in pagetable, crossing page boundaries as necessary. Fails if
// any destination page's leaf lacks the W permission bit.
pub fn copyout(pagetable: &mut PageTable, dstva: usize, src: *const u8, len: u64) -> i32 {
    let mut dstva = dstva;
    let mut src = src;
    let mut remaining = len;

    while remaining > 0 {
        let va0 = PGROUNDDOWN!(dstva);
        let pte = walk_lookup(pagetable, va0);
        if pte == 0 || pte & PTE_V == 0 || pte & PTE_U == 0 || pte & PTE_W == 0 {
            return -1;
        }
        let pa0 = PTE2PA!(pte);

        let mut n = (PGSIZE - (dstva - va0)) as u64;
        if n > remaining {
            n = remaining;
        }

        let dst = (pa0 + (dstva - va0)) as *mut u8;
        memmove(dst, src, n as usize);

        remaining -= n;
        unsafe { src = src.add(n as usize); }
        dstva = va0 + PGSIZE;
    }

    0
}

// Copy from user to kernel: copy len bytes from virtual address srcva
// in pagetable into dst.
pub fn copyin(pagetable: &mut PageTable, dst: *mut u8, srcva: usize, len: u64) -> i32 {
    let mut srcva = srcva;
    let mut dst = dst;
    let mut remaining = len;

    while remaining > 0 {
        let va0 = PGROUNDDOWN!(srcva);
        let pa0 = walkaddr(pagetable, va0);
        if pa0 == 0 {
            return -1;
        }

        let mut n = (PGSIZE - (srcva - va0)) as u64;
        if n > remaining {
            n = remaining;
        }

        let src = (pa0 + (srcva - va0)) as *const u8;
        memmove(dst, src, n as usize);

        remaining -= n;
        unsafe { dst = dst.add(n as usize); }
        srcva = va0 + PGSIZE;
    }

    0
}

// Copy a NUL-terminated string from user to kernel, stopping at the
// first NUL or after max bytes. Returns 0 on success, -1 if the string
// is not NUL-terminated within max bytes or a page along the way is
// unmapped.
pub fn copyinstr(pagetable: &mut PageTable, dst: *mut u8, srcva: usize, max: u64) -> i32 {
    let mut srcva = srcva;
    let mut dst = dst;
    let mut got_null = false;
    let mut max = max;

    while !got_null && max > 0 {
        let va0 = PGROUNDDOWN!(srcva);
        let pa0 = walkaddr(pagetable, va0);
        if pa0 == 0 {
            return -1;
        }

        let mut n = (PGSIZE - (srcva - va0)) as u64;
        if n > max {
            n = max;
        }

        let mut p = (pa0 + (srcva - va0)) as *const u8;
        for _ in 0..n {
            let c = unsafe { p.read() };
            unsafe { dst.write(c) };
            if c == 0 {
                got_null = true;
                break;
            }
            max -= 1;
            unsafe {
                p = p.add(1);
                dst = dst.add(1);
            }
        }

        srcva = va0 + PGSIZE;
    }

    if got_null {
        0
    } else {
        -1
    }
}

// Copy len bytes to either a user or kernel destination, chosen by
// is_user_dst. len is an explicit u64 throughout so the byte count is
// never silently narrowed.
pub fn either_copyout(is_user_dst: bool, dst: usize, src: *const u8, len: u64) -> i32 {
    if is_user_dst {
        let p = myproc();
        copyout(p.pagetable.as_deref_mut().unwrap(), dst, src, len)
    } else {
        memmove(dst as *mut u8, src, len as usize);
        0
    }
}

// Copy len bytes from either a user or kernel source, chosen by
// is_user_src. len is an explicit u64 throughout so the byte count is
// never silently narrowed.
pub fn either_copyin(dst: *mut u8, is_user_src: bool, src: usize, len: u64) -> i32 {
    if is_user_src {
        let p = myproc();
        copyin(unsafe { p.pagetable.unwrap() }, dst, src, len)
    } else {
        memmove(dst, src as *const u8, len as usize);
        0
    }
}
