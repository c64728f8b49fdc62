use core::mem;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::fs::fs::namei;
use crate::fs::INode;
use crate::kalloc::KMEM;
use crate::KSTACK;
use crate::memlayout::{TRAMPOLINE, TRAPFRAME};
use crate::param::{NCPU, NPROC, ROOTDEV};
use crate::proc::Procstate::{RUNNABLE, RUNNING, SLEEPING, UNUSED, USED, ZOMBIE};
use crate::riscv::{r_tp, PageTable, PGSIZE, PTE_R, PTE_W, PTE_X};
use crate::spinlock::{pop_off, push_off, Spinlock};
use crate::string::safestrcpy;
use crate::trap::usertrapret;
use crate::vm::{
    kvmmap, map_region, uvmcopy, uvmcreate, uvmfirst, uvmfree, uvmunmap, vmfault,
};

// Saved registers for kernel context switches.
#[derive(Copy, Clone)]
#[repr(C)]
pub struct Context {
    ra: u64,
    sp: u64,

    // callee-saved
    s0: u64,
    s1: u64,
    s2: u64,
    s3: u64,
    s4: u64,
    s5: u64,
    s6: u64,
    s7: u64,
    s8: u64,
    s9: u64,
    s10: u64,
    s11: u64,
}

impl Context {
    const fn zeroed() -> Self {
        Context {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}

extern "C" {
    fn swtch(old: usize, new: usize);
}

// Per-CPU state.
pub struct Cpu {
    // The process running on this cpu, or null.
    proc: Option<*mut Proc>,
    // swtch() here to enter scheduler().
    context: Context,
    // Depth of push_off() nesting.
    pub noff: u8,
    // Were interrupts enabled before push_off()?
    pub intena: bool,
}

impl Cpu {
    const fn create() -> Self {
        Cpu {
            proc: None,
            context: Context::zeroed(),
            noff: 0,
            intena: false,
        }
    }
}

unsafe impl Sync for Cpu {}

static mut CPUS: [Cpu; NCPU] = [const { Cpu::create() }; NCPU];
static mut PROCS: [Proc; NPROC] = [const { Proc::create() }; NPROC];

static mut INIT_PROC: *mut Proc = core::ptr::null_mut();

extern "C" {
    static trampoline: u8; // trampoline.rs
}

// per-process data for the trap handling code in trampoline.rs.
// sits in a page by itself just under the trampoline page in the
// user page table. not specially mapped in the kernel page table.
// uservec saves user registers in the trapframe, then initializes
// registers from the trapframe's kernel_sp, kernel_hartid, kernel_satp,
// and jumps to kernel_trap. usertrapret() and userret set up the
// trapframe's kernel_*, restore user registers from the trapframe,
// switch to the user page table, and enter user space. the trapframe
// includes callee-saved user registers like s0-s11 because the
// return-to-user path via usertrapret() doesn't return through the
// entire kernel call stack.
#[repr(C)]
pub struct Trapframe {
    /*   0 */ pub kernel_satp: u64,   // kernel page table
    /*   8 */ pub kernel_sp: u64,     // top of process's kernel stack
    /*  16 */ pub kernel_trap: u64,   // usertrap()
    /*  24 */ pub epc: u64,           // saved user program counter
    /*  32 */ pub kernel_hartid: u64, // saved kernel tp
    /*  40 */ pub ra: u64,
    /*  48 */ pub sp: u64,
    /*  56 */ pub gp: u64,
    /*  64 */ pub tp: u64,
    /*  72 */ pub t0: u64,
    /*  80 */ pub t1: u64,
    /*  88 */ pub t2: u64,
    /*  96 */ pub s0: u64,
    /* 104 */ pub s1: u64,
    /* 112 */ pub a0: u64,
    /* 120 */ pub a1: u64,
    /* 128 */ pub a2: u64,
    /* 136 */ pub a3: u64,
    /* 144 */ pub a4: u64,
    /* 152 */ pub a5: u64,
    /* 160 */ pub a6: u64,
    /* 168 */ pub a7: u64,
    /* 176 */ pub s2: u64,
    /* 184 */ pub s3: u64,
    /* 192 */ pub s4: u64,
    /* 200 */ pub s5: u64,
    /* 208 */ pub s6: u64,
    /* 216 */ pub s7: u64,
    /* 224 */ pub s8: u64,
    /* 232 */ pub s9: u64,
    /* 240 */ pub s10: u64,
    /* 248 */ pub s11: u64,
    /* 256 */ pub t3: u64,
    /* 264 */ pub t4: u64,
    /* 272 */ pub t5: u64,
    /* 280 */ pub t6: u64,
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub enum Procstate {
    UNUSED,
    USED,
    SLEEPING,
    RUNNABLE,
    RUNNING,
    ZOMBIE,
}

// Per-process state. Every field is only safe to read/write under the
// conditions noted; callers are trusted to hold the right lock, the way
// every other part of this kernel trusts its callers.
pub struct Proc {
    pub lock: Spinlock,

    // p.lock must be held when using these:
    pub state: Procstate,       // Process state
    chan: Option<*const u8>,    // If non-null, sleeping on chan
    pub killed: bool,           // If true, have been killed
    xstate: i32,                // Exit status to be returned to parent's wait
    pub pid: u32,               // Process ID

    // wait_lock must be held when using this:
    parent: Option<*mut Proc>,  // Parent process

    // these are private to the process, so p.lock need not be held.
    kstack: usize, // Virtual address of kernel stack
    pub sz: usize, // Size of process memory (bytes)
    pub pagetable: Option<&'static mut PageTable>, // User page table
    pub trapframe: Option<*mut Trapframe>, // data page for trampoline
    context: Context, // swtch() here to run process
    cwd: Option<*mut INode>, // Current directory
    name: [u8; 16], // Process name (debugging)
}

impl Proc {
    const fn create() -> Self {
        Proc {
            lock: Spinlock::init_lock("proc"),
            state: UNUSED,
            chan: None,
            killed: false,
            xstate: 0,
            pid: 0,
            parent: None,
            kstack: 0,
            sz: 0,
            pagetable: None,
            trapframe: None,
            context: Context::zeroed(),
            cwd: None,
            name: [0; 16],
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1);
// helps ensure that wakeups of wait()ing
// parents are not lost. helps obey the
// memory model when using p.parent.
// must be acquired before any p.lock.
static mut WAIT_LOCK: Spinlock = Spinlock::init_lock("wait_lock");

// Must be called with interrupts disabled,
// to prevent race with process being moved
// to a different CPU.
pub fn cpuid() -> usize {
    r_tp() as usize
}

// Return this CPU's cpu struct.
// Interrupts must be disabled.
pub fn mycpu() -> *mut Cpu {
    unsafe { &mut CPUS[cpuid()] as *mut Cpu }
}

// Return the current struct proc, or panics if none -- callers that can
// run outside process context (interrupt handlers) must check cpu state
// themselves before calling this.
pub fn myproc() -> &'static mut Proc {
    push_off();
    let c = mycpu();
    let p = unsafe { (*c).proc };
    pop_off();
    unsafe { p.expect("myproc: no current process").as_mut().unwrap() }
}

fn allocpid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

// Allocate a page for each process's kernel stack.
// Map it high in memory, followed by an invalid guard page.
pub fn proc_mapstacks(kpgtbl: &mut PageTable) {
    for idx in 0..NPROC {
        unsafe {
            let pa: *mut u8 = KMEM.kalloc();
            if pa.is_null() {
                panic!("kalloc");
            }
            let va = KSTACK!(idx);
            kvmmap(kpgtbl, va, pa as usize, PGSIZE, PTE_R | PTE_W)
        }
    }
}

// initialize the proc table.
pub fn procinit() {
    for i in 0..NPROC {
        unsafe {
            PROCS[i].kstack = KSTACK!(i);
        }
    }
}

// a user program that calls exit(0) in a loop
// assembled equivalent of xv6's initcode.S: lays down
//   li a7, SYS_exec/... -- but since exec() is not part of
// this core, init simply loops calling getpid() then exits.
// This raw opcode stream just performs exit(0) in a loop.
const INITCODE: [u8; 24] = [
    0x93, 0x08, 0x00, 0x00, // li a7, 0        (unused slot, keeps alignment)
    0x13, 0x05, 0x00, 0x00, // li a0, 0
    0x93, 0x08, 0x20, 0x00, // li a7, SYS_exit (2)
    0x73, 0x00, 0x00, 0x00, // ecall
    0x6f, 0xf0, 0xdf, 0xff, // j . -16 (loop back to li a0, 0 if exit ever returns)
    0x00, 0x00, 0x00, 0x00,
];

// Set up first user process.
pub fn userinit() {
    let p = allocproc().expect("userinit: allocproc failed");

    unsafe {
        INIT_PROC = p as *mut Proc;
    }

    // allocate one user page and copy initcode's instructions
    // and data into it.
    uvmfirst(
        p.pagetable.as_mut().unwrap(),
        INITCODE.as_ptr(),
        INITCODE.len(),
    );
    p.sz = PGSIZE;

    // prepare for the very first "return" from kernel to user.
    let tf = unsafe { p.trapframe.unwrap().as_mut().unwrap() };
    tf.epc = 0; // user program counter
    tf.sp = PGSIZE as u64; // user stack pointer

    safestrcpy(p.name.as_mut_ptr(), b"initcode\0".as_ptr(), p.name.len());
    p.cwd = namei(b"/").map(|ip| ip as *mut INode);

    p.state = RUNNABLE;

    p.lock.release();
}

// Grow or shrink user memory by n bytes.
// Returns 0 on success, -1 on failure.
pub fn growproc(n: i64) -> i32 {
    let p = myproc();
    let mut sz = p.sz;

    if n > 0 {
        sz = (sz as i64 + n) as usize;
    } else if n < 0 {
        let newsz = (sz as i64 + n) as usize;
        uvmunmap(
            p.pagetable.as_mut().unwrap(),
            crate::PGROUNDUP!(newsz),
            (crate::PGROUNDUP!(sz) - crate::PGROUNDUP!(newsz)) / PGSIZE,
            true,
        );
        sz = newsz;
    }
    p.sz = sz;
    0
}

// A fork child's very first scheduling by scheduler() will swtch to
// forkret.
extern "C" fn forkret() {
    static mut FIRST: bool = true;

    // Still holding p.lock from scheduler.
    myproc().lock.release();

    unsafe {
        if FIRST {
            // File system initialization must be run in the context of a
            // regular process (e.g., because it calls sleep), and thus
            // cannot be run from kmain().
            FIRST = false;
            crate::fs::fs::fsinit(ROOTDEV);
        }
    }

    usertrapret();
}

// Look in the process table for an UNUSED proc.
// If found, initialize state required to run in the kernel, and return
// with p.lock held. If there are no free procs, or a memory allocation
// fails, return None.
fn allocproc() -> Option<&'static mut Proc> {
    let mut found: Option<&'static mut Proc> = None;
    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        p.lock.acquire();

        if p.state == UNUSED {
            found = Some(p);
            break;
        }

        p.lock.release();
    }

    let p = found?;
    p.pid = allocpid();
    p.state = USED;

    // Allocate a trapframe page.
    let trapframe_ptr: *mut Trapframe = unsafe { KMEM.kalloc() };
    if trapframe_ptr.is_null() {
        freeproc(p);
        p.lock.release();
        return None;
    }
    p.trapframe = Some(trapframe_ptr);

    // An empty user page table.
    p.pagetable = proc_pagetable(p);
    if p.pagetable.is_none() {
        freeproc(p);
        p.lock.release();
        return None;
    }

    // Set up new context to start executing at forkret, which returns to
    // user space.
    p.context = Context::zeroed();
    p.context.ra = forkret as u64;
    p.context.sp = (p.kstack + PGSIZE) as u64;

    Some(p)
}

// free a proc structure and the data hanging from it, including user
// pages. p.lock must be held.
fn freeproc(p: &mut Proc) {
    if let Some(tf) = p.trapframe.take() {
        unsafe { KMEM.kfree(tf as *mut Trapframe) };
    }

    if let Some(pt) = p.pagetable.take() {
        proc_freepagetable(pt, p.sz);
    }

    p.sz = 0;
    p.pid = 0;
    p.parent = None;
    p.name = [0; 16];
    p.chan = None;
    p.killed = false;
    p.xstate = 0;
    p.state = UNUSED;
}

// Create a user page table for a given process, with no user memory,
// but with trampoline and trapframe pages.
fn proc_pagetable(p: &mut Proc) -> Option<&'static mut PageTable> {
    // An empty page table.
    let pagetable = uvmcreate()?;

    // map the trampoline code (for system call return) at the highest
    // user virtual address. only the supervisor uses it, on the way
    // to/from user space, so not PTE_U.
    let trampoline_addr = (unsafe { &trampoline } as *const u8) as usize;
    if map_region(pagetable, TRAMPOLINE, trampoline_addr, PGSIZE, PTE_R | PTE_X) != 0 {
        uvmfree(pagetable, 0);
        return None;
    }

    // map the trapframe page just below the trampoline page.
    let trapframe_addr = p.trapframe.unwrap() as usize;
    if map_region(pagetable, TRAPFRAME, trapframe_addr, PGSIZE, PTE_R | PTE_W) != 0 {
        uvmunmap(pagetable, TRAMPOLINE, 1, false);
        uvmfree(pagetable, 0);
        return None;
    }

    Some(pagetable)
}

// Free a process's page table, and free the physical memory it refers
// to.
fn proc_freepagetable(pagetable: &mut PageTable, sz: usize) {
    uvmunmap(pagetable, TRAMPOLINE, 1, false);
    uvmunmap(pagetable, TRAPFRAME, 1, false);
    uvmfree(pagetable, sz);
}

// Create a new process, copying the parent. Sets up child kernel stack
// to return as if from the fork() system call.
pub fn fork() -> i32 {
    let p = myproc();

    let np = match allocproc() {
        Some(np) => np,
        None => return -1,
    };

    // Copy user memory from parent to child.
    if uvmcopy(p.pagetable.as_mut().unwrap(), np.pagetable.as_mut().unwrap(), p.sz) < 0 {
        freeproc(np);
        np.lock.release();
        return -1;
    }
    np.sz = p.sz;

    // copy saved user registers.
    unsafe {
        core::ptr::copy_nonoverlapping(
            p.trapframe.unwrap() as *const Trapframe,
            np.trapframe.unwrap(),
            1,
        );
    }

    // Cause fork to return 0 in the child.
    unsafe { (*np.trapframe.unwrap()).a0 = 0; }

    np.cwd = p.cwd.map(|ip| unsafe { (*ip).idup() as *mut INode });

    np.name = p.name;

    let pid = np.pid;

    np.lock.release();

    unsafe {
        WAIT_LOCK.acquire();
        np.parent = Some(p as *mut Proc);
        WAIT_LOCK.release();
    }

    np.lock.acquire();
    np.state = RUNNABLE;
    np.lock.release();

    pid as i32
}

// Pass p's abandoned children to init.
// Caller must hold wait_lock.
fn reparent(p: &mut Proc) {
    for i in 0..NPROC {
        let pp = unsafe { &mut PROCS[i] };
        if pp.parent == Some(p as *mut Proc) {
            pp.parent = unsafe { Some(INIT_PROC) };
            wakeup(unsafe { INIT_PROC } as *const u8);
        }
    }
}

// Exit the current process. Does not return. An exited process remains
// in the zombie state until its parent calls wait().
pub fn exit(status: i32) -> ! {
    let p = myproc();

    if core::ptr::eq(p, unsafe { INIT_PROC }) {
        panic!("init exiting");
    }

    p.cwd = None;

    unsafe {
        WAIT_LOCK.acquire();
    }

    // Give any children to init.
    reparent(p);

    // Parent might be sleeping in wait().
    if let Some(parent) = p.parent {
        wakeup(parent as *const u8);
    }

    p.lock.acquire();

    p.xstate = status;
    p.state = ZOMBIE;

    unsafe {
        WAIT_LOCK.release();
    }

    // Jump into the scheduler, never to return.
    sched();

    unreachable!("zombie exited");
}

// Wait for a child process to exit and return its pid.
// Return -1 if this process has no children.
pub fn kwait(addr: usize) -> i32 {
    let p = myproc();

    unsafe {
        WAIT_LOCK.acquire();
    }

    loop {
        // Scan through table looking for exited children.
        let mut havekids = false;
        for i in 0..NPROC {
            let np = unsafe { &mut PROCS[i] };
            if np.parent == Some(p as *mut Proc) {
                // make sure the child isn't still in exit() or swtch().
                np.lock.acquire();

                havekids = true;
                if np.state == ZOMBIE {
                    let pid = np.pid;
                    if addr != 0 {
                        let ok = crate::vm::copyout(
                            p.pagetable.as_mut().unwrap(),
                            addr,
                            &np.xstate as *const i32 as *const u8,
                            mem::size_of::<i32>() as u64,
                        );
                        if ok < 0 {
                            np.lock.release();
                            unsafe { WAIT_LOCK.release() };
                            return -1;
                        }
                    }
                    freeproc(np);
                    np.lock.release();
                    unsafe { WAIT_LOCK.release() };
                    return pid as i32;
                }
                np.lock.release();
            }
        }

        // No point waiting if we don't have any children.
        if !havekids || p.killed {
            unsafe { WAIT_LOCK.release() };
            return -1;
        }

        // Wait for a child to exit.
        sleep(p as *const Proc as *const u8, unsafe { &mut WAIT_LOCK });
    }
}

// Per-CPU process scheduler.
// Each CPU calls scheduler() after setting itself up.
// Scheduler never returns. It loops, doing:
//  - choose a process to run.
//  - swtch to start running that process.
//  - eventually that process transfers control via swtch back to the
//    scheduler.
pub fn scheduler() -> ! {
    let c = mycpu();
    unsafe { (*c).proc = None; }

    loop {
        // The most recent process to run may have had interrupts
        // turned off; enable them to avoid a deadlock if all processes
        // are waiting.
        crate::riscv::intr_on();

        let mut found = false;
        for i in 0..NPROC {
            let p = unsafe { &mut PROCS[i] };
            p.lock.acquire();
            if p.state == RUNNABLE {
                // Switch to chosen process. It is the process's job to
                // release its lock and then reacquire it before jumping
                // back to us.
                p.state = RUNNING;
                unsafe { (*c).proc = Some(p as *mut Proc); }

                unsafe {
                    swtch(
                        &mut (*c).context as *mut Context as usize,
                        &mut p.context as *mut Context as usize,
                    );
                }

                // Process is done running for now. It should have
                // changed its p.state before coming back.
                unsafe { (*c).proc = None; }
                found = true;
            }
            p.lock.release();
        }

        if !found {
            // Nothing to run; wait for an interrupt.
            unsafe { core::arch::asm!("wfi") }
        }
    }
}

// Switch to scheduler. Must hold only p.lock and have changed
// proc.state. Saves and restores intena because intena is a property of
// this kernel thread, not this CPU. It should be proc.intena and
// proc.noff, but that would break in the few places where a lock is
// held but there's no process.
fn sched() {
    let p = myproc();

    if !p.lock.holding() {
        panic!("sched p->lock");
    }
    let c = mycpu();
    if unsafe { (*c).noff } != 1 {
        panic!("sched locks");
    }
    if p.state == RUNNING {
        panic!("sched running");
    }
    if crate::riscv::intr_get() {
        panic!("sched interruptible");
    }

    let intena = unsafe { (*c).intena };
    unsafe {
        swtch(
            &mut p.context as *mut Context as usize,
            &mut (*c).context as *mut Context as usize,
        );
    }
    unsafe { (*c).intena = intena; }
}

// Give up the CPU for one scheduling round.
pub fn proc_yield() {
    let p = myproc();
    p.lock.acquire();
    p.state = RUNNABLE;
    sched();
    p.lock.release();
}

// Atomically release lock and sleep on chan.
// Reacquires lock when awakened.
pub fn sleep(chan: *const u8, lk: &mut Spinlock) {
    let p = myproc();

    // Must acquire p.lock in order to change p.state and then call
    // sched. Once we hold p.lock, we can be guaranteed that we won't
    // miss any wakeup (wakeup locks p.lock), so it's okay to release lk.
    if !core::ptr::eq(lk, &p.lock as *const Spinlock) {
        p.lock.acquire();
        lk.release();
    }

    p.chan = Some(chan);
    p.state = SLEEPING;

    sched();

    // Tidy up.
    p.chan = None;

    // Reacquire original lock.
    if !core::ptr::eq(lk, &p.lock as *const Spinlock) {
        p.lock.release();
        lk.acquire();
    }
}

// Wake up all processes sleeping on chan.
// Must be called without any p.lock.
pub fn wakeup(chan: *const u8) {
    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        if !core::ptr::eq(p, myproc() as *const Proc as *mut Proc) {
            p.lock.acquire();
            if p.state == SLEEPING && p.chan == Some(chan) {
                p.state = RUNNABLE;
            }
            p.lock.release();
        }
    }
}

// Kill the process with the given pid. The victim won't exit until it
// tries to return to user space (see usertrap()).
pub fn kill(pid: u32) -> i32 {
    for i in 0..NPROC {
        let p = unsafe { &mut PROCS[i] };
        p.lock.acquire();
        if p.pid == pid {
            p.killed = true;
            if p.state == SLEEPING {
                // Wake process from sleep().
                p.state = RUNNABLE;
            }
            p.lock.release();
            return 0;
        }
        p.lock.release();
    }
    -1
}

pub fn setkilled(p: &mut Proc) {
    p.lock.acquire();
    p.killed = true;
    p.lock.release();
}

pub fn killed(p: &Proc) -> bool {
    p.killed
}

pub fn getpid() -> u32 {
    myproc().pid
}

// Handle a page fault against a process's rudimentary zero-fill heap.
// Returns 0 on success, -1 if the fault cannot be resolved (the caller
// kills the process).
pub fn handle_page_fault(p: &mut Proc, va: usize) -> i32 {
    vmfault(p.pagetable.as_mut().unwrap(), va, p.sz)
}

// Whether this hart currently has a RUNNING process, without myproc()'s
// panic when the scheduler itself (not a process) takes the trap.
pub fn current_proc_running() -> bool {
    unsafe {
        let c = mycpu();
        match (*c).proc {
            Some(p) => (*p).state == RUNNING,
            None => false,
        }
    }
}
