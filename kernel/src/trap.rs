use crate::MAKE_SATP;
use crate::memlayout::{TRAMPOLINE, UART0_IRQ, VIRTIO0_IRQ};
use crate::plic::{plic_claim, plic_complete};
use crate::printf;
use crate::proc::{
    cpuid, current_proc_running, exit, handle_page_fault, killed, myproc, proc_yield, setkilled,
    wakeup,
};
use crate::param::TIMER_INTERVAL;
use crate::riscv::{
    intr_get, intr_off, intr_on, r_satp, r_scause, r_sepc, r_sstatus, r_stval, r_time, r_tp,
    w_sepc, w_sstatus, w_stimecmp, w_stvec, PageTable, PGSIZE, SSTATUS_SPIE, SSTATUS_SPP,
};
use crate::spinlock::Spinlock;
use crate::uart::UART_INSTANCE;
use crate::virtio::virtio_disk::virtio_disk_intr;

static mut TICKS_LOCK: Option<Spinlock> = None;
static mut TICKS: u32 = 0;

// in kernelvec.S, calls kerneltrap().
extern {
    static kernelvec: u8;
    static trampoline: u8;
    static uservec: u8;
    static userret: u8;
}

// Number of distinct PLIC irq numbers this platform raises (UART, virtio).
const NIRQ: usize = 16;
// scause values routed through the fault-handler table, indexed directly
// by scause (2 = illegal instruction, 13/15 = load/store page fault).
const NFAULT: usize = 16;

// A small dispatch table, registered at init time, mirroring the way
// plic_claim()'d irqs and user-mode faults are routed to a handler.
// Both tables default every slot to the builtin behavior and let a
// caller override a slot with register_irq_handler/register_fault_handler.
static mut IRQ_HANDLERS: [Option<fn(u32)>; NIRQ] = [None; NIRQ];
static mut FAULT_HANDLERS: [Option<fn(&mut crate::proc::Proc, usize) -> bool>; NFAULT] =
    [None; NFAULT];

fn default_uart_irq(_irq: u32) {
    unsafe { UART_INSTANCE.intr(); }
}

fn default_virtio_irq(_irq: u32) {
    virtio_disk_intr();
}

// Default page-fault handler: grow the zero-fill heap on demand. Returns
// true if the fault was resolved.
fn default_page_fault(p: &mut crate::proc::Proc, va: usize) -> bool {
    handle_page_fault(p, va) >= 0
}

// Default illegal-instruction handler: always unresolved, caller kills.
fn default_illegal_instr(_p: &mut crate::proc::Proc, _va: usize) -> bool {
    false
}

// Register a handler for a PLIC irq number, overriding the builtin if
// one is installed for that slot. Intended to be called during device
// init, before interrupts are enabled on any hart.
pub fn register_irq_handler(irq: usize, handler: fn(u32)) {
    unsafe {
        if irq < NIRQ {
            IRQ_HANDLERS[irq] = Some(handler);
        }
    }
}

// Register a handler for a user-mode fault scause code, overriding the
// builtin default (which marks the process killed).
pub fn register_fault_handler(scause: usize, handler: fn(&mut crate::proc::Proc, usize) -> bool) {
    unsafe {
        if scause < NFAULT {
            FAULT_HANDLERS[scause] = Some(handler);
        }
    }
}

pub fn trapinit() {
    unsafe {
        TICKS_LOCK = Some(Spinlock::init_lock("time"));
        IRQ_HANDLERS[UART0_IRQ] = Some(default_uart_irq);
        IRQ_HANDLERS[VIRTIO0_IRQ] = Some(default_virtio_irq);
        FAULT_HANDLERS[2] = Some(default_illegal_instr);
        FAULT_HANDLERS[13] = Some(default_page_fault);
        FAULT_HANDLERS[15] = Some(default_page_fault);
    }
}

// set up to take exceptions and traps while in the kernel.
pub fn trapinithart() {
    w_stvec((unsafe { &kernelvec } as *const u8).expose_addr());
}

//
// handle an interrupt, exception, or system call from user space.
// called from trampoline.S
//
#[no_mangle]
extern "C" fn usertrap() {
    if (r_sstatus() & SSTATUS_SPP) != 0 {
        panic!("usertrap: not from user mode");
    }

    // send interrupts and exceptions to kerneltrap(),
    // since we're now in the kernel.
    w_stvec((unsafe { &kernelvec } as *const u8).expose_addr());

    let p = myproc();

    // save user program counter.
    unsafe {
        p.trapframe.unwrap().as_mut().unwrap().epc = r_sepc() as u64;
    }

    let scause = r_scause();
    if scause == 8 {
        // system call

        if killed(p) {
            exit(-1);
        }

        // sepc points to the ecall instruction, but we want to return
        // to the next instruction.
        unsafe {
            let tf = p.trapframe.unwrap().as_mut().unwrap();
            tf.epc += 4;
        }

        // an interrupt will change sepc, scause, and sstatus, so enable
        // only now that we're done with those registers.
        intr_on();

        crate::syscall::syscall();
    } else if (scause as usize) < NFAULT && unsafe { FAULT_HANDLERS[scause as usize].is_some() } {
        let va = r_stval() as usize;
        let handler = unsafe { FAULT_HANDLERS[scause as usize].unwrap() };
        if !handler(p, va) {
            printf!(
                "usertrap(): unresolved fault scause={:#x} stval={:#x} pid={}\n",
                scause,
                va,
                p.pid
            );
            setkilled(p);
        }
    } else if let Some(which_dev) = devintr(scause) {
        if which_dev == 2 {
            proc_yield();
        }
    } else {
        let stval = r_stval();
        printf!(
            "usertrap(): unexpected scause {:#x} pid={}\n",
            scause,
            p.pid
        );
        printf!("            sepc={:#x} stval={:#x}\n", r_sepc(), stval);
        setkilled(p);
    }

    if killed(p) {
        exit(-1);
    }

    usertrapret();
}

//
// return to user space
//
pub fn usertrapret() {
    let p = myproc();

    // we're about to switch the destination of traps from
    // kerneltrap() to usertrap(), so turn off interrupts until
    // we're back in user space, where usertrap() is correct.
    intr_off();

    // send syscalls, interrupts, and exceptions to uservec in trampoline.S
    let uservec_addr = (unsafe { &uservec } as *const u8).expose_addr();
    let trampoline_addr = (unsafe { &trampoline } as *const u8).expose_addr();
    let trampoline_uservec = TRAMPOLINE + uservec_addr - trampoline_addr;
    w_stvec(trampoline_uservec);

    // set up trapframe values that uservec will need when
    // the process next traps into the kernel.

    let trapframe = unsafe { p.trapframe.unwrap().as_mut().unwrap() };
    trapframe.kernel_satp = r_satp() as u64;         // kernel page table
    trapframe.kernel_sp = (p.kstack + PGSIZE) as u64; // process's kernel stack
    trapframe.kernel_trap = usertrap as u64;
    trapframe.kernel_hartid = r_tp();         // hartid for cpuid()

    // set up the registers that trampoline.S's sret will use
    // to get to user space.

    // set S Previous Privilege mode to User.
    let mut x = r_sstatus();
    x &= !SSTATUS_SPP; // clear SPP to 0 for user mode
    x |= SSTATUS_SPIE; // enable interrupts in user mode
    w_sstatus(x);

    // set S Exception Program Counter to the saved user pc.
    w_sepc(trapframe.epc as usize);

    // tell trampoline.S the user page table to switch to.
    let satp = MAKE_SATP!((p.pagetable.unwrap() as *const PageTable).expose_addr());

    // jump to userret in trampoline.S at the top of memory, which
    // switches to the user page table, restores user registers,
    // and switches to user mode with sret.
    let userret_addr = (unsafe { &userret } as *const u8).expose_addr();
    let trampoline_userret = TRAMPOLINE + userret_addr - trampoline_addr;

    unsafe {
        let func = *(trampoline_userret as *const fn(stap: usize));
        func(satp);
    };
}

// interrupts and exceptions from kernel code go here via kernelvec,
// on whatever the current kernel stack is.
#[no_mangle]
extern "C" fn kerneltrap() {
    let sepc = r_sepc();
    let sstatus = r_sstatus();
    let scause = r_scause();

    if (sstatus & SSTATUS_SPP) == 0 {
        panic!("kerneltrap: not from supervisor mode");
    }
    if intr_get() {
        panic!("kerneltrap: interrupts enabled");
    }

    let which_dev = devintr(scause);
    if which_dev.is_none() {
        let stval = r_stval();
        printf!("scause {:#x}\n", scause);
        printf!(
            "sepc={:#x} stval={:#x}\n",
            r_sepc(),
            stval
        );
        panic!("kerneltrap");
    }

    // give up the CPU if this is a timer interrupt.
    if which_dev == Some(2) && current_proc_running() {
        proc_yield();
    }

    // the yield() may have caused some traps to occur,
    // so restore trap registers for use by kernelvec.S's sepc instruction.
    w_sepc(sepc);
    w_sstatus(sstatus);
}

// bumps the tick counter and wakes anyone sleeping on it. Only hart 0 calls
// this, so ticks stays a single global count rather than per-hart.
fn clockintr() {
    unsafe {
        TICKS_LOCK.as_mut().unwrap().acquire();
        TICKS += 1;
        wakeup(&TICKS as *const u32 as *const u8);
        TICKS_LOCK.as_mut().unwrap().release();
    }

    // request the next tick; this also clears the pending interrupt.
    w_stimecmp(r_time() + TIMER_INTERVAL);
}

// check if it's an external interrupt or a supervisor timer interrupt,
// and handle it.
// returns:
//   None    not recognized
//   Some(1) external device interrupt (PLIC: uart, virtio)
//   Some(2) supervisor timer interrupt (Sstc stimecmp)
fn devintr(scause: u64) -> Option<i32> {
    if scause == 0x8000000000000009 {
        // this is a supervisor external interrupt, via PLIC.

        // irq indicates which device interrupted.
        let irq = plic_claim();

        let handler = if (irq as usize) < NIRQ {
            unsafe { IRQ_HANDLERS[irq as usize] }
        } else {
            None
        };
        match handler {
            Some(h) => h(irq),
            None if irq != 0 => printf!("unexpected interrupt irq={}\n", irq),
            None => {}
        }

        // the PLIC allows each device to raise at most one
        // interrupt at a time; tell the PLIC the device is
        // now allowed to interrupt again.
        if irq != 0 {
            plic_complete(irq);
        }
        Some(1)
    } else if scause == 0x8000000000000005 {
        // supervisor timer interrupt (Sstc): stimecmp <= time. Only hart 0
        // bumps ticks; every hart rearms stimecmp, which is also how the
        // pending interrupt is acknowledged.
        if cpuid() == 0 {
            clockintr();
        } else {
            w_stimecmp(r_time() + TIMER_INTERVAL);
        }
        Some(2)
    } else {
        None
    }
}
