use core::arch::asm;

use crate::kmain;
use crate::param::*;
use crate::riscv::*;

#[repr(C, align(16))]
pub(crate) struct Stack0Aligned([u8; 4096 * NCPU]);
pub(crate) static stack0: Stack0Aligned = Stack0Aligned([0; 4096 * NCPU]);

#[no_mangle]
extern "C" fn start() {
    // set M Previous Privilege mode to Supervisor, for mret.
    let mut x = r_mstatus();
    x &= !MSTATUS_MPP_MASK;
    x |= MSTATUS_MPP_S;
    w_mstatus(x);

    // set M Exception Program Counter to main, for mret.
    // requires gcc -mcmodel=medany
    w_mepc(kmain as usize);

    // disable paging for now.
    w_satp(0);

    // delegate all interrupts and exceptions to supervisor mode.
    w_medeleg(0xffff);
    w_mideleg(0xffff);
    w_sie(r_sie() | SIE_SEIE | SIE_STIE | SIE_SSIE);

    // configure Physical Memory Protection to give supervisor mode
    // access to all of physical memory.
    w_pmpaddr0(0x3ffffffffffff);
    w_pmpcfg0(0xf);

    // ask for clock interrupts, delivered straight to supervisor mode.
    timerinit();

    // keep each CPU's hartid in its tp register, for cpuid().
    let id = r_mhartid();
    w_tp(id);

    // switch to supervisor mode and jump to main().
    unsafe { asm!("mret") }
}

// Arm the first supervisor timer interrupt via the Sstc extension: once
// menvcfg.STCE is set, stimecmp is a supervisor-mode CSR and a timer
// interrupt (scause 0x8000000000000005) is delivered directly to
// kerneltrap/usertrap with no machine-mode forwarding required.
fn timerinit() {
    // let supervisor mode read the `time` CSR and access stimecmp.
    w_mcounteren(r_mcounteren() | MCOUNTEREN_TM);
    w_menvcfg(r_menvcfg() | MENVCFG_STCE);

    w_stimecmp(r_time() + TIMER_INTERVAL);
}
