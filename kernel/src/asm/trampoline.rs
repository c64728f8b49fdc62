use core::arch::naked_asm;

use crate::memlayout::TRAPFRAME;

// Low-level code to handle traps from user space into the kernel, and
// returns from kernel to user.
//
// The kernel maps the page holding this code at the same virtual address
// (TRAMPOLINE) in user and kernel space so it continues to work when the
// hart switches page tables.
//
// kernel.ld places this code at a page boundary so it can be mapped as a
// single page independent of whatever lives around it in the binary.

// trap.rs sets stvec to point here, so traps from user space start here in
// supervisor mode, but still with the user page table. uservec switches to
// the kernel page table before jumping to usertrap().
//
// There is exactly one scratch CSR (sscratch) to work with; it holds the
// user's a0 while a0 itself is repurposed to point at the trapframe.
#[no_mangle]
#[naked]
#[link_section = ".text.trampoline"]
pub unsafe extern "C" fn uservec() -> ! {
    naked_asm!(
        "csrw sscratch, a0",
        "li a0, {tf}",

        "sd ra, 40(a0)",
        "sd sp, 48(a0)",
        "sd gp, 56(a0)",
        "sd tp, 64(a0)",
        "sd t0, 72(a0)",
        "sd t1, 80(a0)",
        "sd t2, 88(a0)",
        "sd s0, 96(a0)",
        "sd s1, 104(a0)",
        "sd a1, 120(a0)",
        "sd a2, 128(a0)",
        "sd a3, 136(a0)",
        "sd a4, 144(a0)",
        "sd a5, 152(a0)",
        "sd a6, 160(a0)",
        "sd a7, 168(a0)",
        "sd s2, 176(a0)",
        "sd s3, 184(a0)",
        "sd s4, 192(a0)",
        "sd s5, 200(a0)",
        "sd s6, 208(a0)",
        "sd s7, 216(a0)",
        "sd s8, 224(a0)",
        "sd s9, 232(a0)",
        "sd s10, 240(a0)",
        "sd s11, 248(a0)",
        "sd t3, 256(a0)",
        "sd t4, 264(a0)",
        "sd t5, 272(a0)",
        "sd t6, 280(a0)",

        "csrr t0, sscratch",
        "sd t0, 112(a0)",

        "ld sp, 8(a0)",
        "ld tp, 32(a0)",
        "ld t0, 16(a0)",
        "ld t1, 0(a0)",

        "sfence.vma zero, zero",
        "csrw satp, t1",
        "sfence.vma zero, zero",

        "jr t0",

        tf = const TRAPFRAME,
    );
}

// called by usertrapret() in trap.rs to switch from kernel to user.
// a0 holds the user page table to install; usertrapret() has already
// populated the trapframe and set sstatus/sepc for the return.
#[no_mangle]
#[naked]
#[link_section = ".text.trampoline"]
pub unsafe extern "C" fn userret(_page_table: usize) -> ! {
    naked_asm!(
        "sfence.vma zero, zero",
        "csrw satp, a0",
        "sfence.vma zero, zero",

        "li a0, {tf}",

        "ld ra, 40(a0)",
        "ld sp, 48(a0)",
        "ld gp, 56(a0)",
        "ld tp, 64(a0)",
        "ld t0, 72(a0)",
        "ld t1, 80(a0)",
        "ld t2, 88(a0)",
        "ld s0, 96(a0)",
        "ld s1, 104(a0)",
        "ld a1, 120(a0)",
        "ld a2, 128(a0)",
        "ld a3, 136(a0)",
        "ld a4, 144(a0)",
        "ld a5, 152(a0)",
        "ld a6, 160(a0)",
        "ld a7, 168(a0)",
        "ld s2, 176(a0)",
        "ld s3, 184(a0)",
        "ld s4, 192(a0)",
        "ld s5, 200(a0)",
        "ld s6, 208(a0)",
        "ld s7, 216(a0)",
        "ld s8, 224(a0)",
        "ld s9, 232(a0)",
        "ld s10, 240(a0)",
        "ld s11, 248(a0)",
        "ld t3, 256(a0)",
        "ld t4, 264(a0)",
        "ld t5, 272(a0)",
        "ld t6, 280(a0)",

        "ld a0, 112(a0)",

        "sret",

        tf = const TRAPFRAME,
    );
}
