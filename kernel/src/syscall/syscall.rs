use core::mem;

use crate::printf;
use crate::proc::myproc;
use crate::string::strlen;
use crate::syscall::sysproc::{sys_exit, sys_fork, sys_getpid, sys_kill, sys_wait};
use crate::syscall::{SYS_exit, SYS_fork, SYS_getpid, SYS_kill, SYS_wait};
use crate::vm::{copyin, copyinstr};

// Retrieve an argument as a pointer.
// Doesn't check for legality, since
// copyin/copyout will do that.
pub(super) fn argaddr(n: u8) -> usize {
    argraw(n) as usize
}

// Fetch the nth 32-bit system call argument.
pub(super) fn argint(n: u8) -> i32 {
    argraw(n) as i32
}

// Fetch the nth word-sized system call argument as a null-terminated string.
// Copies into buf, at most max.
// Returns string length if OK (including nul), -1 if error.
pub(super) fn argstr(n: u8, buf: *mut u8, max: usize) -> i32 {
    let addr = argaddr(n);
    fetchstr(addr, buf, max)
}

fn argraw(n: u8) -> u64 {
    let p = myproc();
    let tf = unsafe { p.trapframe.unwrap().as_ref().unwrap() };
    match n {
        0 => tf.a0,
        1 => tf.a1,
        2 => tf.a2,
        3 => tf.a3,
        4 => tf.a4,
        5 => tf.a5,
        _ => {
            panic!("argraw")
        }
    }
}

// Fetch the usize at addr from the current process.
pub(super) fn fetchaddr(addr: usize, ip: &mut usize) -> i32 {
    let p = myproc();
    if addr >= p.sz || addr + mem::size_of::<usize>() > p.sz {
        // both tests needed, in case of overflow
        return -1;
    }
    copyin(
        p.pagetable.as_mut().unwrap(),
        ip as *mut usize as *mut u8,
        addr,
        mem::size_of::<usize>() as u64,
    )
}

// Fetch the nul-terminated string at addr from the current process.
// Returns length of string, not including nul, or -1 for error.
pub(super) fn fetchstr(addr: usize, buf: *mut u8, max: usize) -> i32 {
    let p = myproc();
    if copyinstr(p.pagetable.as_mut().unwrap(), buf, addr, max as u64) < 0 {
        return -1;
    }
    strlen(buf) as i32
}

// An array mapping syscall numbers to the function that handles the
// system call.
const NSYSCALL: usize = 6;
const SYSCALL: [Option<fn() -> u64>; NSYSCALL] = {
    let mut arr: [Option<fn() -> u64>; NSYSCALL] = [None; NSYSCALL];
    arr[SYS_fork as usize] = Some(sys_fork);
    arr[SYS_exit as usize] = Some(sys_exit);
    arr[SYS_wait as usize] = Some(sys_wait);
    arr[SYS_kill as usize] = Some(sys_kill);
    arr[SYS_getpid as usize] = Some(sys_getpid);
    arr
};

pub fn syscall() {
    let p = myproc();

    let num = unsafe { p.trapframe.unwrap().as_ref().unwrap().a7 } as usize;

    let result = if num > 0 && num < SYSCALL.len() && SYSCALL[num].is_some() {
        // Use num to lookup the system call function for num, call it,
        // and store its return value in p->trapframe->a0
        SYSCALL[num].unwrap()()
    } else {
        let name = p.name();
        let name_len = name.iter().position(|&c| c == 0).unwrap_or(name.len());
        printf!(
            "{} {}: unknown sys call {}\n",
            p.pid,
            core::str::from_utf8(&name[..name_len]).unwrap_or("?"),
            num
        );
        u64::MAX
    };

    let tf = unsafe { p.trapframe.unwrap().as_mut().unwrap() };
    tf.a0 = result;
}
