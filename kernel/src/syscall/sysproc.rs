use crate::proc::{exit, fork, getpid, kill, kwait};
use crate::syscall::syscall::{argaddr, argint};

pub(crate) fn sys_fork() -> u64 {
    fork() as u64
}

pub(crate) fn sys_exit() -> u64 {
    let status = argint(0);
    exit(status)
}

pub(crate) fn sys_wait() -> u64 {
    let addr = argaddr(0);
    kwait(addr) as u64
}

pub(crate) fn sys_kill() -> u64 {
    let pid = argint(0) as u32;
    kill(pid) as u64
}

pub(crate) fn sys_getpid() -> u64 {
    getpid() as u64
}
