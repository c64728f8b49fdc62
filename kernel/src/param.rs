// Kernel-wide size limits.
//
// These mirror the fixed capacities baked into the on-disk format and the
// process/buffer/inode tables: everything here is a compile-time budget,
// not a tunable discovered at runtime.

pub const NPROC: usize = 64; // maximum number of processes
pub const NCPU: usize = 1; // harts the scheduler assumes run useful work concurrently
pub const NDEV: usize = 10; // maximum major device number
pub const ROOTDEV: u32 = 1; // device number of file system root disk
pub const MAXPATH: usize = 128; // maximum file path name
pub const MAXOPBLOCKS: u32 = 10; // max # of blocks any FS op writes
pub const LOGSIZE: usize = (MAXOPBLOCKS * 3) as usize; // max data blocks in on-disk log
pub const NBUF: usize = (MAXOPBLOCKS * 3) as usize; // size of disk block cache
pub const NINODE: usize = 50; // maximum number of active i-nodes
pub const TIMER_INTERVAL: u64 = 1000000; // cycles between timer interrupts, ~1/10s in qemu
