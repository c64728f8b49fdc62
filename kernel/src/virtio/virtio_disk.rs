//
// driver for qemu's virtio disk device.
// uses qemu's mmio interface to virtio.
//
// qemu ... -drive file=fs.img,if=none,format=raw,id=x0 -device virtio-blk-device,drive=x0,bus=virtio-mmio-bus.0
//

use core::ptr;
use crate::buf::Buf;
use crate::debug_log;
use crate::fs::BSIZE;
use crate::kalloc::KMEM;
use crate::proc::{sleep, wakeup};
use crate::riscv::PGSIZE;
use crate::spinlock::Spinlock;
use crate::string::memset;
use crate::virtio::*;
// the address of virtio mmio register r.
macro_rules! Read_R {
    ( $r:expr ) => {
        unsafe {
            (($crate::memlayout::VIRTIO0 + $r) as *const usize).read_volatile() as u32
        }
    };
}

macro_rules! Write_R {
    ( $r:expr, $val:expr ) => {
        unsafe {
            (($crate::memlayout::VIRTIO0 + $r) as *mut usize).write_volatile($val as usize)
        }
    };
}

#[derive(Copy, Clone)]
struct Info<'a> {
    b: Option<&'a Buf>,
    status: u8,
}

struct Disk<'a> {
    // a set (not a ring) of DMA descriptors, with which the
    // driver tells the device where to read and write individual
    // disk operations. there are NUM descriptors.
    // most commands consist of a "chain" (a linked list) of a couple of
    // these descriptors.
    desc: *mut VirtqDesc,

    // a ring in which the driver writes descriptor numbers
    // that the driver would like the device to process.  it only
    // includes the head descriptor of each chain. the ring has
    // NUM elements.
    avail: *mut VirtqAvail,

    // a ring in which the device writes descriptor numbers that
    // the device has finished processing (just the head of each chain).
    // there are NUM used ring entries.
    used: *mut VirtqUsed,

    // our own book-keeping.
    free: [u8; NUM],  // is a descriptor free?
    used_idx: u16, // we've looked this far in used[2..NUM].

    // track info about in-flight operations,
    // for use when completion interrupt arrives.
    // indexed by first descriptor index of chain.
    info: [Info<'a>; NUM],

    // disk command headers.
    // one-for-one with descriptors, for convenience.
    ops: [VirtioBlkReq; NUM],

    vdisk_lock: Spinlock,

}

impl<'a> Disk<'a> {
    const fn create() -> Self {
        Self {
            desc: ptr::null_mut(),
            avail: ptr::null_mut(),
            used: ptr::null_mut(),
            free: [0; NUM],
            used_idx: 0,
            info: [Info{ b: None, status: 0 }; NUM],
            ops: [VirtioBlkReq{
                desc_type: 0,
                reserved: 0,
                sector: 0,
            }; NUM],
            vdisk_lock: Spinlock::init_lock("virtio_disk"),
        }
    }
}

static mut DISK: Disk = Disk::create();

pub fn virtio_disk_init() {
    if Read_R!(VIRTIO_MMIO_MAGIC_VALUE) != 0x74726976 ||
        Read_R!(VIRTIO_MMIO_VERSION) != 2 ||
        Read_R!(VIRTIO_MMIO_DEVICE_ID) != 2 ||
        Read_R!(VIRTIO_MMIO_VENDOR_ID) != 0x554d4551 {

        panic!("could not find virtio disk");
    }

    let mut status = 0;

    // reset device
    Write_R!(VIRTIO_MMIO_STATUS, status);

    // set ACKNOWLEDGE status bit
    status |= VIRTIO_CONFIG_S_ACKNOWLEDGE;
    Write_R!(VIRTIO_MMIO_STATUS, status);

    // set DRIVER status bit
    status |= VIRTIO_CONFIG_S_DRIVER;
    Write_R!(VIRTIO_MMIO_STATUS, status);

    // negotiate features
    let mut features = Read_R!(VIRTIO_MMIO_DEVICE_FEATURES);
    features &= !(1 << VIRTIO_BLK_F_RO);
    features &= !(1 << VIRTIO_BLK_F_SCSI);
    features &= !(1 << VIRTIO_BLK_F_CONFIG_WCE);
    features &= !(1 << VIRTIO_BLK_F_MQ);
    features &= !(1 << VIRTIO_F_ANY_LAYOUT);
    features &= !(1 << VIRTIO_RING_F_EVENT_IDX);
    features &= !(1 << VIRTIO_RING_F_INDIRECT_DESC);
    Write_R!(VIRTIO_MMIO_DRIVER_FEATURES, features);

    // tell device that feature negotiation is complete.
    status |= VIRTIO_CONFIG_S_FEATURES_OK;
    Write_R!(VIRTIO_MMIO_STATUS, status);

    // re-read status to ensure FEATURES_OK is set.
    status = Read_R!(VIRTIO_MMIO_STATUS) as usize;
    if !(status & VIRTIO_CONFIG_S_FEATURES_OK) == 0 {
        panic!("virtio disk FEATURES_OK unset");
    }

    // initialize queue 0.
    Write_R!(VIRTIO_MMIO_QUEUE_SEL, 0);

    // ensure queue 0 is not in use.
    if Read_R!(VIRTIO_MMIO_QUEUE_READY) != 0 {
        panic!("virtio disk should not be ready");
    }

    // check maximum queue size.
    let max = Read_R!(VIRTIO_MMIO_QUEUE_NUM_MAX);
    if max == 0 {
        panic!("virtio disk has no queue 0");
    }
    if (max as usize ) < NUM{
        panic!("virtio disk max queue too short");
    }

    // allocate and zero queue memory.
    unsafe {
        DISK.desc = KMEM.kalloc();
        DISK.avail = KMEM.kalloc();
        DISK.used = KMEM.kalloc();
        if DISK.desc.is_null() || DISK.avail.is_null() || DISK.used.is_null() {
            panic!("virtio disk kalloc");
        }
        memset(DISK.desc as *mut u8, 0, PGSIZE);
        memset(DISK.avail as *mut u8, 0, PGSIZE);
        memset(DISK.used as *mut u8, 0, PGSIZE);
    }

    // set queue size.
    Write_R!(VIRTIO_MMIO_QUEUE_NUM, NUM);

    // write physical addresses.
    Write_R!(VIRTIO_MMIO_QUEUE_DESC_LOW, DISK.desc.expose_addr());
    Write_R!(VIRTIO_MMIO_QUEUE_DESC_HIGH, DISK.desc.expose_addr() >> 32);
    Write_R!(VIRTIO_MMIO_DRIVER_DESC_LOW, DISK.avail.expose_addr());
    Write_R!(VIRTIO_MMIO_DRIVER_DESC_HIGH, DISK.avail.expose_addr() >> 32);
    Write_R!(VIRTIO_MMIO_DEVICE_DESC_LOW, DISK.used.expose_addr());
    Write_R!(VIRTIO_MMIO_DEVICE_DESC_HIGH, DISK.used.expose_addr() >> 32);

    // queue is ready.
    Write_R!(VIRTIO_MMIO_QUEUE_READY, 0x1);

    // all NUM descriptors start out unused.
    for i in 0..NUM {
        unsafe { DISK.free[i] = 1; }
    }

    // tell device we're completely ready.
    status |= VIRTIO_CONFIG_S_DRIVER_OK;
    Write_R!(VIRTIO_MMIO_STATUS, status);

    // plic.c and trap.c arrange for interrupts from VIRTIO0_IRQ.
}

// Find a free descriptor, mark it non-free, return its index.
unsafe fn alloc_desc() -> Option<usize> {
    for i in 0..NUM {
        if DISK.free[i] != 0 {
            DISK.free[i] = 0;
            return Some(i);
        }
    }
    None
}

// Mark a descriptor as free.
unsafe fn free_desc(i: usize) {
    if DISK.free[i] != 0 {
        panic!("free_desc: already free");
    }
    (*DISK.desc.add(i)).addr = 0;
    (*DISK.desc.add(i)).len = 0;
    (*DISK.desc.add(i)).flags = 0;
    (*DISK.desc.add(i)).next = 0;
    DISK.free[i] = 1;
    wakeup(DISK.free.as_ptr());
}

// Free a chain of descriptors.
unsafe fn free_chain(mut i: usize) {
    loop {
        let flags = (*DISK.desc.add(i)).flags;
        let next = (*DISK.desc.add(i)).next;
        free_desc(i);
        if flags & VRING_DESC_F_NEXT != 0 {
            i = next as usize;
        } else {
            break;
        }
    }
}

// Allocate three descriptors (they need not be contiguous).
// Disk transfers always use three descriptors.
unsafe fn alloc3_desc(idx: &mut [usize; 3]) -> i32 {
    for i in 0..3 {
        match alloc_desc() {
            Some(d) => idx[i] = d,
            None => {
                for j in 0..i {
                    free_desc(idx[j]);
                }
                return -1;
            }
        }
    }
    0
}

pub fn virtio_disk_rw(b: &'static Buf, write: bool) {
    let sector: u64 = (b.blockno as u64) * (BSIZE as u64 / 512);

    unsafe {
        DISK.vdisk_lock.acquire();

        // the spec's Section 5.2 says that legacy block operations use
        // three descriptors: one for type/reserved/sector, one for the
        // data, one for a 1-byte status result.

        let mut idx: [usize; 3] = [0; 3];
        loop {
            if alloc3_desc(&mut idx) == 0 {
                break;
            }
            sleep(DISK.free.as_ptr(), &mut DISK.vdisk_lock);
        }

        // format the three descriptors.
        // qemu's virtio-blk.c reads them.

        let buf0 = &mut DISK.ops[idx[0]];

        if write {
            buf0.desc_type = VIRTIO_BLK_T_OUT; // write the disk
        } else {
            buf0.desc_type = VIRTIO_BLK_T_IN; // read the disk
        }
        buf0.reserved = 0;
        buf0.sector = sector;

        (*DISK.desc.add(idx[0])).addr = (buf0 as *const VirtioBlkReq).expose_addr() as u64;
        (*DISK.desc.add(idx[0])).len = core::mem::size_of::<VirtioBlkReq>() as u32;
        (*DISK.desc.add(idx[0])).flags = VRING_DESC_F_NEXT;
        (*DISK.desc.add(idx[0])).next = idx[1] as u16;

        (*DISK.desc.add(idx[1])).addr = (b.data.as_ptr()).expose_addr() as u64;
        (*DISK.desc.add(idx[1])).len = BSIZE as u32;
        if write {
            (*DISK.desc.add(idx[1])).flags = 0; // device reads b->data
        } else {
            (*DISK.desc.add(idx[1])).flags = VRING_DESC_F_WRITE; // device writes b->data
        }
        (*DISK.desc.add(idx[1])).flags |= VRING_DESC_F_NEXT;
        (*DISK.desc.add(idx[1])).next = idx[2] as u16;

        DISK.info[idx[0]].status = 0xff; // device writes 0 on success
        (*DISK.desc.add(idx[2])).addr = (&DISK.info[idx[0]].status as *const u8).expose_addr() as u64;
        (*DISK.desc.add(idx[2])).len = 1;
        (*DISK.desc.add(idx[2])).flags = VRING_DESC_F_WRITE; // device writes the status
        (*DISK.desc.add(idx[2])).next = 0;

        // record struct buf for virtio_disk_intr().
        DISK.info[idx[0]].b = Some(b);

        // tell the device the first index in our chain of descriptors.
        (*DISK.avail).ring[(*DISK.avail).idx as usize % NUM] = idx[0] as u16;

        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);

        // tell the device another avail ring entry is available.
        (*DISK.avail).idx += 1;

        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);

        Write_R!(VIRTIO_MMIO_QUEUE_NOTIFY, 0); // value is queue number

        // Wait for virtio_disk_intr() to say request has finished.
        while DISK.info[idx[0]].b.is_some() {
            sleep((b as *const Buf) as *const u8, &mut DISK.vdisk_lock);
        }

        DISK.info[idx[0]].b = None;
        free_chain(idx[0]);

        DISK.vdisk_lock.release();
    }
}

pub fn virtio_disk_intr() {
    unsafe {
        DISK.vdisk_lock.acquire();

        // the disk interrupt says that the device has consumed the
        // avail rings and updated the used rings, so that part of
        // disk.info[] is now stale. acknowledge the interrupt before
        // reading disk.used.idx, since an interrupt handler may race
        // with the driver adding a new entry otherwise.
        Write_R!(VIRTIO_MMIO_INTERRUPT_ACK, Read_R!(VIRTIO_MMIO_INTERRUPT_STATUS) & 0x3);

        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);

        while DISK.used_idx != (*DISK.used).idx {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
            let id = (*DISK.used).ring[DISK.used_idx as usize % NUM].id as usize;

            if DISK.info[id].status != 0 {
                debug_log!("virtio_disk_intr: status {}\n", DISK.info[id].status);
            }

            let chan = DISK.info[id].b.map(|b| b as *const Buf as *const u8);
            DISK.info[id].b = None; // disk is done with buf
            if let Some(chan) = chan {
                wakeup(chan);
            }

            DISK.used_idx += 1;
        }

        DISK.vdisk_lock.release();
    }
}