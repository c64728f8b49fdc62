use crate::spinlock::{pop_off, push_off};

// the UART control registers are memory-mapped
// at address UART0. this macro returns the
// address of one of the registers.
#[macro_export]
macro_rules! Reg {
    ( $reg:expr ) => {
        $crate::memlayout::UART0 + ($reg as usize)
    };
}

// the UART control registers.
// some have different meanings for
// read vs write.
// see http://byterunner.com/16550.html
pub const RHR: u8 = 0; // receive holding register (for input bytes)
pub const THR: u8 = 0; // transmit holding register (for output bytes)
pub const IER: u8 = 1; // interrupt enable register
pub const IER_RX_ENABLE: u8 = 1 << 0;
pub const IER_TX_ENABLE: u8 = 1 << 1;
pub const FCR: u8 = 2; // FIFO control register
pub const FCR_FIFO_ENABLE: u8 = 1 << 0;
pub const FCR_FIFO_CLEAR: u8 = 3 << 1; // clear the content of the two FIFOs
pub const LCR: u8 = 3; // line control register
pub const LCR_EIGHT_BITS: u8 = 3 << 0;
pub const LCR_BAUD_LATCH: u8 = 1 << 7; // special mode to set baud rate
pub const LSR: u8 = 5; // line status register
pub const LSR_TX_IDLE: u8 = 1 << 5; // THR can accept another character to send

#[macro_export]
macro_rules! ReadReg {
    ( $reg:expr ) => {
        unsafe { ($crate::Reg!($reg) as *mut u8).read_volatile() }
    };
}

#[macro_export]
macro_rules! WriteReg {
    ( $reg:expr, $val:expr ) => {
        unsafe { ($crate::Reg!($reg) as *mut u8).write_volatile($val) }
    };
}

// The console is write-only: there is no getc()/consoleintr() path here.
// uartintr() drains RHR so the device never wedges on a full receive FIFO,
// but the bytes it reads are discarded.
pub static mut UART_INSTANCE: Uart = Uart::create();

pub struct Uart {}

impl Uart {
    pub const fn create() -> Self {
        Self {}
    }

    pub fn init() {
        // disable interrupts.
        WriteReg!(IER, 0x00);

        // special mode to set baud rate.
        WriteReg!(LCR, LCR_BAUD_LATCH);

        // LSB for baud rate of 38.4K.
        WriteReg!(0, 0x03);

        // MSB for baud rate of 38.4K.
        WriteReg!(1, 0x00);

        // leave set-baud mode,
        // and set word length to 8 bits, no parity.
        WriteReg!(LCR, LCR_EIGHT_BITS);

        // reset and enable FIFOs.
        WriteReg!(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);

        // enable receive interrupts only, so we can drain RHR; there is
        // nothing to transmit asynchronously since output is synchronous.
        WriteReg!(IER, IER_RX_ENABLE);
    }

    /// Write one byte to the UART, spinning until the transmit holding
    /// register is idle. The only write path; there is no buffered/async
    /// transmit queue.
    pub fn putc_sync(self: &mut Self, c: u8) {
        push_off();

        // wait for Transmit Holding Empty to be set in LSR.
        while (ReadReg!(LSR) & LSR_TX_IDLE) == 0 {}
        WriteReg!(THR, c);

        pop_off();
    }

    /// handle a uart interrupt: drain and discard any waiting input so the
    /// receive FIFO never backs up. called from devintr().
    pub fn intr(self: &mut Self) {
        loop {
            let ready = ReadReg!(LSR) & 0x01 != 0;
            if !ready {
                break;
            }
            let _discarded = ReadReg!(RHR);
        }
    }
}
