use core::fmt::{Error, Write};

use crate::spinlock::Spinlock;
use crate::uart::UART_INSTANCE;

pub(crate) static mut CONSOLE_INSTANCE: Console = Console::create();

const BACKSPACE: u16 = 0x100;

// A write-only console: bytes handed to putc() go straight to the UART.
// There is no input buffer and no consoleread(); anything the UART
// receives is drained and discarded by uartintr().
pub struct Console {
    lock: Spinlock,
}

impl Console {
    pub const fn create() -> Self {
        Self {
            lock: Spinlock::init_lock("cons"),
        }
    }

    pub fn init() {}

    // send one character to the uart. called by printf() only.
    pub fn putc(self: &mut Self, c: u16) {
        unsafe {
            if c == BACKSPACE {
                UART_INSTANCE.putc_sync(0x08);
                UART_INSTANCE.putc_sync(0x20);
                UART_INSTANCE.putc_sync(0x08);
            } else if c as u8 == b'\n' {
                // synthesize CR before LF so a plain terminal doesn't stairstep.
                UART_INSTANCE.putc_sync(b'\r');
                UART_INSTANCE.putc_sync(b'\n');
            } else {
                UART_INSTANCE.putc_sync(c as u8);
            }
        }
    }

    // the console interrupt handler. uartintr() has already drained and
    // discarded RHR by the time this would be reached; kept as the
    // documented hook a real device interrupt would dispatch through.
    pub(crate) fn consoleintr(self: &mut Self, _c: u8) {
        self.lock.acquire();
        self.lock.release();
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> Result<(), Error> {
        for c in s.bytes() {
            self.putc(c as u16);
        }
        Ok(())
    }
}
