// Hand-written assembly, kept as plain Rust naked functions rather than
// separate .S files assembled and linked in via global_asm!/include_str!.

mod entry;
mod kernelvec;
mod switch;
mod trampoline;

pub use kernelvec::kernelvec;
pub use switch::swtch;
pub use trampoline::{uservec, userret};
