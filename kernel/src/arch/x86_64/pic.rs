//! Legacy 8259 PIC: initialize, remap to vectors 32-47, then mask.
//!
//! The APIC is the real IRQ source once timer calibration runs (spec.md
//! §4.3); the 8259 is only brought up far enough to be silenced, so a
//! stray legacy interrupt can never race the APIC's vector space.

use pic8259::ChainedPics;
use spin::Mutex;

/// PIC1 vector offset after remap.
pub const PIC1_OFFSET: u8 = 32;
/// PIC2 vector offset after remap.
pub const PIC2_OFFSET: u8 = 40;

static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET) });

/// Run the ICW1-ICW4 init sequence, remap both PICs above the CPU
/// exception range, then mask every line.
pub fn init_and_mask() {
    // SAFETY: `PICS` is only ever touched from this module, and this is
    // the one-time boot init path; the PIC1/PIC2 offsets place both
    // chips above the CPU exception vector range.
    unsafe {
        PICS.lock().initialize();
        PICS.lock().write_masks(0xFF, 0xFF);
    }
}
