//! # picflash
//!
//! Host side of a serial bootloader for PIC32MX microcontrollers.
//!
//! The crate covers the whole path from a compiler's Intel HEX output to a
//! flashed device:
//!
//! - Intel HEX parsing and memory run assembly
//! - Clamping runs to the regions the bootloader may write
//! - Packing runs into page-sized blocks and framing them as write packets
//! - Optional ChaCha20 encryption with a random IV and block shuffling
//! - A persistent `.img` container for prebuilt images
//! - The byte-level link protocol and the automated flash sequence
//! - A cooperative session loop over a serial transport
//!
//! ## Features
//!
//! - `native` (default): serial transport via the `serialport` crate
//! - `serde`: serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use picflash::{DeviceGeometry, FlashPolicy, ImageBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = DeviceGeometry::by_name("PIC32MX250F128B")?;
//!     let image = ImageBuilder::new(device, FlashPolicy::new(0x1000))
//!         .build_from_file("app.hex")?;
//!     image.write("app.img")?;
//!     println!("{} packets", image.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod crypto;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePortEnumerator, SerialTransport};
pub use {
    crypto::Key,
    error::{Error, Result},
    image::{Image, ImageBuilder},
    port::{PortEnumerator, PortEvent, PortInfo, SerialConfig, Transport},
    protocol::{LinkEvent, LinkProtocol, LinkState},
    session::{Command, Session, SessionConfig},
    target::{DeviceGeometry, FlashPolicy},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
