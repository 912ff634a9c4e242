#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::sync::atomic::{AtomicBool, Ordering};

    pub(crate) fn pause() {
        loom::thread::yield_now();
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use core::sync::atomic::{AtomicBool, Ordering};

    #[inline]
    pub(crate) fn pause() {
        core::hint::spin_loop();
        std::thread::yield_now();
    }
}

pub(crate) use imp::*;
