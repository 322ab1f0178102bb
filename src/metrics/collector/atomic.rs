use std::sync::atomic::{AtomicU64, Ordering};

/// `f64` stored as its bit pattern, updated with a compare-and-swap loop.
#[derive(Debug, Default)]
pub(super) struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub(super) fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub(super) fn fetch_add(&self, value: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(previous) => return f64::from_bits(previous),
                Err(observed) => current = observed,
            }
        }
    }
}
