#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::_rdtsc;

/// Record timestamps with minimal overhead on the recording path.

/// Returns a monotonic timestamp with the highest precision available:
/// RDTSC on x86_64, the CNTVCT_EL0 virtual counter on aarch64, system time
/// with nanosecond precision elsewhere. Units are architecture specific;
/// consumers only rely on values from one thread being monotonic.
#[inline(always)]
pub fn timestamp() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        _rdtsc()
    }

    #[cfg(target_arch = "aarch64")]
    unsafe {
        let mut value: u64;
        std::arch::asm!("mrs {}, cntvct_el0", out(reg) value);
        value
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}
