//! OS-level thread ids, used to label shards in diagnostics.

/// Return the OS thread ID (TID) as u64.
///
/// Linux uses `syscall(SYS_gettid)`, macOS the Mach thread id. Other
/// platforms fall back to a hash of the std thread id, which is stable for
/// the thread's lifetime but not meaningful to the OS.
#[inline]
pub fn current_tid() -> u64 {
    #[cfg(target_os = "linux")]
    {
        unsafe { libc::syscall(libc::SYS_gettid) as u64 }
    }

    #[cfg(target_os = "macos")]
    {
        unsafe {
            let pthread = libc::pthread_self();
            libc::pthread_mach_thread_np(pthread) as u64
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        use std::hash::{BuildHasher, Hasher, RandomState};
        use std::sync::OnceLock;

        static STATE: OnceLock<RandomState> = OnceLock::new();
        let mut hasher = STATE.get_or_init(RandomState::new).build_hasher();
        std::hash::Hash::hash(&std::thread::current().id(), &mut hasher);
        hasher.finish()
    }
}
