//! Process signal policy
//!
//! The runtime's only mandated policy: a broken pipe must surface as an
//! I/O error code, not kill the process, so SIGPIPE is ignored on POSIX
//! platforms. Everything else keeps its default disposition.

/// Install the signal policy; called from runtime startup.
pub fn init_signals() {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn tern_init_signals() {
    init_signals();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_sigpipe_ignored() {
        init_signals();
        let current = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
        assert_eq!(current, libc::SIG_IGN);
    }
}
