use std::{num::NonZeroUsize, sync::OnceLock};

pub const fn project_name() -> &'static str {
    "rpcbench"
}

/// Number of cores this process may use, as reported to benchmark drivers.
pub fn available_cores() -> usize {
    static CORES: OnceLock<usize> = OnceLock::new();
    *CORES.get_or_init(|| {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    })
}

/// Resolve a configured thread count, where `0` means "one per core".
pub fn resolve_thread_count(configured: usize) -> usize {
    if configured == 0 {
        available_cores()
    } else {
        configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_thread_count() {
        assert_eq!(resolve_thread_count(3), 3);
        assert_eq!(resolve_thread_count(0), available_cores());
        assert!(available_cores() >= 1);
    }
}
