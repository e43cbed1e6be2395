//! Engine configuration.

/// Configuration for an acceptor pool and its connection pool.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of worker threads. 0 = number of CPUs.
    pub workers: usize,
    /// Maximum simultaneously admitted connections. Connections accepted
    /// past this cap are closed immediately.
    pub max_clients: usize,
    /// TCP listen backlog used by `bind`.
    pub backlog: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 0,
            max_clients: 16384,
            backlog: 1024,
        }
    }
}

impl Config {
    pub(crate) fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus()
        } else {
            self.workers
        }
    }
}

/// Get the number of available CPU cores.
fn num_cpus() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if ret < 1 { 1 } else { ret as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_resolves_to_cpus() {
        let config = Config {
            workers: 0,
            ..Config::default()
        };
        assert!(config.resolved_workers() >= 1);
    }

    #[test]
    fn explicit_workers_are_kept() {
        let config = Config {
            workers: 3,
            ..Config::default()
        };
        assert_eq!(config.resolved_workers(), 3);
    }
}
