use std::fmt;
use std::process::Command;

const BYTES_PER_GIGABYTE: u64 = 1024 * 1024 * 1024;

/// Result of a step that protects the run but must never stop it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort<T> {
    Applied(T),
    Skipped { reason: String },
}

impl<T> BestEffort<T> {
    pub fn applied(&self) -> Option<&T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCeiling {
    bytes: u64,
}

impl MemoryCeiling {
    pub fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    pub fn from_gigabytes(gigabytes: u64) -> Self {
        Self::from_bytes(gigabytes.saturating_mul(BYTES_PER_GIGABYTE))
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl fmt::Display for MemoryCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes % BYTES_PER_GIGABYTE == 0 {
            write!(f, "{} GB", self.bytes / BYTES_PER_GIGABYTE)
        } else {
            write!(f, "{} bytes", self.bytes)
        }
    }
}

/// An address-space ceiling known to be applicable to planner children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLimit {
    ceiling: MemoryCeiling,
}

impl ChildLimit {
    pub fn ceiling(&self) -> MemoryCeiling {
        self.ceiling
    }

    /// Registers the limit on `command`. It takes effect in the forked child
    /// right before exec; the harness process keeps its own limits.
    #[cfg(unix)]
    pub fn install(&self, command: &mut Command) {
        use std::os::unix::process::CommandExt;

        let bytes = self.ceiling.bytes() as libc::rlim_t;
        // SAFETY: the hook only calls setrlimit, which is async-signal-safe,
        // and allocates nothing.
        unsafe {
            command.pre_exec(move || {
                let limit = libc::rlimit {
                    rlim_cur: bytes,
                    rlim_max: bytes,
                };
                // The parent already probed the hard limit; a failure here
                // leaves the child unprotected rather than unstarted.
                let _ = libc::setrlimit(libc::RLIMIT_AS, &limit);
                Ok(())
            });
        }
    }

    #[cfg(not(unix))]
    pub fn install(&self, _command: &mut Command) {}
}

/// Checks whether `ceiling` can be applied to children of this process.
pub fn prepare(ceiling: MemoryCeiling) -> BestEffort<ChildLimit> {
    if ceiling.bytes() == 0 {
        return BestEffort::Skipped {
            reason: "memory ceiling of 0 bytes disables the limit".to_string(),
        };
    }
    probe_address_space_limit(ceiling)
}

#[cfg(unix)]
fn probe_address_space_limit(ceiling: MemoryCeiling) -> BestEffort<ChildLimit> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes into the struct we own.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut current) };
    if rc != 0 {
        return BestEffort::Skipped {
            reason: format!(
                "getrlimit(RLIMIT_AS) failed: {}",
                std::io::Error::last_os_error()
            ),
        };
    }
    let requested = ceiling.bytes() as libc::rlim_t;
    if current.rlim_max != libc::RLIM_INFINITY && requested > current.rlim_max {
        return BestEffort::Skipped {
            reason: format!(
                "requested {} exceeds the hard address-space limit of {} bytes",
                ceiling, current.rlim_max
            ),
        };
    }
    BestEffort::Applied(ChildLimit { ceiling })
}

#[cfg(not(unix))]
fn probe_address_space_limit(_ceiling: MemoryCeiling) -> BestEffort<ChildLimit> {
    BestEffort::Skipped {
        reason: "address-space limits are not supported on this platform".to_string(),
    }
}
