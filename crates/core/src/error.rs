use thiserror::Error;

/// Errors raised by the lock primitives in [`crate::locks`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The read hold could not be converted in place. The read handle has been
    /// released; acquire a fresh write handle instead.
    #[error("cannot upgrade read lock to write lock: other holders present")]
    UpgradeConflict,

    #[error("stamp {0:#x} does not match the current lock state")]
    InvalidStamp(u64),
}

/// Errors raised while loading a [`crate::ControllerConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {key}: {value}")]
    Invalid { key: String, value: String },
}
