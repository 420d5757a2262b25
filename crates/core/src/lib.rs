pub mod config;
pub mod error;
pub mod locks;

pub use config::{load_dotenv, ControllerConfig};
pub use error::*;
pub use locks::{ScopedRwLock, Stamp, StampedLock, UpgradableLock};
