mod sentinel;

pub use sentinel::{LockOptions, SentinelLock};
