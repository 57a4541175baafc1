//! NextGCore Core Utilities Library
//!
//! Fundamental building blocks shared by the NextGCore protocol engines:
//! fixed-capacity object pools with generation-checked handles, a timer
//! manager driven by an externally supplied clock, and the logging bootstrap.

pub mod log;       // Logging (ogs-log.h)
pub mod pool;      // Object pool (ogs-pool.h)
pub mod timer;     // Timer manager (ogs-timer.h)

pub use self::log::{ogs_log_init, ogs_log_level_from_str};
pub use pool::{OgsPool, OgsPoolId};
pub use timer::{OgsTimerId, OgsTimerMgr};
