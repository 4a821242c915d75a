#![forbid(unsafe_code)]

//! Core: time sources, the scheduling capability, and the error taxonomy
//! shared by the freshview primitives.

pub mod clock;
pub mod error;
pub mod logging;
pub mod scheduler;

pub use clock::{LabClock, TimeSource};
pub use error::{ConfigError, EqualityError, Result, SubscriberError};
pub use scheduler::{Scheduler, Task, TimerId, TimerQueue};
