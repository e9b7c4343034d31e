//! # keyq
//!
//! In-process key-affinity dispatch queue. Messages that share a partition
//! key reach exactly one worker at a time, in enqueue order; a key moves to
//! another worker only after its holder confirms everything it was given.
//!
//! The core [`queue::DispatchQueue`] is a plain single-threaded state
//! machine. [`dispatcher::Dispatcher`] hosts it on its own task for
//! concurrent callers, and [`worker::Worker`] is a polling consumer on top.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod queue;
pub mod scenario;
pub mod simulation;
pub mod telemetry;
pub mod worker;

pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use model::{Message, MessageId, WorkerId};
pub use queue::{DispatchQueue, QueueStats};
