//! The three bus consumers and the runtime that drives them.
//!
//! Detections fan out to two independent consumers:
//! 1. [`RecommendationConsumer`] asks the advice oracle and publishes a full alert
//! 2. [`LoggingConsumer`] persists the detection
//!
//! Alerts are picked up by [`AlertConsumer`], which sends the SMS and drives
//! the repeller. Each consumer runs its own loop; a failure in one never
//! reaches another.

pub mod alert;
pub mod consumer;
pub mod dead_letter;
pub mod logging;
pub mod recommendation;

pub use alert::AlertConsumer;
pub use consumer::{Consumer, Disposition, Stage, spawn_consumer, spawn_consumers};
pub use dead_letter::{
    DeadLetter, DeadLetterSink, MemoryDeadLetters, StoreDeadLetters, TracingDeadLetters,
};
pub use logging::LoggingConsumer;
pub use recommendation::RecommendationConsumer;
