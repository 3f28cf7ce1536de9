//! Scheduled fulfillment processing.
//!
//! - `FulfillmentJob`: one pass over every due fulfillment, logging counts and duration
//! - `FulfillmentScheduler`: runs the job on a background thread until shut down

pub mod fulfillment_job;
pub mod scheduler;

pub use fulfillment_job::{FulfillmentJob, JobReport};
pub use scheduler::{FulfillmentScheduler, SchedulerConfig, SchedulerError, SchedulerHandle, SchedulerStats};
