pub mod canonical_events;
pub mod connectors;
pub mod cv_events;
pub mod cv_review;
pub mod raw_events;
