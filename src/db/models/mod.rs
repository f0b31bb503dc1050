pub mod connector_models;
pub mod cv_models;
pub mod event_models;
