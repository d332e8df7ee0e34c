pub mod metrics;
pub mod sanitize;
