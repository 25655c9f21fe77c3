pub mod agent;
pub mod execution;
