pub mod actions;
pub mod contract_validator;
pub mod data_generator;
pub mod formats;
pub mod metrics;
pub mod pattern;
pub mod relational;
pub mod request_log;
pub mod request_matcher;
pub mod response_synthesizer;
pub mod scenario_store;
pub mod stub_registry;

#[cfg(test)]
mod response_synthesizer_test;
