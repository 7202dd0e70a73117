pub mod api;
pub mod app_context;
pub mod artifact;
pub mod compute;
pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod factors;
pub mod ledger;
pub mod metric_consts;
pub mod pipeline;
pub mod publisher;
pub mod results;
pub mod retry;
pub mod store;

#[cfg(test)]
pub mod test_utils;
