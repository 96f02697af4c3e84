pub mod config;
pub mod dispatcher;
pub mod events;
pub mod orchestrator;
pub mod processor;
pub mod queue;
pub mod revisions;

#[cfg(test)]
pub(crate) mod test_support;
