pub mod agent_message;
pub mod queue_message;
pub mod revision;
pub mod workflow;
pub mod workflow_event;

#[cfg(test)]
pub(crate) mod test_utils;
