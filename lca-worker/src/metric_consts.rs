pub const EVENTS_RECEIVED: &str = "lca_events_received";
pub const EVENTS_COMPLETED: &str = "lca_events_completed";
pub const EVENTS_SKIPPED: &str = "lca_events_skipped";
pub const EVENTS_DEAD_LETTERED: &str = "lca_events_dead_lettered";
pub const DEAD_LETTER_FAILURES: &str = "lca_dead_letter_failures";
pub const PROCESSING_RETRIES: &str = "lca_processing_retries";
pub const ARTIFACT_WRITE_FAILURES: &str = "lca_artifact_write_failures";
pub const PUBLISH_FAILURES: &str = "lca_publish_failures";
pub const MISSING_FACTOR: &str = "lca_missing_factor";
pub const RECV_ERRORS: &str = "lca_recv_errors";
pub const OFFSET_COMMIT_FAILURES: &str = "lca_offset_commit_failures";
pub const MESSAGE_PROCESSING_TIME: &str = "lca_message_processing_time";
