//! Engine-wide constants.

/// Context key that opts a registration into max-queue enforcement.
///
/// When a consumer's context carries `"enableQueueLimit": true`, a registration that
/// would be queued is rejected instead once the unit already holds
/// [`MAX_BLOCKED_CONSUMERS`] blocked consumers.
pub const QUEUE_LIMIT_CONTEXT_KEY: &str = "enableQueueLimit";

/// Ceiling on blocked consumers per unit for registrations carrying
/// [`QUEUE_LIMIT_CONTEXT_KEY`].
pub const MAX_BLOCKED_CONSUMERS: usize = 20;

/// Context key callers use to tag the kind of entity a consumer represents.
pub const RELEASE_ENTITY_TYPE_KEY: &str = "releaseEntityType";

/// Context key callers use to tag the id of the entity a consumer represents.
pub const RELEASE_ENTITY_ID_KEY: &str = "releaseEntityId";
