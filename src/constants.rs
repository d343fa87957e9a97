//! Centralized protocol and runtime constants.
//!
//! All wire-format magic numbers and default tunables live here so the
//! protocol constraints can be read in one place.
//!
//! # Categories
//!
//! - **Wire Constants**: envelope framing and reserved serializer type ids
//! - **Session Constants**: keep-alive and expiry defaults
//! - **Client Constants**: submission timeouts and retry bounds

// =============================================================================
// Wire Constants
// =============================================================================

/// Frame tag identifying a resource operation envelope.
pub const ENVELOPE_TAG: u8 = 0x51;

/// Maximum allowed envelope payload size (16 MB).
///
/// Prevents memory exhaustion from malformed frames that claim huge
/// payload lengths.
pub const MAX_ENVELOPE_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Maximum allowed array size when parsing protocol frames.
pub const MAX_PROTOCOL_ARRAY_SIZE: i32 = 100_000;

// -----------------------------------------------------------------------------
// Reserved serializer type ids
// -----------------------------------------------------------------------------
// Negative ids are reserved for framework types; resource descriptors assign
// their own ids. Collisions are rejected at registry load.

/// Serializer id for resource command envelopes.
pub const TYPE_ID_RESOURCE_COMMAND: i16 = -50;

/// Serializer id for resource query envelopes.
pub const TYPE_ID_RESOURCE_QUERY: i16 = -51;

/// Serializer id for the configure envelope.
pub const TYPE_ID_CONFIGURE: i16 = -52;

/// Serializer id for the delete envelope.
pub const TYPE_ID_DELETE: i16 = -53;

/// Serializer id for the task queue resource type.
pub const TYPE_ID_TASK_QUEUE: i16 = -32;

// =============================================================================
// Session Constants
// =============================================================================

/// Default session timeout in milliseconds.
///
/// A session whose keep-alives lapse beyond this window transitions to
/// EXPIRED and its resource memberships are released.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 10_000;

/// Default keep-alive interval in milliseconds.
///
/// Should be well under the session timeout to absorb transient network
/// issues and leader changes.
pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u64 = 2_500;

/// Upper bound on events buffered per session awaiting acknowledgement.
///
/// Sessions that fall further behind than this are expired by the host
/// rather than buffering without bound.
pub const MAX_UNACKED_EVENTS_PER_SESSION: usize = 65_536;

// =============================================================================
// Client Constants
// =============================================================================

/// Default client submission timeout in milliseconds.
pub const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 30_000;

/// Maximum attempts when connecting through a seed list.
pub const MAX_SEED_CONNECT_ATTEMPTS: usize = 5;
