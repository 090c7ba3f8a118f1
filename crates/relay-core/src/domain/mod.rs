//! Domain entities for the relay.
//!
//! Everything in here is plain data plus validation.  None of it knows about
//! sockets, locks, or tasks; the server crate owns all of that.

/// Applications (tenants) and their capabilities.
pub mod app;

/// Channel names and the public / private / presence kind derived from them.
pub mod channel;

/// Presence channel members and the member-list snapshot sent to joiners.
pub mod presence;

/// Connection identity.
pub mod socket;
