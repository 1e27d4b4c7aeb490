//! Group messaging over sender keys.
//!
//! Every member ratchets their own chain ([`SenderKeySession`]) and hands a
//! [`crate::SenderKeyBundle`] to the others through the backend. The
//! [`GroupProtocolCoordinator`] owns this device's local sessions, one
//! mirrored session per remote author, and their persistence.

mod coordinator;
mod session;

pub use coordinator::GroupProtocolCoordinator;
pub use session::{BundleMerge, SenderKeySession, SenderKeyState, SenderSigningKey};
