//! Sponsor 1:1 chat.
//!
//! One static X25519 agreement per sponsorship, expanded into a sending and
//! a receiving chain. No pre-key bundles and no DH ratchet: forward secrecy
//! comes from the hash ratchet alone.

mod manager;
mod session;

pub use manager::PairwiseSessionManager;
pub use session::{ChainRole, SponsorSession, SponsorSessionState};
