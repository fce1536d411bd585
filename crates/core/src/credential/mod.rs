//! Signed credential envelopes and their verification.
//!
//! An envelope is signed by its holder and may embed an email assertion
//! countersigned by a trusted issuer. Envelopes carry a coarse timestamp and
//! are only valid during the matching resolution window.

mod signature;
mod types;
mod verifier;

pub use signature::*;
pub use types::*;
pub use verifier::*;
