//! Request engines. The dispatcher hands each verified packet to one
//! of these; both always produce a response packet, since silent drops
//! happen earlier in the pipeline.

mod acct;
mod auth;

pub use acct::AcctEngine;
pub use auth::AuthEngine;
