//! HFP/HSP voice support: AT parsing, the RFCOMM state machine and mSBC
//! framing

pub mod at;
pub mod msbc;
pub mod rfcomm;

pub use at::{AtCommand, AtKind, AtParseError};
