//! Turn a plain-language goal and a summary of the open page into a userscript.
//!
//! The page side runs a read-only probe in Chrome over CDP ([`hands`], [`dom`]);
//! the panel side is a small local web UI ([`face`]). They talk through
//! [`bridge`], and [`pipeline`] ties the probe, the model ([`brain`]) and the
//! userscript checks ([`script`]) together.

pub mod brain;
pub mod bridge;
pub mod config;
pub mod dom;
pub mod error;
pub mod face;
pub mod hands;
pub mod pipeline;
pub mod presenter;
pub mod script;
pub mod types;

pub use error::{BrainError, GenerateError, PageError};
pub use pipeline::{Session, Stage};
pub use types::{GeneratedScript, PageSummary};
