//! OCR execution backend for Smart Opex.
//!
//! Three pieces:
//! - [`runner`]: runs the active OCR engine against a receipt image, either
//!   as a local subprocess or via a remote HTTP service, under a hard
//!   wall-clock timeout.
//! - [`parse`]: tolerant two-stage parsing of engine output (whole output,
//!   then last line only).
//! - [`engine`]: versioned engine-script registry with an atomically-written
//!   active-script pointer.
//!
//! The runner never mutates persisted state; it is a pure computation with
//! external I/O.

pub mod engine;
pub mod error;
pub mod parse;
pub mod runner;

pub use engine::{EngineError, EngineRegistry, EngineVersion};
pub use error::ExtractionError;
pub use parse::{parse_engine_output, OcrOutput, ParseOutcome};
pub use runner::{Backend, OcrRunner, DEFAULT_TIMEOUT};
