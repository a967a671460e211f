//! Error taxonomy per spec §7. `ConfigError` is fatal at startup;
//! `BindError`/`ValueError` are local to the Binder and logged, never
//! bubbled; the rest cross the top-level invocation boundary.

use thiserror::Error;

pub use crate::value::ValueError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("line {line}: {kind}")]
    At { line: u32, kind: ConfigErrorKind },
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigErrorKind {
    #[error("illegal control character 0x{0:02x}")]
    ControlChar(u8),
    #[error("unknown section {0:?}")]
    UnknownSection(String),
    #[error("invalid key=value definition: {0:?}")]
    InvalidDefinition(String),
    #[error("invalid entry id {0:?}")]
    InvalidEntryId(String),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("unknown control id {0:?}")]
    UnknownControlId(String),
    #[error(transparent)]
    Model(#[from] crate::model::ModelError),
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("card {num} already bound to a different id/name pair, ignoring duplicate")]
    ConfusedDuplicateCard { num: u32 },
    #[error("element {numid} already bound to a different interface/name pair, ignoring duplicate")]
    ConfusedDuplicateElement { numid: u32 },
    #[error("mixer I/O failure while binding: {0}")]
    MixerIo(#[from] crate::mixerio::MixerIoError),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("an outband sequence is already scheduled")]
    Busy,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("policy bus failure: {0}")]
    Bus(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("mixer set failed: {0}")]
    MixerSet(#[from] crate::mixerio::MixerIoError),
    #[error(transparent)]
    Schedule(#[from] SchedulerError),
}
