use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeatingError {
    #[error("zone name must not be empty")]
    EmptyZoneName,
    #[error("unknown zone {0:?}")]
    UnknownZone(String),
    #[error("zone {0:?} already exists")]
    DuplicateZone(String),
}
