use thiserror::Error;

use crate::cgroups::CgroupError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Invalid parameter value: {0}")]
    InvalidParameterValue(String),

    #[error("cpu cores {cores} are used by resource group {group}")]
    CoreConflict { cores: String, group: String },

    #[error("device {device} is already throttled by {owner}")]
    DeviceConflict { device: String, owner: String },

    #[error("Controller error: {0}")]
    Controller(#[from] CgroupError),

    #[error("IO error: {0}")]
    Io(String),

    #[error("resource group \"{0}\" does not exist")]
    NotFound(String),

    #[error("resource group \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("cannot drop reserved resource group \"{0}\"")]
    Reserved(String),

    #[error("insufficient resource groups available (limit: {0})")]
    TooManyGroups(usize),

    #[error("Registry error: {0}")]
    Registry(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors raised before anything was persisted or applied.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Syntax(_)
                | Error::InvalidParameterValue(_)
                | Error::CoreConflict { .. }
                | Error::DeviceConflict { .. }
        )
    }
}
