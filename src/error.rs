use thiserror::Error;

pub type FsResult<T> = std::result::Result<T, FsError>;

/// Filesystem error taxonomy.
///
/// Every public operation is total over this set. `errno()` gives the stable
/// POSIX mapping used by the C-ABI surface and by host extensions.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("file exists")]
    Exists,

    #[error("not a directory")]
    NotDirectory,

    #[error("is a directory")]
    IsDirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("operation not permitted")]
    Permission,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("too many levels of symbolic links")]
    TooManyLinks,

    #[error("file name too long")]
    NameTooLong,

    #[error("no space left on device")]
    NoSpace,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupted filesystem state: {0}")]
    Corruption(String),

    #[error("operation canceled")]
    Canceled,
}

impl FsError {
    /// Stable POSIX errno for this error kind.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::Exists => libc::EEXIST,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::Permission => libc::EPERM,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::NotSupported(_) => libc::ENOTSUP,
            FsError::TooManyLinks => libc::ELOOP,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::NoSpace => libc::ENOSPC,
            FsError::Storage(_) | FsError::Corruption(_) => libc::EIO,
            FsError::Canceled => libc::ECANCELED,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        FsError::InvalidArgument(msg.into())
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        FsError::Corruption(msg.into())
    }
}

impl From<rusqlite::Error> for FsError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;

        if let rusqlite::Error::SqliteFailure(e, msg) = &err {
            return match e.code {
                ErrorCode::DiskFull => FsError::NoSpace,
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => FsError::Corruption(
                    msg.clone().unwrap_or_else(|| "database corrupt".to_string()),
                ),
                _ => FsError::Storage(err.to_string()),
            };
        }
        FsError::Storage(err.to_string())
    }
}
