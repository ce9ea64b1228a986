use std::io;

/// Outcome codes of storage operations.
///
/// Codes declared before [`Status::Failed`] are successes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Success,
    Found,
    NotFound,
    EoF,
    Failed,
    Filled,
    Disposed,
    Closed,
    Corrupted,
}

impl Status {
    #[inline]
    pub fn is_success(self) -> bool {
        self < Status::Failed
    }

    #[inline]
    pub fn is_failure(self) -> bool {
        !self.is_success()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LsmError {
    #[error("{0}")]
    IOError(#[from] io::Error),

    #[error("table is filled")]
    Filled,

    #[error("object has been disposed")]
    Disposed,

    #[error("object is closed")]
    Closed,

    #[error("corrupted data: {0}")]
    Corrupted(String),

    #[error("record of {size} bytes exceeds the memory table capacity of {capacity} bytes")]
    RecordTooLarge { size: usize, capacity: usize },

    #[error("{0}")]
    Custom(String),
}

impl LsmError {
    pub(crate) fn corrupted(msg: impl Into<String>) -> LsmError {
        LsmError::Corrupted(msg.into())
    }

    pub fn status(&self) -> Status {
        match self {
            LsmError::Filled => Status::Filled,
            LsmError::Disposed => Status::Disposed,
            LsmError::Closed => Status::Closed,
            LsmError::Corrupted(_) => Status::Corrupted,
            LsmError::IOError(_) | LsmError::RecordTooLarge { .. } | LsmError::Custom(_) => {
                Status::Failed
            }
        }
    }
}

impl PartialEq for LsmError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::IOError(_), Self::IOError(_))
            | (Self::Filled, Self::Filled)
            | (Self::Disposed, Self::Disposed)
            | (Self::Closed, Self::Closed) => true,
            (Self::Corrupted(s1), Self::Corrupted(s2)) | (Self::Custom(s1), Self::Custom(s2)) => {
                s1.eq(s2)
            }
            (
                Self::RecordTooLarge { size, capacity },
                Self::RecordTooLarge {
                    size: s2,
                    capacity: c2,
                },
            ) => size == s2 && capacity == c2,
            _ => false,
        }
    }
}
