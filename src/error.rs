// Copyright (c) 2021-2022 Ant Group
//
// SPDX-License-Identifier: Apache-2.0
//

use std::error::Error as StdError;
use std::fmt;

use crate::FreezerState;

/// The different types of errors that can occur while manipulating control groups.
#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    #[error("common error: {0}")]
    Common(String),

    /// The kernel does not expose the file or feature that was asked for.
    #[error("{0} is not supported by this kernel or hierarchy")]
    NotSupported(String),

    /// An error occured while writing to a control group file.
    #[error("unable to write to a control group file {0}, value {1}")]
    WriteFailed(String, String),

    /// An error occured while trying to read from a control group file.
    #[error("unable to read a control group file {0}")]
    ReadFailed(String),

    /// An error occured while creating a control group directory.
    #[error("unable to create a control group directory {0}")]
    CreateFailed(String),

    /// An error occured while trying to remove a control group.
    #[error("unable to remove a control group {0}")]
    RemoveFailed(String),

    /// A statistics file contained a line the grammar does not allow.
    #[error("invalid line in control group file {0}: {1}")]
    InvalidLine(String, String),

    /// An error occured while trying to parse a value from a control group file.
    #[error("unable to parse control group file")]
    ParseError,

    /// The path of the control group was invalid.
    #[error("the given path is invalid")]
    InvalidPath,

    /// The freezer did not reach the requested state before the wait gave up.
    #[error("timed out waiting for freezer state {0}")]
    FreezerTimeout(FreezerState),

    /// A wait loop was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(cause) = &self.cause {
            write!(f, "{} caused by: {:?}", &self.kind, cause)
        } else {
            write!(f, "{}", &self.kind)
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        #[allow(clippy::manual_map)]
        match self.cause {
            Some(ref x) => Some(&**x),
            None => None,
        }
    }
}

impl Error {
    pub(crate) fn from_string(s: String) -> Self {
        Self {
            kind: ErrorKind::Common(s),
            cause: None,
        }
    }

    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, cause: None }
    }

    pub(crate) fn with_cause<E>(kind: ErrorKind, cause: E) -> Self
    where
        E: 'static + Send + Sync + StdError,
    {
        Self {
            kind,
            cause: Some(Box::new(cause)),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// True when the failure only means the kernel lacks the feature.
    pub fn is_not_supported(&self) -> bool {
        matches!(self.kind, ErrorKind::NotSupported(_))
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
