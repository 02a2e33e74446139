// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

use arrow_schema::ArrowError;
use snafu::{Location, Snafu};

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Allocates error on the heap and then places `e` into it.
#[inline]
pub fn box_error(e: impl std::error::Error + Send + Sync + 'static) -> BoxedError {
    Box::new(e)
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid user input: {source}, {location}"))]
    InvalidInput {
        source: BoxedError,
        location: Location,
    },
    #[snafu(display("Dictionary generation failed: {message}, {location}"))]
    DictionaryGeneration { message: String, location: Location },
    #[snafu(display("Surrogate key {key} is not assigned in column {column_id}, {location}"))]
    InvalidSurrogateKey {
        column_id: String,
        key: u32,
        location: Location,
    },
    #[snafu(display("Not supported: {source}, {location}"))]
    NotSupported {
        source: BoxedError,
        location: Location,
    },
    #[snafu(display("Encountered corrupt file {path}: {source}, {location}"))]
    CorruptFile {
        path: object_store::path::Path,
        source: BoxedError,
        location: Location,
    },
    #[snafu(display("TesseraError(IO): {source}, {location}"))]
    IO {
        source: BoxedError,
        location: Location,
    },
    #[snafu(display("TesseraError(Arrow): {message}, {location}"))]
    Arrow { message: String, location: Location },
    #[snafu(display("Encountered internal error: {message}, {location}"))]
    Internal { message: String, location: Location },
}

impl Error {
    pub fn invalid_input(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::InvalidInput {
            source: message.into(),
            location,
        }
    }

    pub fn dictionary_generation(message: impl Into<String>, location: Location) -> Self {
        Self::DictionaryGeneration {
            message: message.into(),
            location,
        }
    }

    pub fn not_supported(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::NotSupported {
            source: message.into(),
            location,
        }
    }

    pub fn corrupt_file(
        path: object_store::path::Path,
        message: impl Into<String>,
        location: Location,
    ) -> Self {
        let message: String = message.into();
        Self::CorruptFile {
            path,
            source: message.into(),
            location,
        }
    }

    pub fn io(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::IO {
            source: message.into(),
            location,
        }
    }

    pub fn internal(message: impl Into<String>, location: Location) -> Self {
        Self::Internal {
            message: message.into(),
            location,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<ArrowError> for Error {
    #[track_caller]
    fn from(e: ArrowError) -> Self {
        Self::Arrow {
            message: e.to_string(),
            location: to_snafu_location(std::panic::Location::caller()),
        }
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        Self::IO {
            source: box_error(e),
            location: to_snafu_location(std::panic::Location::caller()),
        }
    }
}

impl From<object_store::Error> for Error {
    #[track_caller]
    fn from(e: object_store::Error) -> Self {
        Self::IO {
            source: box_error(e),
            location: to_snafu_location(std::panic::Location::caller()),
        }
    }
}

impl From<object_store::path::Error> for Error {
    #[track_caller]
    fn from(e: object_store::path::Error) -> Self {
        Self::InvalidInput {
            source: box_error(e),
            location: to_snafu_location(std::panic::Location::caller()),
        }
    }
}

impl From<serde_json::Error> for Error {
    #[track_caller]
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidInput {
            source: box_error(e),
            location: to_snafu_location(std::panic::Location::caller()),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    #[track_caller]
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal {
            message: format!("worker task failed: {e}"),
            location: to_snafu_location(std::panic::Location::caller()),
        }
    }
}

impl From<Error> for ArrowError {
    fn from(value: Error) -> Self {
        match value {
            Error::Arrow { message, .. } => Self::ComputeError(message),
            e => Self::ExternalError(Box::new(e)),
        }
    }
}

fn to_snafu_location(loc: &'static std::panic::Location<'static>) -> Location {
    Location::new(loc.file(), loc.line(), loc.column())
}
