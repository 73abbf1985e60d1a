// Scena
// Copyright (c) 2026 The Project Scena Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `ScenaError` provides an enumeration of all possible errors reported by Scena.
#[derive(Debug)]
pub enum ScenaError {
    /// An IO error occurred while reading the stream.
    IoError(io::Error),
    /// The stream contained malformed data and could not be decoded.
    DecodeError(&'static str),
    /// An unsupported container or codec feature was encountered.
    Unsupported(&'static str),
    /// A default or user-defined limit was reached while decoding the stream. Limits are used to
    /// prevent denial-of-service attacks from malicious streams.
    LimitError(&'static str),
    /// The end of the stream was reached unexpectedly.
    EndOfFile,
}

impl fmt::Display for ScenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ScenaError::IoError(ref err) => {
                write!(f, "io error: {}", err)
            }
            ScenaError::DecodeError(msg) => {
                write!(f, "malformed stream: {}", msg)
            }
            ScenaError::Unsupported(feature) => {
                write!(f, "unsupported feature: {}", feature)
            }
            ScenaError::LimitError(constraint) => {
                write!(f, "limit reached: {}", constraint)
            }
            ScenaError::EndOfFile => {
                write!(f, "unexpected end of file")
            }
        }
    }
}

impl error::Error for ScenaError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            ScenaError::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ScenaError {
    fn from(err: io::Error) -> ScenaError {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ScenaError::EndOfFile,
            _ => ScenaError::IoError(err),
        }
    }
}

pub type Result<T> = result::Result<T, ScenaError>;

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(ScenaError::DecodeError(desc))
}

/// Convenience function to create an unsupported feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(ScenaError::Unsupported(feature))
}

/// Convenience function to create a limit error.
pub fn limit_error<T>(constraint: &'static str) -> Result<T> {
    Err(ScenaError::LimitError(constraint))
}

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(ScenaError::EndOfFile)
}
