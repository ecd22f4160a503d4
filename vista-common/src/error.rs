// Copyright 2025 vista Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    backtrace::Backtrace,
    fmt::{Debug, Display},
    sync::Arc,
};

/// Kinds of [`Error`] raised by vista.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// I/O error.
    Io,
    /// Config error, e.g. an invalid or conflicting format.
    Config,
    /// The fetcher reported a failure.
    FetchFailed,
    /// The transform hook rejected the fetched data.
    TransformFailed,
    /// The disk tier could not be read or written.
    StorageUnavailable,
    /// A completion arrived for a request that was canceled or superseded.
    StaleCompletion,
    /// The request was canceled before it completed.
    Cancelled,
    /// Encoding or decoding an image failed.
    Codec,
    /// Checksum mismatch of a persisted entry.
    ChecksumMismatch,
    /// Magic or version mismatch of a persisted entry.
    MagicMismatch,
    /// A spawned task failed to join.
    Join,
}

impl ErrorKind {
    /// Convert self into static str.
    pub fn into_static(self) -> &'static str {
        self.into()
    }

    /// Whether errors of this kind are delivered to callers waiting on a request.
    ///
    /// Storage errors are absorbed by the cache engine and never reach a caller.
    pub fn is_user_visible(self) -> bool {
        matches!(
            self,
            ErrorKind::FetchFailed | ErrorKind::TransformFailed | ErrorKind::Cancelled | ErrorKind::Config
        )
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

impl From<ErrorKind> for &'static str {
    fn from(v: ErrorKind) -> &'static str {
        match v {
            ErrorKind::Io => "I/O error",
            ErrorKind::Config => "Config error",
            ErrorKind::FetchFailed => "Fetch failed",
            ErrorKind::TransformFailed => "Transform failed",
            ErrorKind::StorageUnavailable => "Storage unavailable",
            ErrorKind::StaleCompletion => "Stale completion",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Codec => "Codec error",
            ErrorKind::ChecksumMismatch => "Checksum mismatch",
            ErrorKind::MagicMismatch => "Magic mismatch",
            ErrorKind::Join => "Join error",
        }
    }
}

/// Error is the error struct returned by all vista functions.
///
/// The source error is shared, so cloning an error is cheap enough to deliver one
/// failure to every caller waiting on the same request.
///
/// `Display` prints a single line:
///
/// ```shell
/// Fetch failed, context: { key: photo1 } => file not found, source: No such file or directory (os error 2)
/// ```
///
/// `Debug` prints the same information on multiple lines together with the captured
/// backtrace, and `{:#?}` falls back to a struct-style representation.
pub struct Error {
    kind: ErrorKind,
    message: String,

    context: Vec<(&'static str, String)>,

    source: Option<Arc<anyhow::Error>>,
    backtrace: Option<Arc<Backtrace>>,
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            return f
                .debug_struct("Error")
                .field("kind", &self.kind)
                .field("message", &self.message)
                .field("context", &self.context)
                .field("source", &self.source)
                .field("backtrace", &self.backtrace)
                .finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "  {k}: {v}")?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Source:")?;
            writeln!(f, "  {source:#}")?;
        }

        if let Some(backtrace) = &self.backtrace {
            writeln!(f)?;
            writeln!(f, "Backtrace:")?;
            writeln!(f, "{backtrace}")?;
        }

        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            let context = self
                .context
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, ", context: {{ {context} }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref().as_ref())
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            context: self.context.clone(),
            source: self.source.clone(),
            backtrace: self.backtrace.clone(),
        }
    }
}

impl Error {
    /// Create a new error.
    ///
    /// ```rust
    /// # use vista_common::error::{Error, ErrorKind};
    /// let io_error = std::io::Error::other("disk unplugged");
    /// Error::new(ErrorKind::StorageUnavailable, "cannot write entry").with_source(io_error);
    /// ```
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
            source: None,
            backtrace: Some(Arc::new(Backtrace::capture())),
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Set source for error.
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");
        self.source = Some(Arc::new(source.into()));
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the error context.
    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Get the error backtrace.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }

    /// Get the error source.
    pub fn source(&self) -> Option<&anyhow::Error> {
        self.source.as_deref()
    }

    /// Downcast the reference of the source error to a specific error type reference.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
    }
}

/// Result type for vista.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Helper for creating an [`ErrorKind::FetchFailed`] error.
    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FetchFailed, message)
    }

    /// Helper for creating an [`ErrorKind::TransformFailed`] error.
    pub fn transform_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransformFailed, message)
    }

    /// Helper for creating an [`ErrorKind::Cancelled`] error.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request canceled")
    }

    /// Helper for creating an [`ErrorKind::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Helper for creating an [`ErrorKind::StorageUnavailable`] error from [`std::io::Error`].
    pub fn storage(source: std::io::Error) -> Self {
        Self::new(ErrorKind::StorageUnavailable, "disk tier I/O failed").with_source(source)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, "I/O error").with_source(e)
    }
}
