//! Failure taxonomy for the export pipeline.
//!
//! Errors travel as plain `anyhow::Error` chains. An [`ErrorKind`] can be attached
//! to a chain using [`ResultExt`] (or the [`kind_bail!`] macro) and recovered later
//! via [`error_kind`]. The orchestrator uses the kind for logging and reporting,
//! [`crate::tools::retry`] uses it to decide whether a call is worth repeating.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Classifies why a unit of work failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Login or session retrieval failed.
    Auth,
    /// Network or timeout talking to the billing service or object storage.
    Transport,
    /// Malformed JSON or a missing field in a billing response.
    Decode,
    /// Local filesystem read or write failure.
    Storage,
    /// The record store rejected the write-back after a successful upload.
    Acknowledge,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Transport => "transport",
            ErrorKind::Decode => "decode",
            ErrorKind::Storage => "storage",
            ErrorKind::Acknowledge => "acknowledge",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Wraps an error chain and tags it with a kind.
///
/// Renders as the kind followed by the outermost message of the wrapped chain, while
/// [`Error::source`] continues with the remainder of that chain.
#[derive(Debug)]
pub struct KindedError {
    pub kind: ErrorKind,
    inner: anyhow::Error,
}

impl Display for KindedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.kind, self.inner)
    }
}

impl Error for KindedError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

/// Extension trait for attaching an [`ErrorKind`] to error results.
pub trait ResultExt<T> {
    /// Wraps the error into a [`KindedError`] carrying the given kind.
    fn with_kind(self, kind: ErrorKind) -> Result<T, anyhow::Error>;

    fn mark_auth(self) -> Result<T, anyhow::Error>;

    fn mark_transport(self) -> Result<T, anyhow::Error>;

    fn mark_decode(self) -> Result<T, anyhow::Error>;

    fn mark_storage(self) -> Result<T, anyhow::Error>;

    fn mark_acknowledge(self) -> Result<T, anyhow::Error>;
}

impl<T> ResultExt<T> for Result<T, anyhow::Error> {
    fn with_kind(self, kind: ErrorKind) -> Result<T, anyhow::Error> {
        match self {
            Ok(t) => Ok(t),
            Err(inner) => Err(anyhow::Error::new(KindedError { kind, inner })),
        }
    }

    fn mark_auth(self) -> Result<T, anyhow::Error> {
        self.with_kind(ErrorKind::Auth)
    }

    fn mark_transport(self) -> Result<T, anyhow::Error> {
        self.with_kind(ErrorKind::Transport)
    }

    fn mark_decode(self) -> Result<T, anyhow::Error> {
        self.with_kind(ErrorKind::Decode)
    }

    fn mark_storage(self) -> Result<T, anyhow::Error> {
        self.with_kind(ErrorKind::Storage)
    }

    fn mark_acknowledge(self) -> Result<T, anyhow::Error> {
        self.with_kind(ErrorKind::Acknowledge)
    }
}

/// Returns the outermost kind attached to the given error, if any.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<KindedError>().map(|kinded| kinded.kind)
}

/// Early return with an error of the given kind.
#[macro_export]
macro_rules! kind_bail {
    ($kind:expr, $msg:literal $(,)?) => {
        return $crate::errors::ResultExt::with_kind(Err(::anyhow::anyhow!($msg)), $kind)
    };
    ($kind:expr, $fmt:literal, $($arg:tt)*) => {
        return $crate::errors::ResultExt::with_kind(Err(::anyhow::anyhow!($fmt, $($arg)*)), $kind)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn failing() -> anyhow::Result<()> {
        kind_bail!(ErrorKind::Decode, "field '{}' is missing", "session_id");
    }

    #[test]
    fn untagged_errors_have_no_kind() {
        let err = anyhow::anyhow!("plain failure");
        assert_eq!(error_kind(&err), None);
    }

    #[test]
    fn marked_errors_expose_their_kind() {
        let result: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset"));
        let err = result.mark_transport().unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Transport));
        assert_eq!(format!("{:#}", err), "transport error: connection reset");
    }

    #[test]
    fn nested_kinds_render_the_message_once() {
        let err = failing().mark_acknowledge().unwrap_err();

        assert_eq!(
            format!("{:#}", err),
            "acknowledge error: decode error: field 'session_id' is missing"
        );
    }

    #[test]
    fn kind_survives_additional_context() {
        let err = failing()
            .context("Failed to log in to the billing service")
            .unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Decode));
        assert_eq!(
            format!("{:#}", err),
            "Failed to log in to the billing service: decode error: field 'session_id' is missing"
        );
    }

    #[test]
    fn outermost_kind_wins() {
        let result: anyhow::Result<()> = Err(anyhow::anyhow!("disk full"));
        let err = result.mark_storage().mark_acknowledge().unwrap_err();

        assert_eq!(error_kind(&err), Some(ErrorKind::Acknowledge));
    }
}
