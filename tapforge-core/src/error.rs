use bitcoin::Amount;
use bitcoin::Sequence;
use std::error::Error as StdError;
use std::fmt;

type Source = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug)]
pub struct Error {
    inner: Box<ErrorImpl>,
}

#[derive(Debug)]
struct ErrorImpl {
    kind: Kind,
    cause: Option<Error>,
}

#[derive(Debug)]
enum Kind {
    /// Ad-hoc error.
    AdHoc(Source),
    /// The same leaf label was inserted twice into one tree builder.
    DuplicateLabel { label: String },
    /// A leaf label that does not exist in the program.
    UnknownLeaf { label: String },
    /// A spend builder operation was invoked out of order.
    InvalidBuilderState {
        operation: &'static str,
        state: &'static str,
    },
    /// No single UTXO covers the requested amount.
    InsufficientFunds { needed: Amount, largest: Amount },
    /// The revealed preimage does not hash to the committed target.
    PreimageMismatch,
    /// A relative timelock that could never be satisfied.
    InvalidTimelock { sequence: Sequence },
    /// An error related to cryptography.
    Crypto(Source),
    /// An error related to constructing Bitcoin transactions.
    Transaction(Source),
    /// An error surfaced, unmodified, by the chain-data collaborator.
    Explorer(Source),
}

/// The category of an [`Error`], for callers that need to distinguish the
/// failure condition programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    DuplicateLabel,
    UnknownLeaf,
    InvalidBuilderState,
    InsufficientFunds,
    PreimageMismatch,
    InvalidTimelock,
    Crypto,
    Transaction,
    Explorer,
    Other,
}

impl Error {
    fn new(kind: Kind) -> Self {
        Self {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.inner.kind {
            Kind::AdHoc(_) => ErrorKind::Other,
            Kind::DuplicateLabel { .. } => ErrorKind::DuplicateLabel,
            Kind::UnknownLeaf { .. } => ErrorKind::UnknownLeaf,
            Kind::InvalidBuilderState { .. } => ErrorKind::InvalidBuilderState,
            Kind::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Kind::PreimageMismatch => ErrorKind::PreimageMismatch,
            Kind::InvalidTimelock { .. } => ErrorKind::InvalidTimelock,
            Kind::Crypto(_) => ErrorKind::Crypto,
            Kind::Transaction(_) => ErrorKind::Transaction,
            Kind::Explorer(_) => ErrorKind::Explorer,
        }
    }

    pub fn ad_hoc(source: impl Into<Source>) -> Self {
        Error::new(Kind::AdHoc(source.into()))
    }

    /// Wrap an error produced by a chain-data collaborator.
    pub fn explorer(source: impl Into<Source>) -> Self {
        Error::new(Kind::Explorer(source.into()))
    }

    pub(crate) fn duplicate_label(label: impl Into<String>) -> Self {
        Error::new(Kind::DuplicateLabel {
            label: label.into(),
        })
    }

    pub(crate) fn unknown_leaf(label: impl Into<String>) -> Self {
        Error::new(Kind::UnknownLeaf {
            label: label.into(),
        })
    }

    pub(crate) fn invalid_builder_state(operation: &'static str, state: &'static str) -> Self {
        Error::new(Kind::InvalidBuilderState { operation, state })
    }

    pub(crate) fn insufficient_funds(needed: Amount, largest: Amount) -> Self {
        Error::new(Kind::InsufficientFunds { needed, largest })
    }

    pub(crate) fn preimage_mismatch() -> Self {
        Error::new(Kind::PreimageMismatch)
    }

    pub(crate) fn invalid_timelock(sequence: Sequence) -> Self {
        Error::new(Kind::InvalidTimelock { sequence })
    }

    pub(crate) fn crypto(source: impl Into<Source>) -> Self {
        Error::new(Kind::Crypto(source.into()))
    }

    pub(crate) fn transaction(source: impl Into<Source>) -> Self {
        Error::new(Kind::Transaction(source.into()))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut err = self;
        loop {
            write!(f, "{}", err.inner.kind)?;
            err = match err.inner.cause.as_ref() {
                None => break,
                Some(err) => err,
            };
            write!(f, ": ")?;
        }
        Ok(())
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::AdHoc(source) => source.fmt(f),
            Kind::DuplicateLabel { label } => {
                write!(f, "duplicate leaf label \"{label}\"")
            }
            Kind::UnknownLeaf { label } => {
                write!(f, "no leaf with label \"{label}\"")
            }
            Kind::InvalidBuilderState { operation, state } => {
                write!(f, "cannot {operation} while {state}")
            }
            Kind::InsufficientFunds { needed, largest } => {
                write!(
                    f,
                    "insufficient funds: no single UTXO covers {needed} (largest candidate: {largest})"
                )
            }
            Kind::PreimageMismatch => {
                f.write_str("preimage does not hash to the committed target")
            }
            Kind::InvalidTimelock { sequence } => {
                write!(f, "invalid relative timelock (sequence {sequence})")
            }
            Kind::Crypto(source) => source.fmt(f),
            Kind::Transaction(source) => source.fmt(f),
            Kind::Explorer(source) => source.fmt(f),
        }
    }
}

impl StdError for Error {}

pub trait IntoError {
    fn into_error(self) -> Error;
}

impl IntoError for Error {
    fn into_error(self) -> Error {
        self
    }
}

impl IntoError for &'static str {
    fn into_error(self) -> Error {
        Error::ad_hoc(self)
    }
}

impl IntoError for String {
    fn into_error(self) -> Error {
        Error::ad_hoc(self)
    }
}

/// A trait for contextualizing error values.
///
/// This makes it easy to contextualize either `Error` or `Result<T, Error>`.
/// Specifically, in the latter case, it absolves one of the need to call
/// `map_err` everywhere one wants to add context to an error.
pub trait ErrorContext {
    /// Contextualize the given consequent error with this (`self`) error as
    /// the cause.
    ///
    /// Note that if an `Error` is given for the consequent, it must not
    /// already have a cause. (The causal chain is a linked list, not a tree.)
    fn context(self, consequent: impl IntoError) -> Self;

    /// Like `context`, but hides error construction within a closure.
    ///
    /// Useful when building the consequent error allocates; the closure
    /// avoids paying that cost on the happy path.
    fn with_context<E: IntoError>(self, consequent: impl FnOnce() -> E) -> Self;
}

impl ErrorContext for Error {
    fn context(self, consequent: impl IntoError) -> Error {
        let mut err = consequent.into_error();
        assert!(
            err.inner.cause.is_none(),
            "cause of consequence must be `None`"
        );

        err.inner.cause = Some(self);
        err
    }

    fn with_context<E: IntoError>(self, consequent: impl FnOnce() -> E) -> Error {
        let mut err = consequent().into_error();
        assert!(
            err.inner.cause.is_none(),
            "cause of consequence must be `None`"
        );

        err.inner.cause = Some(self);
        err
    }
}

impl<T> ErrorContext for Result<T, Error> {
    fn context(self, consequent: impl IntoError) -> Result<T, Error> {
        self.map_err(|err| err.context(consequent))
    }

    fn with_context<E: IntoError>(self, consequent: impl FnOnce() -> E) -> Result<T, Error> {
        self.map_err(|err| err.with_context(consequent))
    }
}
