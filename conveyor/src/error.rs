//! Error types and result definitions for batching stages.
//!
//! [`ConveyorError`] is cheap to clone: a single downstream result is forwarded to every
//! transaction that contributed to a batch, so failures are cloned once per contributor. Sources
//! are kept behind an [`Arc`] for the same reason.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use conveyor_config::shared::ValidationError;

/// Convenient result type for conveyor operations.
pub type ConveyorResult<T> = Result<T, ConveyorError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Main error type of the crate.
///
/// Holds either a single classified error or several aggregated errors, e.g. all failures
/// collected while forwarding one result to many contributors.
#[derive(Debug, Clone)]
pub struct ConveyorError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    Many {
        errors: Vec<ConveyorError>,
        location: &'static Location<'static>,
    },
}

/// Classification of conveyor errors.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Shutdown errors
    /// A forced close interrupted sending a batch downstream.
    SendCancelled,
    /// A forced close interrupted forwarding a result to a contributor.
    AckForwardCancelled,
    /// A stage did not close within the caller's budget, even after forcing closure.
    ShutdownTimeout,

    // Delivery errors
    /// The producer stopped waiting for the result of its transaction.
    AckReceiverDropped,
    /// The downstream consumer went away before a batch could be delivered.
    DownstreamClosed,
    /// The downstream consumer rejected a batch.
    DownstreamRejected,

    // Wiring & state errors
    /// The transaction stream of an input was already handed out.
    InputAlreadyTaken,
    InvalidState,
    ConfigError,
    StagePanic,

    Unknown,
}

impl ConveyorError {
    /// Returns the [`ErrorKind`] of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the dynamic detail of this error, or of the first aggregated error having one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|err| err.detail()),
        }
    }

    /// Returns the location where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error. Ignored on aggregated errors.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        ConveyorError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source: None,
                location: Location::caller(),
            }),
        }
    }
}

impl PartialEq for ConveyorError {
    fn eq(&self, other: &ConveyorError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => {
                a.kind == b.kind && a.description == b.description
            }
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ConveyorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                write!(
                    f,
                    "[{:?}] {} @ {}:{}",
                    payload.kind,
                    payload.description,
                    payload.location.file(),
                    payload.location.line()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail: {detail}")?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} errors aggregated @ {}:{}",
                    errors.len(),
                    location.file(),
                    location.line()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    for (line_index, line) in error.to_string().lines().enumerate() {
                        if line_index == 0 {
                            write!(f, "\n  {}. {line}", index + 1)?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for ConveyorError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for ConveyorError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> ConveyorError {
        ConveyorError::from_components(kind, Cow::Borrowed(description), None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for ConveyorError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, D)) -> ConveyorError {
        ConveyorError::from_components(kind, Cow::Borrowed(description), Some(detail.into()))
    }
}

/// Aggregates errors. A single error is returned as is.
impl<E> From<Vec<E>> for ConveyorError
where
    E: Into<ConveyorError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> ConveyorError {
        let location = Location::caller();
        let mut errors: Vec<ConveyorError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        ConveyorError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<ValidationError> for ConveyorError {
    #[track_caller]
    fn from(err: ValidationError) -> ConveyorError {
        ConveyorError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid batcher configuration"),
            Some(Cow::Owned(err.to_string())),
        )
        .with_source(err)
    }
}

impl From<tokio::task::JoinError> for ConveyorError {
    #[track_caller]
    fn from(err: tokio::task::JoinError) -> ConveyorError {
        let description = if err.is_cancelled() {
            "Batching stage task was cancelled"
        } else {
            "Batching stage task panicked"
        };

        ConveyorError::from_components(
            ErrorKind::StagePanic,
            Cow::Borrowed(description),
            Some(Cow::Owned(err.to_string())),
        )
        .with_source(err)
    }
}
