//! Macros for building [`crate::error::ConveyorError`] values.

/// Creates a [`crate::error::ConveyorError`] from a kind, a static description and an optional
/// detail (anything implementing [`ToString`]) or source error.
#[macro_export]
macro_rules! conveyor_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::ConveyorError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::ConveyorError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::ConveyorError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::ConveyorError::from(($kind, $desc, $detail.to_string()))
            .with_source($source)
    };
}

/// Returns early with a [`crate::error::ConveyorError`] built by [`conveyor_error!`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)+) => {
        return ::core::result::Result::Err($crate::conveyor_error!($($arg)+))
    };
}
