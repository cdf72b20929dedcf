use crate::fetch::FetchError;
use log::warn;
use std::fmt::Display;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("an HTMLElement or SVGElement is required; got {0}")]
    InvalidInput(String),
    #[error("attempted to render non-SVG element <{0}>")]
    NonSvgElement(String),
    #[error("could not determine the size of <{0}>; pass an explicit width and height")]
    MissingDimensions(String),
    #[error("could not load {url}")]
    ImageLoad {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("could not decode image {url}: {reason}")]
    ImageDecode { url: String, reason: String },
    #[error("failed to allocate a {width}x{height} drawing surface")]
    SurfaceAlloc { width: u32, height: u32 },
    #[error("failed to encode PNG")]
    PngEncode,
    #[error("invalid data URI: {0}")]
    InvalidDataUri(String),
    #[error("character {0:?} is outside the single-byte range")]
    InvalidCharacter(char),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How a pipeline stage treats a failed dependency.
///
/// Missing fonts and unreadable stylesheets degrade the output (a fallback typeface, fewer rules)
/// and are only logged. A missing image changes what is drawn, so it aborts the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log a warning and carry on without the failed piece.
    Tolerant,
    /// Hand the error to the caller.
    Fatal,
}

/// Stylesheet access and selector syntax problems.
pub const STYLESHEET_FAILURES: FailurePolicy = FailurePolicy::Tolerant;
/// Font fetch failures and aborts.
pub const FONT_FAILURES: FailurePolicy = FailurePolicy::Tolerant;
/// Image fetch and decode failures.
pub const IMAGE_FAILURES: FailurePolicy = FailurePolicy::Fatal;

impl FailurePolicy {
    /// `Ok(Some(_))` on success. On failure a tolerant policy logs `context` with the error and
    /// returns `Ok(None)`; a fatal one returns the error.
    pub fn handle<T, E: Display>(
        self,
        context: impl Display,
        result: std::result::Result<T, E>,
    ) -> std::result::Result<Option<T>, E> {
        match (self, result) {
            (_, Ok(value)) => Ok(Some(value)),
            (FailurePolicy::Tolerant, Err(err)) => {
                warn!("{}: {}", context, err);
                Ok(None)
            }
            (FailurePolicy::Fatal, Err(err)) => Err(err),
        }
    }

    /// Shorthand for tolerant call sites, where the error can never come back.
    pub fn tolerate<T, E: Display>(
        self,
        context: impl Display,
        result: std::result::Result<T, E>,
    ) -> Option<T> {
        match self.handle(context, result) {
            Ok(value) => value,
            Err(_) => None,
        }
    }
}
