//! Error and warning types for the handler stack.

use thiserror::Error;

pub type Result<T, E = PoutineError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoutineError {
    #[error("naming conflict at site '{name}': {reason}")]
    NamingConflict { name: String, reason: String },

    #[error(
        "at iaranges \"{name}\" and \"{other}\", collide at dim={dim}; \
         try moving the dim of one iarange to the left, e.g. dim={suggested}"
    )]
    AxisCollision {
        name: String,
        other: String,
        dim: isize,
        suggested: isize,
    },

    #[error(
        "subsample_size does not match len(subsample), {given} vs {actual}. \
         Did you accidentally use different subsample_size in the model and guide?"
    )]
    SubsampleSizeMismatch { given: usize, actual: usize },

    #[error("subsampling with a non-trivial sample shape {sample_shape:?} is not implemented")]
    UnsupportedShape { sample_shape: Vec<usize> },

    #[error("iarange \"{name}\" was given a subsample or subsample_size but no size")]
    SubsampleWithoutSize { name: String },

    #[error("invalid subsample for iarange \"{name}\": {reason}")]
    InvalidSubsample { name: String, reason: String },

    #[error("duplicate iarange \"{name}\"")]
    DuplicateIndependenceContext { name: String },

    #[error("expected dim < 0 to index from the right for iarange \"{name}\", actual {dim}")]
    InvalidDim { name: String, dim: isize },

    #[error("iarange \"{name}\" does not hold dim={dim} (found {found:?})")]
    DimNotHeld {
        name: String,
        dim: isize,
        found: Option<String>,
    },

    #[error("trying to observe a value outside of inference at {name}")]
    OutsideInference { name: String },

    #[error("parameter '{name}' is not in the param store and no initial value was given")]
    ParamNotFound { name: String },

    #[error("improper module name '{name}', since it contains {divider}")]
    InvalidModuleName { name: String, divider: &'static str },

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("site '{name}' must be a latent sample site in the replayed trace")]
    ReplayMismatch { name: String },

    #[error("site '{name}' left the handler stack without a value")]
    Unresolved { name: String },

    #[error("distribution error: {message}")]
    Distribution { message: String },
}

impl PoutineError {
    pub fn naming_conflict(name: impl Into<String>, reason: impl Into<String>) -> Self {
        PoutineError::NamingConflict {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn axis_collision(name: impl Into<String>, other: impl Into<String>, dim: isize) -> Self {
        PoutineError::AxisCollision {
            name: name.into(),
            other: other.into(),
            dim,
            suggested: dim - 1,
        }
    }

    pub fn subsample_size_mismatch(given: usize, actual: usize) -> Self {
        PoutineError::SubsampleSizeMismatch { given, actual }
    }

    pub fn invalid_subsample(name: impl Into<String>, reason: impl Into<String>) -> Self {
        PoutineError::InvalidSubsample {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported_shape(sample_shape: &[usize]) -> Self {
        PoutineError::UnsupportedShape {
            sample_shape: sample_shape.to_vec(),
        }
    }

    pub fn distribution(message: impl Into<String>) -> Self {
        PoutineError::Distribution {
            message: message.into(),
        }
    }

    /// True for the conditions the error taxonomy classifies as "not implemented".
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, PoutineError::UnsupportedShape { .. })
    }
}

/// Recoverable conditions. Execution continues with a well-defined fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoutineWarning {
    #[error("trying to observe a value outside of inference at {name}")]
    OutsideInference { name: String },

    #[error("site '{name}' observed twice with the same value")]
    DuplicateObservation { name: String },
}

impl PoutineWarning {
    pub fn site_name(&self) -> &str {
        match self {
            PoutineWarning::OutsideInference { name }
            | PoutineWarning::DuplicateObservation { name } => name,
        }
    }
}
