use crate::catalog::Category;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("wrong network: expected chain {expected}, connected to {actual}")]
    WrongNetwork { expected: u64, actual: u64 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("call rejected: {0}")]
    CallRejected(CallFailure),
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The text shown to the player for this error.
    pub fn human_message(&self) -> String {
        match self {
            Error::CallRejected(failure) => failure.human_message(),
            other => other.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

/// Raised locally before anything is sent to the ledger.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no {0} selected")]
    MissingSelection(Category),
    #[error("selected {category} {identifier} is not one of this round's options")]
    UnknownCandidate {
        category: Category,
        identifier: String,
    },
    #[error("no {0} options available")]
    EmptyOptionSet(Category),
    #[error("round options have not been loaded yet")]
    OptionsNotLoaded,
    #[error("{action} is not allowed while the round is {phase}")]
    RoundWindow {
        action: &'static str,
        phase: &'static str,
    },
    #[error("another transaction is still waiting for confirmation")]
    CallPending,
}

/// Failure details of a rejected or reverted write-call.
///
/// The fields mirror the layers a provider error usually has: the node's short
/// reason, the client's own description, and whatever caused it underneath.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallFailure {
    pub short: Option<String>,
    pub message: Option<String>,
    pub cause: Option<String>,
}

impl CallFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            short: None,
            message: Some(err.to_string()),
            cause: err.source().map(|source| source.to_string()),
        }
    }

    pub fn with_short(mut self, short: impl Into<String>) -> Self {
        self.short = Some(short.into());
        self
    }

    pub fn human_message(&self) -> String {
        [&self.short, &self.message, &self.cause]
            .into_iter()
            .flatten()
            .map(|text| text.trim())
            .find(|text| !text.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| String::from("unknown error"))
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human_message())
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn human_message__prefers_short_message() {
        // given
        let failure = CallFailure {
            short: Some("execution reverted: round expired".into()),
            message: Some("server returned an error response".into()),
            cause: Some("io".into()),
        };

        // when
        let text = failure.human_message();

        // then
        assert_eq!(text, "execution reverted: round expired");
    }

    #[test]
    fn human_message__falls_back_to_general_then_cause() {
        let general = CallFailure {
            short: Some("  ".into()),
            message: Some("user rejected the request".into()),
            cause: None,
        };
        assert_eq!(general.human_message(), "user rejected the request");

        let nested = CallFailure {
            short: None,
            message: None,
            cause: Some("connection reset".into()),
        };
        assert_eq!(nested.human_message(), "connection reset");

        assert_eq!(CallFailure::default().human_message(), "unknown error");
    }

    #[test]
    fn human_message__shows_call_failure_text_for_rejected_calls() {
        let err = Error::CallRejected(CallFailure::new("nonce too low"));
        assert_eq!(err.human_message(), "nonce too low");
        assert!(!err.is_validation());
    }
}
