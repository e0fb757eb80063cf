//! Translation of interpreter failures into [`Error`] and failure reports.

use std::fmt;
use std::time::{Duration, Instant};

use rhai::{EvalAltResult, ParseError};

use crate::error::Error;
use crate::lifecycle::PluginState;

/// Why a host built-in terminated script execution.
///
/// Carried as the token of `ErrorTerminated`, which scripts cannot catch.
#[derive(Debug, Clone)]
pub(crate) enum Termination {
    Cancelled,
    LockTimeout(Duration),
}

impl Termination {
    pub(crate) fn into_eval_error(self) -> Box<EvalAltResult> {
        Box::new(EvalAltResult::ErrorTerminated(
            rhai::Dynamic::from(self),
            rhai::Position::NONE,
        ))
    }
}

/// Convert a compile failure.
pub(crate) fn from_parse_error(err: ParseError) -> Error {
    Error::load(err.to_string())
}

/// Convert a failure of top-level code during load.
pub(crate) fn from_load_error(err: Box<EvalAltResult>) -> Error {
    match from_eval_error(err) {
        Error::Raised(msg) => Error::Load(msg),
        other => other,
    }
}

/// Convert a failure raised while executing a callable.
pub(crate) fn from_eval_error(err: Box<EvalAltResult>) -> Error {
    match root_cause(&err) {
        EvalAltResult::ErrorTerminated(token, _) => {
            match token.clone().try_cast::<Termination>() {
                Some(Termination::LockTimeout(timeout)) => Error::LockTimeout(timeout),
                _ => Error::Interrupted,
            }
        }
        EvalAltResult::ErrorPropertyNotFound(key, _) => Error::KeyNotFound(key.clone()),
        EvalAltResult::ErrorIndexNotFound(index, _) => {
            let key = index
                .clone()
                .into_string()
                .unwrap_or_else(|_| index.to_string());
            Error::KeyNotFound(key)
        }
        EvalAltResult::ErrorVariableNotFound(name, _) => Error::name_not_found(name.clone()),
        // the called function was resolved before running, so an unresolved
        // function here is a failure of the running body, such as an operator
        // applied to the wrong types
        _ => Error::raised(err.to_string()),
    }
}

fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => root_cause(inner),
        EvalAltResult::ErrorInModule(_, inner, _) => root_cause(inner),
        other => other,
    }
}

/// Report of a plugin failure, as surfaced to the host.
#[derive(Debug, Clone)]
pub struct PluginFailure {
    /// Plugin name.
    pub plugin: String,
    /// Lifecycle state when the failure occurred.
    pub state: PluginState,
    /// Error category code, see [`Error::code`].
    pub code: &'static str,
    /// Human-readable description.
    pub message: String,
    /// Failure time.
    pub at: Instant,
}

impl PluginFailure {
    /// Create a failure report.
    pub fn new(plugin: impl Into<String>, state: PluginState, error: &Error) -> Self {
        Self {
            plugin: plugin.into(),
            state,
            code: error.code(),
            message: error.to_string(),
            at: Instant::now(),
        }
    }
}

impl fmt::Display for PluginFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "plugin {} failed while {}: {}",
            self.plugin, self.state, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::{Dynamic, Position};

    #[test]
    fn test_nested_errors_use_root_cause() {
        let inner = Box::new(EvalAltResult::ErrorPropertyNotFound(
            "z".into(),
            Position::NONE,
        ));
        let outer = Box::new(EvalAltResult::ErrorInFunctionCall(
            "accept_dict".into(),
            String::new(),
            inner,
            Position::NONE,
        ));

        assert!(matches!(from_eval_error(outer), Error::KeyNotFound(k) if k == "z"));
    }

    #[test]
    fn test_termination_tokens() {
        let err = Termination::Cancelled.into_eval_error();
        assert!(matches!(from_eval_error(err), Error::Interrupted));

        let err = Termination::LockTimeout(Duration::from_millis(3)).into_eval_error();
        assert!(matches!(from_eval_error(err), Error::LockTimeout(d) if d == Duration::from_millis(3)));
    }

    #[test]
    fn test_runtime_error_keeps_description() {
        let err = Box::new(EvalAltResult::ErrorRuntime(
            Dynamic::from("boom".to_string()),
            Position::NONE,
        ));
        match from_eval_error(err) {
            Error::Raised(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_function_in_body_is_raised() {
        let err = Box::new(EvalAltResult::ErrorFunctionNotFound(
            "+ (bool, i64)".into(),
            Position::NONE,
        ));
        match from_eval_error(err) {
            Error::Raised(msg) => assert!(msg.contains("+ (bool, i64)")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_load_errors() {
        let err = Box::new(EvalAltResult::ErrorRuntime(
            Dynamic::from("bad top level".to_string()),
            Position::NONE,
        ));
        assert!(matches!(from_load_error(err), Error::Load(_)));

        let err = Termination::Cancelled.into_eval_error();
        assert!(matches!(from_load_error(err), Error::Interrupted));
    }

    #[test]
    fn test_failure_report() {
        let failure = PluginFailure::new(
            "printer",
            PluginState::Looping,
            &Error::raised("division by zero"),
        );

        assert_eq!(failure.code, "raised-error");
        assert_eq!(
            failure.to_string(),
            "plugin printer failed while looping: raised error: division by zero"
        );
    }
}
