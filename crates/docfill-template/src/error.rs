//! Error types for template rendering
//!
//! Every failure is fatal for the render call: a broken directive must never
//! silently produce an incomplete document.

use thiserror::Error;

/// Errors raised while parsing or rendering a template
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    /// Malformed expression
    #[error("Syntax error in `{expression}`: {message}")]
    Syntax {
        /// The expression text as written in the template
        expression: String,
        /// What was wrong with it
        message: String,
    },

    /// Unbalanced or malformed directive structure
    #[error("Structural error: {0}")]
    Structural(String),

    /// Expression failed during evaluation
    #[error("Evaluation error in `{expression}`: {source}")]
    Evaluation {
        /// The expression text as written in the template
        expression: String,
        /// The underlying cause
        #[source]
        source: EvalError,
    },

    /// A fragment includes itself, directly or transitively
    #[error("Fragment inclusion cycle: {}", .chain.join(" -> "))]
    Cycle {
        /// Inclusion chain, ending with the repeated fragment
        chain: Vec<String>,
    },

    /// Fragment inclusion nested deeper than allowed
    #[error("Fragment inclusion depth exceeded at `{name}` (maximum {max})")]
    DepthExceeded {
        /// Fragment that would have exceeded the limit
        name: String,
        /// Configured maximum depth
        max: usize,
    },

    /// Fragment name did not resolve
    #[error("Fragment not found: {0}")]
    FragmentNotFound(String),

    /// Invalid render configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TemplateError {
    /// Build a structural error
    pub fn structural(message: impl Into<String>) -> Self {
        TemplateError::Structural(message.into())
    }

    /// Build a syntax error for `expression`
    pub fn syntax(expression: impl Into<String>, message: impl Into<String>) -> Self {
        TemplateError::Syntax {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Prefix a structural error with where it happened; other kinds pass through
    pub(crate) fn located(self, location: impl std::fmt::Display) -> Self {
        match self {
            TemplateError::Structural(message) => {
                TemplateError::Structural(format!("{} ({})", message, location))
            }
            other => other,
        }
    }
}

/// Causes of expression evaluation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Call to a function the registry does not know
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    /// Wrong number of arguments
    #[error("function `{name}` expects {expected} argument(s), got {got}")]
    Arity {
        /// Function name
        name: String,
        /// Human-readable expected count
        expected: String,
        /// Actual count
        got: usize,
    },

    /// Operand of the wrong type
    #[error("type mismatch: {0}")]
    Type(String),

    /// Loop over a value that cannot be iterated
    #[error("{0} is not iterable")]
    NotIterable(String),

    /// Division or remainder by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Integer arithmetic overflow
    #[error("integer overflow")]
    Overflow,

    /// A function reported an error
    #[error("function `{name}` failed: {message}")]
    Function {
        /// Function name
        name: String,
        /// Error reported by the function
        message: String,
    },
}

/// Result type for template operations
pub type Result<T> = std::result::Result<T, TemplateError>;
