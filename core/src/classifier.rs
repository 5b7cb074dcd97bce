//! Deciding which errors count as failures
//!
//! The error-rate collector marks a call as matched when it returned an error.
//! A classifier narrows that down, e.g. to ignore client errors while still
//! counting server errors.

use std::any::Any;

/// What a classifier gets to look at
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Breaker name
    pub circuit_name: &'a str,
    /// The error returned by the call, downcast it to inspect
    pub error: &'a dyn Any,
    /// How long the call took
    pub elapsed_ms: i64,
}

/// Decides whether an error counts toward opening the circuit
///
/// # Examples
///
/// ```rust
/// use guard_machines::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct TimeoutsOnly;
///
/// impl FailureClassifier for TimeoutsOnly {
///     fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
///         ctx.error
///             .downcast_ref::<&str>()
///             .map(|e| e.contains("timeout"))
///             .unwrap_or(false)
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// `true` if this error is a failure for breaker statistics
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Every error is a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Classifier backed by a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

/// Boolean failure signal for one call outcome
pub(crate) fn is_failure<T, E: 'static>(
    classifier: Option<&dyn FailureClassifier>,
    circuit_name: &str,
    result: &Result<T, E>,
    elapsed_ms: i64,
) -> bool {
    match (result, classifier) {
        (Ok(_), _) => false,
        (Err(_), None) => true,
        (Err(e), Some(classifier)) => classifier.should_trip(&FailureContext {
            circuit_name,
            error: e as &dyn Any,
            elapsed_ms,
        }),
    }
}
