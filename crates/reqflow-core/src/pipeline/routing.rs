//! Routing controller
//!
//! Picks the next stage from the persisted fields of the run state alone,
//! so a resumed run re-enters at the same point without re-running finished
//! stages.
//!
//! Priority after a stage completes:
//! 1. A review that was abandoned ends the run.
//! 2. An unrecoverable failure routes to Review, or ends the run when a
//!    review is not possible (non-interactive, or no strategy yet).
//! 3. Otherwise the edge for the last completed stage; after Validate the
//!    quality gate decides between Document, another Decompose iteration and
//!    Review.

use tracing::debug;

use crate::domain::{ReviewDecision, ReviewReason, RunState, Stage};
use crate::quality::{Dimension, Issue, gate};

/// Side effects applied to the state when entering the next stage
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Enter the stage with no control-field changes
    Proceed,
    /// First entry into Decompose: iteration becomes 1
    BeginDecomposition,
    /// Gate failed with iterations left: iteration + 1 and attach guidance
    Refine(Vec<Issue>),
    /// Suspend for a review decision
    RequestReview(ReviewReason),
    /// Re-enter Decompose after a revise decision, keeping the iteration count
    Revise(Vec<Issue>),
}

impl Transition {
    /// Apply the control-field changes of this transition
    pub fn apply(self, state: &mut RunState) {
        match self {
            Transition::Proceed => {}
            Transition::BeginDecomposition => {
                state.iteration += 1;
            }
            Transition::Refine(guidance) => {
                state.iteration += 1;
                state.refinement_guidance = guidance;
            }
            Transition::RequestReview(reason) => {
                if reason != ReviewReason::StrategyCheckpoint {
                    state.human_review_required = true;
                }
                state.pending_review = Some(reason);
            }
            Transition::Revise(guidance) => {
                state.refinement_guidance = guidance;
            }
        }
    }
}

/// Routing decision
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Enter(Stage, Transition),
    /// Document finished
    Complete,
    /// Done-with-error
    Abort(String),
}

impl Route {
    fn enter(stage: Stage) -> Self {
        Route::Enter(stage, Transition::Proceed)
    }
}

/// Next route for the given state
pub fn next(state: &RunState) -> Route {
    let route = decide(state);
    debug!(run_id = %state.run_id, last = ?state.last_completed, ?route, "Routing decision");
    route
}

fn decide(state: &RunState) -> Route {
    if state.last_completed == Some(Stage::Document) {
        return Route::Complete;
    }

    if state.last_completed == Some(Stage::Review) {
        if let Some(review) = state
            .last_review()
            .filter(|r| r.decision == ReviewDecision::Abandon)
        {
            return Route::Abort(format!("review abandoned ({})", review.reason));
        }
    }

    if let Some(failure) = &state.failure {
        let reviewable = state.input.interactive
            && state.strategy.is_some()
            && !matches!(failure.stage, Stage::Review | Stage::Document);
        return if reviewable {
            Route::Enter(Stage::Review, Transition::RequestReview(ReviewReason::Failure))
        } else {
            Route::Abort(format!("{} failed ({}): {}", failure.stage, failure.kind, failure.message))
        };
    }

    match state.last_completed {
        None => Route::enter(Stage::Extract),
        Some(Stage::Extract) => {
            if state.extracted.as_ref().is_some_and(|items| !items.is_empty()) {
                Route::enter(Stage::Analyze)
            } else {
                Route::enter(Stage::Document)
            }
        }
        Some(Stage::Analyze) => {
            if state.input.review_before_decompose {
                Route::Enter(
                    Stage::Review,
                    Transition::RequestReview(ReviewReason::StrategyCheckpoint),
                )
            } else {
                Route::Enter(Stage::Decompose, Transition::BeginDecomposition)
            }
        }
        Some(Stage::Decompose) => Route::enter(Stage::Validate),
        Some(Stage::Validate) => after_validate(state),
        Some(Stage::Review) => after_review(state),
        Some(Stage::Document) => Route::Complete,
    }
}

fn after_validate(state: &RunState) -> Route {
    let Some(metrics) = &state.quality else {
        return Route::Abort("validation produced no quality metrics".to_string());
    };
    let outcome = gate::evaluate(metrics, state.input.quality_threshold);

    if outcome.passed {
        Route::enter(Stage::Document)
    } else if state.iteration < state.input.max_iterations {
        Route::Enter(Stage::Decompose, Transition::Refine(metrics.issues.clone()))
    } else {
        Route::Enter(
            Stage::Review,
            Transition::RequestReview(ReviewReason::GateExhausted),
        )
    }
}

fn after_review(state: &RunState) -> Route {
    let Some(review) = state.last_review() else {
        return Route::Abort("review completed without a decision".to_string());
    };
    let guidance = match &review.resolved_failure {
        Some(failure) => vec![
            Issue::critical(Dimension::Traceability, failure.message.clone())
                .with_suggestion("Regenerate the items so they follow the binding strategy"),
        ],
        None => state
            .quality
            .as_ref()
            .map(|m| m.issues.clone())
            .unwrap_or_default(),
    };

    match (review.reason, review.decision) {
        (_, ReviewDecision::Abandon) => Route::Abort(format!("review abandoned ({})", review.reason)),
        (ReviewReason::StrategyCheckpoint, _) if state.iteration == 0 => {
            Route::Enter(Stage::Decompose, Transition::BeginDecomposition)
        }
        (ReviewReason::StrategyCheckpoint, _) => {
            Route::Enter(Stage::Decompose, Transition::Revise(Vec::new()))
        }
        (_, ReviewDecision::Approve) => Route::enter(Stage::Document),
        (_, ReviewDecision::Revise) => Route::Enter(Stage::Decompose, Transition::Revise(guidance)),
    }
}
