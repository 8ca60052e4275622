use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{ConversationState, FlowAction, FlowEvent, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> ConversationState;
    fn transition(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The two-step feedback conversation plus the admin comment sub-state.
#[derive(Clone, Debug, Default)]
pub struct FeedbackFlow;

impl FlowDefinition for FeedbackFlow {
    fn initial_state(&self) -> ConversationState {
        ConversationState::Idle
    }

    fn transition(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_feedback(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> ConversationState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &ConversationState,
        event: &FlowEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.user_id,
                        audit.feedback_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.name())
                    .with_metadata("to", outcome.to.name())
                    .with_metadata("event", outcome.event.name()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.user_id,
                        audit.feedback_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<FeedbackFlow> {
    fn default() -> Self {
        Self::new(FeedbackFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("empty text received while {}", .state.name())]
    EmptyText { state: ConversationState },
    #[error("event {} does not apply while {}", .event.name(), .state.name())]
    InvalidTransition { state: ConversationState, event: FlowEvent },
}

impl FlowTransitionError {
    /// Events that simply do not belong to the current step. Callers drop
    /// them without replying.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

fn transition_feedback(
    current: &ConversationState,
    event: &FlowEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ConversationState::{AwaitingAdminComment, AwaitingRating, AwaitingText, Idle};
    use FlowAction::{
        ApplyAdminComment, ConfirmSubmission, PersistFeedback, PromptForAdminComment,
        PromptForRating, PromptForText,
    };
    use FlowEvent::{AnnotationRequested, RatingChosen, StartFeedback, TextReceived};

    let (to, actions) = match (current, event) {
        (_, StartFeedback) => (AwaitingText, vec![PromptForText]),
        (_, AnnotationRequested { target }) => (
            AwaitingAdminComment { target: target.clone() },
            vec![PromptForAdminComment { target: target.clone() }],
        ),
        (AwaitingText | AwaitingAdminComment { .. }, TextReceived { text })
            if text.trim().is_empty() =>
        {
            return Err(FlowTransitionError::EmptyText { state: current.clone() });
        }
        (AwaitingText, TextReceived { text }) => {
            (AwaitingRating { text: text.clone() }, vec![PromptForRating])
        }
        (AwaitingRating { text }, RatingChosen(choice)) => (
            Idle,
            vec![PersistFeedback { text: text.clone(), rating: choice.rating() }, ConfirmSubmission],
        ),
        (AwaitingAdminComment { target }, TextReceived { text }) => {
            (Idle, vec![ApplyAdminComment { target: target.clone(), comment: text.clone() }])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}
