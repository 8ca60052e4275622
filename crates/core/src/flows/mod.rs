pub mod engine;
pub mod states;

pub use engine::{FeedbackFlow, FlowDefinition, FlowEngine, FlowTransitionError};
pub use states::{ConversationState, FlowAction, FlowEvent, RatingChoice, TransitionOutcome};
