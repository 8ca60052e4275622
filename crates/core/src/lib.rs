pub mod access;
pub mod audit;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod flows;

pub use access::{AdminAllowList, AdminCapability, Authorization};
pub use conversation::{ConversationSlot, ConversationStore};
pub use domain::feedback::{
    Author, FeedbackId, FeedbackRecord, FeedbackStats, FeedbackStatus, Moderation, NewFeedback,
    Rating, UserId, Verdict,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{ConversationState, FlowAction, FlowEngine, FlowEvent, RatingChoice};
