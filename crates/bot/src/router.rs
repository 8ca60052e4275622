use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use feedloop_core::access::{AdminCapability, Authorization};
use feedloop_core::audit::{AuditCategory, AuditContext, AuditOutcome};
use feedloop_core::conversation::ConversationSlot;
use feedloop_core::domain::feedback::FeedbackId;
use feedloop_core::errors::ApplicationError;
use feedloop_core::flows::{
    ConversationState, FlowAction, FlowEvent, FlowTransitionError, TransitionOutcome,
};

use crate::context::BotContext;
use crate::events::{
    ActionRef, ChatId, EventSource, HandlerResult, InboundEnvelope, InboundEvent, MenuCommand,
    MessageRef, ModerationAction,
};
use crate::menus::{self, OutboundMessage};
use crate::moderation::ModerationService;
use crate::outbox::DeliveryError;
use crate::submission::{event, SubmissionService};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("reply could not be delivered: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Turns one inbound event into state transitions, storage calls and
/// replies. The user's conversation slot is held for the whole event, so
/// events from the same user never interleave.
#[derive(Clone)]
pub struct Router {
    context: Arc<BotContext>,
}

/// Per-event data threaded through the handlers.
struct Turn<'a> {
    source: &'a EventSource,
    correlation_id: &'a str,
    audit: AuditContext,
    message_ref: Option<&'a MessageRef>,
}

impl Turn<'_> {
    fn chat(&self) -> ChatId {
        self.source.chat_id
    }
}

impl Router {
    pub fn new(context: Arc<BotContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &BotContext {
        &self.context
    }

    pub async fn handle(&self, envelope: InboundEnvelope) -> Result<HandlerResult, RouteError> {
        let InboundEnvelope { correlation_id, event } = envelope;
        let Some(source) = event.source() else {
            debug!(
                event_name = "router.event_ignored",
                correlation_id = %correlation_id,
                event_kind = event.kind(),
                "event without a sender ignored"
            );
            return Ok(HandlerResult::Ignored);
        };

        let mut slot = self.context.conversations.lock(source.user_id).await;
        let turn = Turn {
            source,
            correlation_id: &correlation_id,
            audit: AuditContext::new(
                Some(source.user_id),
                None,
                correlation_id.clone(),
                format!("user:{}", source.user_id),
            ),
            message_ref: None,
        };

        let result = match &event {
            InboundEvent::StartFeedback { .. } => {
                self.advance(&mut slot, &turn, FlowEvent::StartFeedback).await
            }
            InboundEvent::Text { text, .. } => {
                self.advance(&mut slot, &turn, FlowEvent::TextReceived { text: text.clone() }).await
            }
            InboundEvent::Choice { value, message_ref, action_ref, .. } => {
                if let Some(action_ref) = action_ref {
                    self.acknowledge(action_ref, None, false, &turn).await;
                }
                let turn = Turn { message_ref: message_ref.as_ref(), ..turn };
                self.advance(&mut slot, &turn, FlowEvent::RatingChosen(*value)).await
            }
            InboundEvent::Command { command, .. } => {
                self.run_command(&mut slot, &turn, *command).await
            }
            InboundEvent::Action { target, action, message_ref, action_ref, .. } => {
                let turn = Turn { message_ref: message_ref.as_ref(), ..turn };
                self.run_action(&mut slot, &turn, target, *action, action_ref.as_ref()).await
            }
            InboundEvent::Unsupported { kind, .. } => {
                debug!(
                    event_name = "router.event_ignored",
                    correlation_id = %correlation_id,
                    user_id = source.user_id.0,
                    kind = %kind,
                    "unsupported event ignored"
                );
                Ok(HandlerResult::Ignored)
            }
        };

        info!(
            event_name = "router.event_handled",
            correlation_id = %correlation_id,
            user_id = source.user_id.0,
            event_kind = event.kind(),
            state = slot.state().name(),
            result = ?result.as_ref().ok(),
            "event handled"
        );
        self.context.conversations.release(slot).await;
        result
    }

    /// Runs a conversation event through the flow engine. The new state is
    /// committed only after every storage effect succeeded.
    async fn advance(
        &self,
        slot: &mut ConversationSlot,
        turn: &Turn<'_>,
        event: FlowEvent,
    ) -> Result<HandlerResult, RouteError> {
        let outcome = match self.context.flow.apply_with_audit(
            slot.state(),
            &event,
            self.context.audit.as_ref(),
            &turn.audit,
        ) {
            Ok(outcome) => outcome,
            Err(FlowTransitionError::InvalidTransition { .. }) => {
                return Ok(HandlerResult::Ignored);
            }
            Err(FlowTransitionError::EmptyText { state }) => {
                let reprompt = match state {
                    ConversationState::AwaitingAdminComment { .. } => menus::comment_prompt(),
                    _ => menus::empty_text_reprompt(),
                };
                self.send(turn, &reprompt).await?;
                return Ok(HandlerResult::Responded);
            }
        };

        match self.apply_effects(slot, turn, &outcome).await {
            Effects::Applied => {}
            Effects::Failed(error) => return self.reply_error(turn, error).await,
            Effects::Refused => return Ok(HandlerResult::Refused),
        }

        slot.set(outcome.to.clone());
        self.send_replies(turn, &outcome).await?;
        Ok(HandlerResult::Responded)
    }

    async fn apply_effects(
        &self,
        slot: &mut ConversationSlot,
        turn: &Turn<'_>,
        outcome: &TransitionOutcome,
    ) -> Effects {
        for action in &outcome.actions {
            match action {
                FlowAction::PersistFeedback { text, rating } => {
                    let submitted = SubmissionService::new(&self.context)
                        .submit(turn.source.author(), text.clone(), *rating, &turn.audit)
                        .await;
                    if let Err(error) = submitted {
                        return Effects::Failed(error);
                    }
                }
                FlowAction::ApplyAdminComment { target, comment } => {
                    let Ok(admin) = self.authorize(turn) else {
                        slot.clear();
                        return Effects::Refused;
                    };
                    let applied = ModerationService::new(&self.context)
                        .annotate(&admin, target, comment.clone(), &turn.audit)
                        .await;
                    match applied {
                        Ok(_) => {}
                        Err(error @ ApplicationError::NotFound(_)) => {
                            slot.clear();
                            return Effects::Failed(error);
                        }
                        Err(error) => return Effects::Failed(error),
                    }
                }
                FlowAction::PromptForText
                | FlowAction::PromptForRating
                | FlowAction::ConfirmSubmission
                | FlowAction::PromptForAdminComment { .. } => {}
            }
        }
        Effects::Applied
    }

    async fn send_replies(
        &self,
        turn: &Turn<'_>,
        outcome: &TransitionOutcome,
    ) -> Result<(), RouteError> {
        for action in &outcome.actions {
            let message = match action {
                FlowAction::PromptForText => menus::feedback_prompt(),
                FlowAction::PromptForRating => menus::rating_prompt(),
                FlowAction::ConfirmSubmission => {
                    if let Some(message_ref) = turn.message_ref {
                        self.remove_choices(message_ref, turn).await;
                    }
                    menus::submission_confirmed()
                }
                FlowAction::PromptForAdminComment { .. } => menus::comment_prompt(),
                FlowAction::ApplyAdminComment { .. } => menus::comment_applied_message(),
                FlowAction::PersistFeedback { .. } => continue,
            };
            self.send(turn, &message).await?;
        }
        Ok(())
    }

    async fn run_command(
        &self,
        slot: &mut ConversationSlot,
        turn: &Turn<'_>,
        command: MenuCommand,
    ) -> Result<HandlerResult, RouteError> {
        let admin = if command.requires_admin() {
            match self.authorize(turn) {
                Ok(admin) => Some(admin),
                Err(_) => return Ok(HandlerResult::Refused),
            }
        } else {
            None
        };

        let moderation = ModerationService::new(&self.context);
        let messages = match (command, admin) {
            (MenuCommand::Start, _) => vec![menus::welcome_message(&turn.source.display_name)],
            (MenuCommand::Help, _) => vec![menus::help_message()],
            (MenuCommand::MyFeedback, _) => {
                match SubmissionService::new(&self.context)
                    .recent_for_user(turn.source.user_id)
                    .await
                {
                    Ok(mine) => vec![menus::my_feedback_message(&mine.recent, mine.total)],
                    Err(error) => return self.reply_error(turn, error).await,
                }
            }
            (MenuCommand::AdminPanel, Some(_)) => vec![menus::admin_panel_message()],
            (MenuCommand::BackToMain, Some(_)) => vec![menus::back_to_main_message()],
            (MenuCommand::PendingFeedback, Some(admin)) => {
                match moderation.list_pending(&admin).await {
                    Ok(page) if page.is_empty() => vec![menus::nothing_pending_message()],
                    Ok(page) => {
                        let mut messages: Vec<_> =
                            page.records.iter().map(menus::pending_item_message).collect();
                        if page.fetched > page.records.len() {
                            messages.push(menus::pending_overflow_message(
                                page.records.len(),
                                page.fetched,
                            ));
                        }
                        messages
                    }
                    Err(error) => return self.reply_error(turn, error).await,
                }
            }
            (MenuCommand::AllFeedback, Some(admin)) => match moderation.list_all(&admin).await {
                Ok(page) if page.is_empty() => vec![menus::no_feedback_message()],
                Ok(page) => page.records.iter().map(menus::all_item_message).collect(),
                Err(error) => return self.reply_error(turn, error).await,
            },
            (MenuCommand::Stats, Some(admin)) => match moderation.stats(&admin).await {
                Ok(stats) => vec![menus::stats_message(&stats)],
                Err(error) => return self.reply_error(turn, error).await,
            },
            (
                MenuCommand::AdminPanel
                | MenuCommand::BackToMain
                | MenuCommand::PendingFeedback
                | MenuCommand::AllFeedback
                | MenuCommand::Stats,
                None,
            ) => return Ok(HandlerResult::Refused),
        };

        debug!(
            event_name = "router.command_served",
            correlation_id = %turn.correlation_id,
            user_id = turn.source.user_id.0,
            command = command.name(),
            state = slot.state().name(),
            "menu command served"
        );
        self.send_each(turn, &messages).await?;
        Ok(HandlerResult::Responded)
    }

    /// Sends every message of a listing. A rejected item is logged and
    /// skipped; the call fails only when nothing could be delivered.
    async fn send_each(
        &self,
        turn: &Turn<'_>,
        messages: &[OutboundMessage],
    ) -> Result<(), RouteError> {
        let mut first_error = None;
        let mut delivered = 0;
        for (index, message) in messages.iter().enumerate() {
            match self.context.outbox.send(turn.chat(), message).await {
                Ok(_) => delivered += 1,
                Err(error) => {
                    warn!(
                        event_name = "egress.bot.list_item_failed",
                        correlation_id = %turn.correlation_id,
                        user_id = turn.source.user_id.0,
                        item = index,
                        error = %error,
                        "listing item not delivered; continuing"
                    );
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) if delivered == 0 => Err(error.into()),
            _ => Ok(()),
        }
    }

    async fn run_action(
        &self,
        slot: &mut ConversationSlot,
        turn: &Turn<'_>,
        target: &FeedbackId,
        action: ModerationAction,
        action_ref: Option<&ActionRef>,
    ) -> Result<HandlerResult, RouteError> {
        let Ok(admin) = self.authorize(turn) else {
            if let Some(action_ref) = action_ref {
                self.acknowledge(action_ref, Some(menus::NOT_PERMITTED_TOAST), true, turn).await;
            }
            return Ok(HandlerResult::Refused);
        };

        let moderation = ModerationService::new(&self.context);
        let (decided, toast) = match action {
            ModerationAction::Approve => (
                moderation.approve(&admin, target, None, &turn.audit).await,
                menus::APPROVED_TOAST,
            ),
            ModerationAction::Reject => (
                moderation.reject(&admin, target, None, &turn.audit).await,
                menus::REJECTED_TOAST,
            ),
            ModerationAction::Annotate => {
                return self.start_annotation(slot, turn, &admin, target, action_ref).await;
            }
        };

        match decided {
            Ok(_) => {
                if let Some(action_ref) = action_ref {
                    self.acknowledge(action_ref, Some(toast), false, turn).await;
                }
                if let Some(message_ref) = turn.message_ref {
                    self.remove_choices(message_ref, turn).await;
                }
                Ok(HandlerResult::Processed)
            }
            Err(error) => {
                if let Some(action_ref) = action_ref {
                    self.acknowledge(action_ref, None, false, turn).await;
                }
                self.reply_error(turn, error).await
            }
        }
    }

    async fn start_annotation(
        &self,
        slot: &mut ConversationSlot,
        turn: &Turn<'_>,
        admin: &AdminCapability,
        target: &FeedbackId,
        action_ref: Option<&ActionRef>,
    ) -> Result<HandlerResult, RouteError> {
        let exists = ModerationService::new(&self.context).ensure_exists(admin, target).await;
        if let Some(action_ref) = action_ref {
            let toast = exists.as_ref().ok().map(|_| menus::COMMENT_TOAST);
            self.acknowledge(action_ref, toast, false, turn).await;
        }
        if let Err(error) = exists {
            return self.reply_error(turn, error).await;
        }

        let turn = Turn { audit: turn.audit.for_feedback(target.clone()), ..*turn };
        self.advance(slot, &turn, FlowEvent::AnnotationRequested { target: target.clone() }).await
    }

    fn authorize(&self, turn: &Turn<'_>) -> Result<AdminCapability, ApplicationError> {
        match self.context.admins.authorize(turn.source.user_id) {
            Authorization::Granted(capability) => Ok(capability),
            Authorization::Denied => {
                let error = ApplicationError::PermissionDenied;
                warn!(
                    event_name = "moderation.access_denied",
                    correlation_id = %turn.correlation_id,
                    user_id = turn.source.user_id.0,
                    error = %error,
                    "non-admin attempted an admin operation"
                );
                self.context.audit.emit(
                    event(
                        &turn.audit,
                        "moderation.access_denied",
                        AuditCategory::Moderation,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
                Err(error)
            }
        }
    }

    async fn reply_error(
        &self,
        turn: &Turn<'_>,
        error: ApplicationError,
    ) -> Result<HandlerResult, RouteError> {
        warn!(
            event_name = "router.operation_failed",
            correlation_id = %turn.correlation_id,
            user_id = turn.source.user_id.0,
            transient = error.is_transient(),
            error = %error,
            "operation failed; replying with a safe message"
        );
        let interface = error.into_interface(turn.correlation_id);
        self.send(turn, &menus::error_message(interface.user_message())).await?;
        Ok(HandlerResult::Responded)
    }

    async fn send(&self, turn: &Turn<'_>, message: &OutboundMessage) -> Result<(), RouteError> {
        self.context.outbox.send(turn.chat(), message).await?;
        Ok(())
    }

    async fn acknowledge(
        &self,
        action_ref: &ActionRef,
        text: Option<&str>,
        alert: bool,
        turn: &Turn<'_>,
    ) {
        if let Err(error) = self.context.outbox.acknowledge_action(action_ref, text, alert).await {
            warn!(
                event_name = "egress.bot.ack_failed",
                correlation_id = %turn.correlation_id,
                error = %error,
                "failed to acknowledge button press"
            );
        }
    }

    async fn remove_choices(&self, message_ref: &MessageRef, turn: &Turn<'_>) {
        if let Err(error) = self.context.outbox.edit_prior_message(message_ref, true).await {
            warn!(
                event_name = "egress.bot.edit_failed",
                correlation_id = %turn.correlation_id,
                message_id = message_ref.message_id,
                error = %error,
                "failed to remove buttons from prior message"
            );
        }
    }
}

enum Effects {
    Applied,
    Failed(ApplicationError),
    Refused,
}
