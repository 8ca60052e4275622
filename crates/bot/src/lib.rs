//! Telegram bot interface for feedloop
//!
//! This crate turns messaging-platform updates into feedback submissions and
//! moderation decisions:
//! - **Events** (`events`, `commands`) - inbound update model, menu labels, callback payloads
//! - **Router** (`router`) - per-user serialized handling of one event at a time
//! - **Services** (`submission`, `moderation`) - storage calls, audit events, admin gating
//! - **Notifications** (`notify`) - concurrent admin fan-out with per-send timeouts
//! - **Menus** (`menus`) - message templates and button layouts
//! - **Transport** (`runner`, `telegram`) - long polling loop and the Bot API adapter
//!
//! # Architecture
//!
//! ```text
//! getUpdates → PollingRunner → Router → FlowEngine / ModerationService → FeedbackRepository
//!                                 ↓                                  ↓
//!                              Outbox  ←──────────────────────── Notifier
//! ```
//!
//! # Key Types
//!
//! - `PollingRunner` - polling loop with backoff and per-user task grouping
//! - `Router` - dispatches `InboundEvent`s against the conversation store
//! - `BotContext` - repository, allow-list, outbox and notifier built once at startup
//! - `Outbox` - outbound messaging trait, implemented by `TelegramClient`

pub mod commands;
pub mod context;
pub mod events;
pub mod menus;
pub mod moderation;
pub mod notify;
pub mod outbox;
pub mod router;
pub mod runner;
pub mod submission;
pub mod telegram;

pub use context::BotContext;
pub use events::{EventSource, HandlerResult, InboundEnvelope, InboundEvent};
pub use outbox::{DeliveryError, Outbox, RecordingOutbox};
pub use router::{RouteError, Router};
pub use runner::{PollingRunner, RetryPolicy, TransportError, UpdateSource};
pub use telegram::TelegramClient;
