//! # sockline-core
//!
//! Foundation types for the sockline persistent-socket client.
//!
//! This crate provides the shared vocabulary the client crate is built on:
//!
//! - **Session ids**: [`SessionId`] newtype and the [`SessionIdAllocator`]
//!   that hands out request keys spaced by [`SESSION_ID_SHIFT`]
//! - **Delivery statuses**: [`MessageStatus`], the ordered status set every
//!   in-flight message moves through
//! - **Wire frames**: request/confirm encoding and inbound frame
//!   classification in [`wire`]
//! - **Backoff**: reconnect delay calculation in [`retry`]
//! - **Logging**: `tracing` subscriber bootstrap in [`logging`]

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod retry;
pub mod status;
pub mod wire;

pub use ids::{SESSION_ID_SHIFT, SessionId, SessionIdAllocator};
pub use retry::Backoff;
pub use status::MessageStatus;
pub use wire::{FrameKind, InboundFrame, WireError};
