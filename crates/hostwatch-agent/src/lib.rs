// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Orchestration engine of the hostwatch telemetry agent.
//!
//! Collectors produce opaque payloads that are stamped into [`envelope::Envelope`]s and
//! buffered in an [`outbox::Outbox`]. A [`scheduler::Scheduler`] drives independent periodic
//! jobs: collection, flushing through the [`transport::TransportRouter`], the ping challenge
//! and the collection-preference sync. In hub mode a [`hub::HubRelay`] accepts batches from
//! other agents into the same outbox and forwards them under their own credentials.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod app;
pub mod bootstrap;
pub mod collector;
pub mod collectors;
pub mod config;
pub mod config_sync;
pub mod envelope;
pub mod error;
pub mod flusher;
pub mod health;
pub mod host;
pub mod http_utils;
pub mod hub;
pub mod outbox;
pub mod persist;
pub mod ping;
pub mod prefs;
pub mod scheduler;
pub mod transport;

/// Version reported to the backend during bootstrap, ping and self-telemetry.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
