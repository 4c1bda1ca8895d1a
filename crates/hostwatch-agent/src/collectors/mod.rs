// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Built-in [`Collector`](crate::collector::Collector) implementations.
//!
//! Collectors fail soft: a probe that is unavailable on this host leaves its section out
//! instead of failing the whole collection.

pub mod host;
pub mod oslogs;

pub use host::HostCollector;
pub use oslogs::OsLogCollector;
