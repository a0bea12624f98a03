// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Asynchronous persistence pipeline: a bounded queue and its single
//! batching consumer.

pub mod queue;
pub mod worker;
