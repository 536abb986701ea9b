// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure: wires the clock-free domain logic in
//! `enclavejs-core::domain::reconnection` to real `tokio::time`.

pub mod reconnection;
