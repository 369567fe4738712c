// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test-only utilities and mock implementations for the kvfs engine
//!
//! Provides a fault-injecting decorator over any store adapter so tests can
//! exercise error handling without a real failing backend.

#[cfg(test)]
pub mod mock_store;
