// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test harness for abuse guard attack simulation.
//!
//! This module provides utilities for simulating floods and brute-force
//! login patterns against the guard to validate security controls.

pub mod attacks;
pub mod generators;
pub mod metrics;
