// SPDX-FileCopyrightText: 2026 Warden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules. All SQL lives here.

pub mod records;
pub mod tasks;
