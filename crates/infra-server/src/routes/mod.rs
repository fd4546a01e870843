// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP route handlers.

pub mod access_keys;
pub mod auth;
pub mod credentials;
pub mod destinations;
pub mod grants;
pub mod health;
pub mod providers;
pub mod users;
