// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::engine::AuthService;

#[derive(Clone)]
pub struct AppState {
    pub service: AuthService,
}

impl AppState {
    pub fn new(service: AuthService) -> Self {
        Self { service }
    }
}
