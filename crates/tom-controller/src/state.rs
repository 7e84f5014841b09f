/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Shared application state handed to every handler. Configuration is
//! immutable after startup; plugins are constructed once and live for the
//! process lifetime.

use crate::auth::policy::AccessPolicy;
use crate::auth::validator::JwtValidator;
use crate::inventory::Inventory;
use std::sync::Arc;
use tom_store::Store;
use tom_utils::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Store,
    pub inventory: Arc<dyn Inventory>,
    pub validators: Arc<Vec<JwtValidator>>,
    pub policy: Arc<AccessPolicy>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        store: Store,
        inventory: Arc<dyn Inventory>,
        validators: Vec<JwtValidator>,
    ) -> Self {
        let policy = AccessPolicy::from_settings(&settings.controller);
        Self {
            settings: Arc::new(settings),
            store,
            inventory,
            validators: Arc::new(validators),
            policy: Arc::new(policy),
        }
    }
}
