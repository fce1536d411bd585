use std::sync::Arc;

use gatehouse_core::{Authenticator, Config, IssuanceService, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    service: Arc<IssuanceService>,
}

impl AppState {
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        service: Arc<IssuanceService>,
    ) -> Self {
        Self {
            config,
            authenticator,
            service,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn service(&self) -> &IssuanceService {
        self.service.as_ref()
    }
}
