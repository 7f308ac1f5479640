mod request_id;

use std::time::Duration;

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::prompt::DEFAULT_PROMPT_TEMPLATE;
use crate::relay::RelayContext;
use crate::stream::transform::filter_from_config;
use crate::stream::StreamTransform;
use crate::transport::HttpTransport;

use request_id::RequestIds;

/// Shared application state accessible to all handlers.
///
/// Immutable after startup apart from the request id counter; every relay
/// gets its own decoder and transform from [`AppState::relay_context`].
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    completions_url: String,
    prompt_template: String,
    request_ids: RequestIds,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport) -> Self {
        let completions_url = config.upstream.completions_url();
        let prompt_template = config
            .features
            .prompt_template
            .clone()
            .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string());
        tracing::debug!(
            %completions_url,
            model = %config.upstream.model,
            filter = %config.relay.artifact_filter.strategy,
            credential_configured = config.upstream.credential().is_some(),
            "application state ready"
        );
        Self {
            config,
            transport,
            completions_url,
            prompt_template,
            request_ids: RequestIds::new(),
        }
    }

    /// Build state and its transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let transport = HttpTransport::new(&config.server, config.upstream.proxy.as_deref())?;
        Ok(Self::new(config, transport))
    }

    #[must_use]
    pub fn completions_url(&self) -> &str {
        &self.completions_url
    }

    #[must_use]
    pub fn prompt_template(&self) -> &str {
        &self.prompt_template
    }

    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.config.upstream.credential()
    }

    #[must_use]
    pub fn next_request_id(&self) -> uuid::Uuid {
        self.request_ids.next_uuid()
    }

    /// Fresh per-request relay state.
    #[must_use]
    pub fn relay_context(&self, request_id: uuid::Uuid, credential: &str) -> RelayContext {
        let transform = StreamTransform::new(filter_from_config(&self.config.relay.artifact_filter));
        let idle = match self.config.server.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        RelayContext::new(request_id, credential, transform).with_idle_timeout(idle)
    }
}
