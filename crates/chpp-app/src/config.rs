use std::time::Duration;

/// Default wait for a response to a blocking request.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default wait for a discovery response.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// App layer timing.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Default timeout of [`crate::ClientContext::send_and_wait`].
    pub response_timeout: Duration,
    /// Timeout of [`crate::App::discover`].
    pub discovery_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}
