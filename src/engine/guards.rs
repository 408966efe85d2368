/// Mutable guard record owned by an engine instance. Source order of
/// provider events is not guaranteed, so these flags make duplicate or
/// out-of-order processing collapse into no-ops. Never exposed to
/// consumers.
#[derive(Debug)]
pub struct Guards {
    /// True until the construction-time session probe has completed;
    /// initial-session events are ignored while set.
    pub initializing: bool,
    /// Principal id with a profile fetch currently in flight.
    pub fetching_for: Option<String>,
    /// A redirect sign-in has been requested and not yet observed back.
    pub oauth_in_flight: bool,
    /// A privileged authorization attempt is in flight for this page load.
    pub processing_privileged: bool,
    /// Set on disposal; no state mutation may happen once true.
    pub disposed: bool,
    /// Bumped whenever a more authoritative event supersedes in-flight
    /// work; late results compare against it before applying.
    pub epoch: u64,
}

impl Guards {
    pub fn new() -> Self {
        Self {
            initializing: true,
            fetching_for: None,
            oauth_in_flight: false,
            processing_privileged: false,
            disposed: false,
            epoch: 0,
        }
    }

    /// Reset everything a sign-out invalidates. `disposed` survives.
    pub fn reset(&mut self) {
        self.initializing = false;
        self.fetching_for = None;
        self.oauth_in_flight = false;
        self.processing_privileged = false;
        self.epoch += 1;
    }
}

impl Default for Guards {
    fn default() -> Self {
        Self::new()
    }
}
