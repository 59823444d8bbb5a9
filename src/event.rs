//! Notifications emitted by the config manager.

/// A single value changed, appeared or disappeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChanged {
    pub group: String,
    pub profile: Option<String>,
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    ConfigChanged(ConfigChanged),
    /// A profile switch (or the initial load) completed.
    ProfileChanged,
    /// A flush cycle is starting; listeners can persist derived state first.
    ConfigSync,
    /// The account profile key in use changed.
    RsProfileChanged,
}

/// Receiver for [`ConfigEvent`]s, usually an adapter over the
/// application's event bus.
pub trait EventSink: Send + Sync {
    fn post(&self, event: ConfigEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn post(&self, _event: ConfigEvent) {}
}

impl<F> EventSink for F
where
    F: Fn(ConfigEvent) + Send + Sync,
{
    fn post(&self, event: ConfigEvent) {
        self(event)
    }
}
