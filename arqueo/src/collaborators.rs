use std::collections::HashMap;

use tracing::info;

use arqueo_core::MovementKind;

/// Supplies the acting operator's name. The engine only reads who is acting;
/// authorization is somebody else's job.
pub trait IdentityProvider: Send + Sync {
    fn acting_user(&self) -> String;
}

/// Fixed identity, useful for the CLI and tests.
pub struct StaticIdentity(pub String);

impl IdentityProvider for StaticIdentity {
    fn acting_user(&self) -> String {
        self.0.clone()
    }
}

/// Master-data view of a provider, owned by an external directory.
#[derive(Clone, Debug)]
pub struct ProviderInfo {
    pub code: String,
    pub name: String,
    pub kind: MovementKind,
    pub notify_email: Option<String>,
}

/// Lookup into the provider/employee directory.
pub trait ProviderDirectory: Send + Sync {
    fn lookup(&self, code: &str) -> Option<ProviderInfo>;
}

/// In-memory directory for tests and standalone use.
#[derive(Default)]
pub struct StaticProviderDirectory {
    providers: HashMap<String, ProviderInfo>,
}

impl StaticProviderDirectory {
    pub fn with(mut self, info: ProviderInfo) -> Self {
        self.providers.insert(info.code.clone(), info);
        self
    }
}

impl ProviderDirectory for StaticProviderDirectory {
    fn lookup(&self, code: &str) -> Option<ProviderInfo> {
        self.providers.get(code).cloned()
    }
}

/// Fully composed message handed to the notification dispatcher.
#[derive(Clone, Debug)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Fire-and-forget message delivery. Failures here never roll back a ledger
/// mutation; the caller logs and moves on.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Dispatcher that only logs the composed message.
#[derive(Default)]
pub struct TracingDispatcher;

impl NotificationDispatcher for TracingDispatcher {
    fn dispatch(&self, notification: Notification) -> anyhow::Result<()> {
        info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            "notification dispatched"
        );
        Ok(())
    }
}
