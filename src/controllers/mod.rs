// controllers/mod.rs
mod loopback;
mod tellstick;

pub use loopback::Loopback;
pub use tellstick::{TellStick, TellStickModel};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::{
    config::ControllerSettings,
    error::ControllerError,
    methods::{Method, Methods, method_id},
    protocols::Signal,
};

/// A transceiver able to put encoded frames on the air.
#[async_trait]
pub trait Controller: Send + Sync {
    fn id(&self) -> i32;

    /// Higher wins when a device has no preferred controller.
    fn priority(&self) -> i32;

    fn supported_methods(&self) -> Methods;

    fn supports(&self, method: Method) -> bool {
        self.supported_methods().contains(method.bit())
    }

    /// Transmits one frame. Never retries; the caller decides.
    async fn send(&self, signal: &Signal) -> Result<(), ControllerError>;
}

fn methods_from_names(names: &[String]) -> Methods {
    if names.is_empty() {
        return Methods::all();
    }
    names
        .iter()
        .fold(Methods::empty(), |acc, name| acc | method_id(name))
}

/// Instantiates the controllers declared in configuration. An unknown kind
/// is a configuration error.
pub fn build(settings: &[ControllerSettings]) -> anyhow::Result<Vec<Arc<dyn Controller>>> {
    settings
        .iter()
        .map(|s| {
            let methods = methods_from_names(&s.methods);
            let timeout = Duration::from_millis(s.send_timeout_ms);
            let controller: Arc<dyn Controller> = match s.kind.as_str() {
                "tellstick" | "tellstick-duo" => {
                    let model = if s.kind == "tellstick-duo" {
                        TellStickModel::Duo
                    } else {
                        TellStickModel::Classic
                    };
                    Arc::new(
                        TellStick::new(s.id, s.priority, model, s.path.clone(), timeout)
                            .with_methods(methods)
                            .with_ack(s.await_ack),
                    )
                }
                "loopback" => Arc::new(Loopback::new(s.id, s.priority).with_methods(methods)),
                other => anyhow::bail!("Controller {} has unknown kind '{}'", s.id, other),
            };
            info!(
                id = s.id,
                kind = %s.kind,
                priority = s.priority,
                methods = methods.bits(),
                "Controller configured"
            );
            Ok(controller)
        })
        .collect()
}
