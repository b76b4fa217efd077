//! Render-completion gate.
//!
//! A cell owns a [`GateController`]; anyone who needs the rendered output
//! (notably the execution flow) grabs a [`RenderGate`] and awaits it.

use tokio::sync::watch;

use crate::{ImarkdownError, Result};

/// Awaitable handle resolving once the current render has finished.
#[derive(Debug, Clone)]
pub struct RenderGate {
    rx: watch::Receiver<bool>,
}

impl RenderGate {
    /// Whether the render this gate belongs to has completed.
    pub fn is_resolved(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the render to complete.
    ///
    /// Returns immediately for an already-resolved gate. Fails with
    /// [`ImarkdownError::GateClosed`] if the controller was dropped first.
    pub async fn wait(mut self) -> Result<()> {
        self.rx
            .wait_for(|done| *done)
            .await
            .map(|_| ())
            .map_err(|_| ImarkdownError::GateClosed)
    }
}

/// Owner side of the render gate.
///
/// Each render cycle gets a fresh gate. A gate replaced while unresolved is
/// kept and resolved together with its successor, so waiters captured before
/// a re-render are released when the newest render finishes.
#[derive(Debug)]
pub struct GateController {
    current: watch::Sender<bool>,
    superseded: Vec<watch::Sender<bool>>,
}

impl Default for GateController {
    fn default() -> Self {
        Self::new()
    }
}

impl GateController {
    /// Create a controller whose first gate is unresolved.
    pub fn new() -> Self {
        let (current, _) = watch::channel(false);
        Self {
            current,
            superseded: Vec::new(),
        }
    }

    /// The gate for the most recent render.
    pub fn gate(&self) -> RenderGate {
        RenderGate {
            rx: self.current.subscribe(),
        }
    }

    /// Whether the most recent render has completed.
    pub fn is_resolved(&self) -> bool {
        *self.current.borrow()
    }

    /// Start a new render cycle with a fresh, unresolved gate.
    pub fn reset(&mut self) {
        let (fresh, _) = watch::channel(false);
        let previous = std::mem::replace(&mut self.current, fresh);
        if !*previous.borrow() {
            self.superseded.push(previous);
        }
    }

    /// Resolve the current gate and every gate it superseded.
    pub fn resolve(&mut self) {
        self.current.send_replace(true);
        for gate in self.superseded.drain(..) {
            gate.send_replace(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolved_gate_returns_immediately() {
        let mut controller = GateController::new();
        controller.resolve();

        let gate = controller.gate();
        assert!(gate.is_resolved());
        gate.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_released_on_resolve() {
        let mut controller = GateController::new();
        let gate = controller.gate();
        let waiter = tokio::spawn(gate.wait());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        controller.resolve();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reset_creates_unresolved_gate() {
        let mut controller = GateController::new();
        controller.resolve();
        let old = controller.gate();

        controller.reset();

        assert!(old.is_resolved());
        assert!(!controller.gate().is_resolved());
    }

    #[tokio::test]
    async fn test_superseded_gate_resolves_with_successor() {
        let mut controller = GateController::new();
        let first = controller.gate();
        controller.reset();
        let second = controller.gate();

        controller.resolve();

        first.wait().await.unwrap();
        second.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_controller_closes_gate() {
        let controller = GateController::new();
        let gate = controller.gate();
        drop(controller);

        assert!(matches!(gate.wait().await, Err(ImarkdownError::GateClosed)));
    }
}
