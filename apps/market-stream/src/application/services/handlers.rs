//! Handler Registry
//!
//! Ordered list of trade callbacks. Every record is offered to every handler
//! in registration order before the next record is touched, so for handlers
//! `H1, H2` and records `[A, B]` the call sequence is
//! `H1(A), H2(A), H1(B), H2(B)`.
//!
//! A panicking handler is caught, logged and skipped; remaining handlers and
//! records are still dispatched.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::domain::trade::TradeRecord;

/// Callback invoked once per trade record.
pub type TradeHandler = Arc<dyn Fn(&TradeRecord) + Send + Sync>;

/// Result of dispatching one or more records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handler invocations that returned normally.
    pub delivered: usize,
    /// Handler invocations that panicked.
    pub failed: usize,
}

impl DispatchOutcome {
    fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}

/// Append-only, ordered set of trade handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<TradeHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Append a handler.
    pub fn register<F>(&mut self, handler: F)
    where
        F: Fn(&TradeRecord) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offer one record to every handler in registration order.
    pub fn dispatch(&self, trade: &TradeRecord) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for (index, handler) in self.handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(trade))) {
                Ok(()) => outcome.delivered += 1,
                Err(payload) => {
                    outcome.failed += 1;
                    tracing::error!(
                        handler = index,
                        symbol = %trade.symbol,
                        panic = %panic_message(payload.as_ref()),
                        "Trade handler panicked"
                    );
                }
            }
        }

        outcome
    }

    /// Offer each record, in order, to every handler.
    pub fn dispatch_all(&self, trades: &[TradeRecord]) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for trade in trades {
            outcome.merge(self.dispatch(trade));
        }
        outcome
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn trade(symbol: &str) -> TradeRecord {
        TradeRecord {
            symbol: symbol.to_string(),
            price: 10.0,
            volume: 1.0,
            timestamp_millis: 0,
        }
    }

    #[test]
    fn empty_registry_delivers_nothing() {
        let registry = HandlerRegistry::new();
        let outcome = registry.dispatch(&trade("AAPL"));
        assert_eq!(outcome, DispatchOutcome::default());
        assert!(registry.is_empty());
    }

    #[test]
    fn record_major_handler_minor_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();

        for name in ["H1", "H2"] {
            let calls = Arc::clone(&calls);
            registry.register(move |t: &TradeRecord| {
                calls.lock().push(format!("{name}({})", t.symbol));
            });
        }

        let outcome = registry.dispatch_all(&[trade("A"), trade("B")]);

        assert_eq!(outcome.delivered, 4);
        assert_eq!(*calls.lock(), vec!["H1(A)", "H2(A)", "H1(B)", "H2(B)"]);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();

        registry.register(|t: &TradeRecord| {
            assert!(t.symbol != "BAD", "boom");
        });
        let sink = Arc::clone(&seen);
        registry.register(move |t: &TradeRecord| sink.lock().push(t.symbol.clone()));

        let outcome = registry.dispatch_all(&[trade("BAD"), trade("GOOD")]);

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.delivered, 3);
        assert_eq!(*seen.lock(), vec!["BAD", "GOOD"]);
    }

    #[test]
    fn panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
