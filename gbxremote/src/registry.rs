use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::xml::{Call, Value};

/// Subscribing with this pattern receives every callback, with the
/// method name prepended to the argument vector.
pub const ANY_CALLBACK: &str = "*";

/// How a subscriber is executed when a callback arrives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delivery {
    /// Run on the receive loop itself. Keep these quick: nothing else
    /// is received while they run.
    Inline,

    /// Run on a freshly spawned worker thread.
    Detached,
}

/// A subscriber is handed the callback's method name and its arguments.
pub type CallbackFn = dyn Fn(&str, &[Value]) + Send + Sync;

#[derive(Clone)]
struct Subscription {
    callback: Arc<CallbackFn>,
    delivery: Delivery,
}

/// Maps method names (or [`ANY_CALLBACK`]) to their subscribers.
///
/// Registration is additive; for a given method, delivery preserves
/// registration order.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
}

impl CallbackRegistry {
    pub fn subscribe(&self, pattern: &str, delivery: Delivery, callback: Arc<CallbackFn>) {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        subscriptions
            .entry(pattern.to_string())
            .or_insert_with(Vec::new)
            .push(Subscription { callback, delivery });
        log::debug!("registered callback subscriber for {}", pattern);
    }

    /// Hand a server callback to its subscribers: first those registered
    /// for the exact method name, then the wildcard subscribers, which
    /// see the method name as an extra first argument.
    pub fn dispatch(&self, call: &Call) {
        let (exact, wildcard) = {
            let subscriptions = self.subscriptions.lock().unwrap();
            let exact = subscriptions.get(&call.name).cloned().unwrap_or_default();
            let wildcard = subscriptions
                .get(ANY_CALLBACK)
                .cloned()
                .unwrap_or_default();
            (exact, wildcard)
        };

        for subscription in exact {
            deliver(subscription, &call.name, &call.args);
        }

        if wildcard.is_empty() {
            return;
        }
        let mut prefixed = Vec::with_capacity(call.args.len() + 1);
        prefixed.push(Value::String(call.name.clone()));
        prefixed.extend_from_slice(&call.args);
        for subscription in wildcard {
            deliver(subscription, &call.name, &prefixed);
        }
    }
}

/// Run a single subscriber. Panics are logged and swallowed so that a
/// faulty subscriber can never take down the receive loop.
fn deliver(subscription: Subscription, method: &str, args: &[Value]) {
    match subscription.delivery {
        Delivery::Inline => {
            let run = AssertUnwindSafe(|| (subscription.callback)(method, args));
            if catch_unwind(run).is_err() {
                log::error!("callback subscriber for {} panicked", method);
            }
        }
        Delivery::Detached => {
            let method = method.to_string();
            let args = args.to_vec();
            std::thread::spawn(move || {
                let run = AssertUnwindSafe(|| (subscription.callback)(&method, &args));
                if catch_unwind(run).is_err() {
                    log::error!("callback subscriber for {} panicked", method);
                }
            });
        }
    }
}
