use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::types::{RouteKey, Webhook};
use crate::validation::validate_webhook;

/// What `register` did with a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The route was not bound before and now is.
    Bound,
    /// The route was already bound; only the cached definition changed.
    Updated,
}

#[derive(Default)]
struct Routes {
    bound: HashSet<RouteKey>,
    live: HashMap<RouteKey, Webhook>,
}

/// Live webhook definitions, keyed by route.
///
/// Binding a route and caching its definition are separate: the dispatch
/// handler resolves a bound key on every call, so a re-registration only
/// swaps the definition. The lock is never held across an await point.
#[derive(Default)]
pub struct Registry {
    routes: Mutex<Routes>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `webhook` and make it the live definition for its route.
    pub fn register(&self, webhook: Webhook) -> Result<Registration> {
        validate_webhook(&webhook)?;

        let key = webhook.route_key();
        let webhook_id = webhook.id.clone();
        let registration = {
            let mut routes = self.lock();
            let newly_bound = routes.bound.insert(key.clone());
            routes.live.insert(key.clone(), webhook);
            if newly_bound {
                Registration::Bound
            } else {
                Registration::Updated
            }
        };

        match registration {
            Registration::Bound => {
                tracing::info!(route = %key, webhook_id = %webhook_id, "webhook route bound")
            }
            Registration::Updated => tracing::info!(
                route = %key,
                webhook_id = %webhook_id,
                "webhook route already registered, cache updated"
            ),
        }
        Ok(registration)
    }

    pub fn lookup(&self, key: &RouteKey) -> Option<Webhook> {
        self.lock().live.get(key).cloned()
    }

    pub fn is_bound(&self, key: &RouteKey) -> bool {
        self.lock().bound.contains(key)
    }

    /// Stop serving `key`. The binding stays; later hits find no definition.
    pub fn deregister(&self, key: &RouteKey) -> Option<Webhook> {
        let removed = self.lock().live.remove(key);
        if removed.is_some() {
            tracing::info!(route = %key, "webhook route deregistered");
        }
        removed
    }

    pub fn bound_routes(&self) -> usize {
        self.lock().bound.len()
    }

    fn lock(&self) -> MutexGuard<'_, Routes> {
        // A panic while holding the lock cannot leave the maps half-written.
        self.routes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
