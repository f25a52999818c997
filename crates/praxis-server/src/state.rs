use praxis_core::approval::ApprovalEngine;
use praxis_core::clock::SharedClock;
use praxis_core::evaluation::EvaluationEngine;
use praxis_core::store::{ApprovalStore, EvaluationStore};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::JwtKeys;

/// Bound required of the store behind the router: both repositories over the
/// same transaction type. `PgStore` in production, `MemStore` in tests.
pub trait Stores: ApprovalStore + EvaluationStore {}

impl<T: ApprovalStore + EvaluationStore> Stores for T {}

/// Shared application state passed to all route handlers. Constructed once at
/// startup; the start instant backs the health endpoint's uptime instead of
/// any package-level global.
pub struct AppState<S: Stores> {
    pub approvals: ApprovalEngine<S>,
    pub evaluations: EvaluationEngine<S>,
    pub auth: JwtKeys,
    pub environment: String,
    pub started_at: Instant,
}

impl<S: Stores> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            approvals: self.approvals.clone(),
            evaluations: self.evaluations.clone(),
            auth: self.auth.clone(),
            environment: self.environment.clone(),
            started_at: self.started_at,
        }
    }
}

impl<S: Stores> AppState<S> {
    pub fn new(store: Arc<S>, clock: SharedClock, jwt_secret: &str, environment: String) -> Self {
        Self {
            approvals: ApprovalEngine::new(Arc::clone(&store), Arc::clone(&clock)),
            evaluations: EvaluationEngine::new(store, clock),
            auth: JwtKeys::new(jwt_secret),
            environment,
            started_at: Instant::now(),
        }
    }
}
