use std::sync::Arc;

use axum::extract::FromRef;
use ideastorm_collab::Collab;

use crate::ws::Heartbeat;

#[derive(Clone, FromRef)]
pub struct ServerContext {
    pub collab: Arc<Collab>,
    pub heartbeat: Heartbeat,
}
