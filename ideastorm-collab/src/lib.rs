mod analysis;
mod handler;
mod ideas;
mod protocol;
mod rooms;
mod util;

use std::sync::Arc;

pub use analysis::*;
pub use handler::*;
pub use ideas::*;
pub use protocol::*;
pub use rooms::*;
pub use util::*;

/// The ideastorm collab system, facilitating room membership, idea
/// analysis, and fan-out of updates over live connections.
pub struct Collab {
    pub rooms: Arc<RoomManager>,
    pub analyzer: Arc<dyn Analyzer>,
}

impl Collab {
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            rooms: RoomManager::new(),
            analyzer,
        }
    }
}
