mod context;
mod errors;
mod routes;
mod ws;

pub mod logging;

use std::{
    env,
    net::{Ipv6Addr, SocketAddr},
};

use log::info;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use context::ServerContext;
pub use errors::{ServerError, ServerResult};
pub use ws::Heartbeat;

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 3001;

pub type Router = axum::Router<ServerContext>;

/// Starts the ideastorm server
pub async fn run_server(context: ServerContext) {
    let port = env::var("IDEASTORM_PORT")
        .map(|x| x.parse::<u16>().expect("Port must be a number"))
        .unwrap_or(DEFAULT_PORT);

    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let root_router = Router::new()
        .merge(routes::router())
        .merge(ws::router())
        .layer(cors)
        .with_state(context);

    let listener = TcpListener::bind(&addr).await.expect("listens on address");

    info!("Listening on port {}", port);
    info!("WebSocket gateway at ws://localhost:{}/ws", port);

    axum::serve(listener, root_router.into_make_service())
        .await
        .unwrap();
}
