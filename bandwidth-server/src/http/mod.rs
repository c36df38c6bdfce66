mod handlers;
mod live;
mod routes;
mod server;
mod state;

pub use server::HttpServer;
pub use state::AppState;
