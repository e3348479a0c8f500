// WebSocket gateway: the upgrade endpoint and the per-socket pump that
// shuttles frames between one connection and its room actor.

mod handler;
mod protocol;

pub use handler::router;
