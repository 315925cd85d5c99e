mod dispatch;
mod pipeline;
mod runtime;
mod server;
mod watch;

pub use server::{client_request, run_daemon};
