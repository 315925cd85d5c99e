mod cli;
mod config;
mod controller;
mod grid;
mod input;
mod ipc;
mod logging;
mod playback;
mod resolver;
mod selection;
mod timers;
mod tracker;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
