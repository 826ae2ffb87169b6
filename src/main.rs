mod cli;
mod config;
mod input;
mod ipc;
mod logging;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
