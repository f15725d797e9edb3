mod args;
mod config;
mod entry;
mod error;
mod load;
mod metrics;
mod server;
mod shutdown;
mod shutdown_handlers;
mod system;

use error::AppResult;

fn main() -> AppResult<()> {
    entry::run()
}
