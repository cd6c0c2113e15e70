mod cli;
mod commands;
mod infra;
mod routes;
mod server;

use impediment_monitor::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
