//! services/api/src/bin/issue_token.rs
//!
//! Creates a bearer token for an operator and prints it once. Only its digest
//! is stored.
//!
//! Usage: `issue-token <operator> <admin|scanner>`

use api_lib::{adapters::db::DbAdapter, config::ConfigError, error::ApiError};
use attendance_core::domain::CallerRole;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let (Some(operator), Some(role)) = (args.next(), args.next()) else {
        eprintln!("Usage: issue-token <operator> <admin|scanner>");
        std::process::exit(2);
    };
    let role = CallerRole::parse(&role).ok_or_else(|| {
        ApiError::Internal(format!("Unknown role '{}', expected admin or scanner", role))
    })?;

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;
    let db = DbAdapter::new(pool);
    db.run_migrations().await?;

    let token = db.create_api_token(&operator, role).await?;
    println!("Token for {} ({}):", operator, role.as_str());
    println!("{}", token);
    Ok(())
}
