//! Recipes shipped with DeployBot.

mod fastapi_postgres;

pub use fastapi_postgres::FastapiPostgres;
