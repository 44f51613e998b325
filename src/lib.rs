pub mod cache;
pub mod core;
pub mod identity;
pub mod models;
pub mod routes;
pub mod schema;
