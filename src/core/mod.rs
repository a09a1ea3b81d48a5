pub mod db;
pub mod errors;
pub mod form;
pub mod helpers;
pub mod reply;
pub mod static_server;
pub mod store;
