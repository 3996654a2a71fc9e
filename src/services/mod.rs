pub mod gateway;
pub mod s3_gateway;
pub mod session_registry;
pub mod sqlite_registry;
pub mod sweeper;
pub mod upload_service;
