pub mod server;
pub mod server_access;
pub mod subscription;
pub mod subscription_usage;
