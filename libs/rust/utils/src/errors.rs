//store
pub const REDIS_CLIENT_FAILED: &str = "Failed to create Redis client";
pub const REDIS_CONNECTION_FAILED: &str = "Failed to connect to Redis";
pub const REDIS_PING_FAILED: &str = "Failed to ping Redis";

//bus
pub const SUBSCRIBE_FAILED: &str = "Failed to subscribe to channel";
pub const UNSUBSCRIBE_FAILED: &str = "Failed to unsubscribe from channel";
pub const PUBLISH_FAILED: &str = "Failed to publish message";

//server
pub const SERVER_BIND_FAILED: &str = "Failed to bind HTTP listener";
pub const SIGNAL_HANDLER_FAILED: &str = "Failed to install SIGINT handler";
