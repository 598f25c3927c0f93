mod settings;

pub use settings::{
    ApiConfig, DatabaseConfig, GroupsConfig, JwtConfig, ServerConfig, Settings, WebSocketConfig,
};
