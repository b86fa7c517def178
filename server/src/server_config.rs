use tether_shared::ConnectionConfig;

/// Contains the configuration required to initialize a Server
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// Used to configure the connections with Clients
    pub connection: ConnectionConfig,
}
