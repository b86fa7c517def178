use tether_shared::ConnectionConfig;

/// Contains the configuration required to initialize a Client
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Used to configure the connection to the Server
    pub connection: ConnectionConfig,
}
