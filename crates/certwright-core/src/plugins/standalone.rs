use std::{
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener},
    sync::{Arc, Mutex, PoisonError},
};

use certwright_plugin_sdk::{Capability, Plugin, PluginConfig, PluginError, PluginType};

const DEFAULT_HTTP01_PORT: u16 = 80;

/// Authenticator that answers HTTP-01 challenges from its own listener.
pub struct Standalone;

impl PluginType for Standalone {
    fn description(&self) -> &str {
        "Spin up a temporary webserver"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Authenticator]
    }

    fn create(&self, config: Arc<PluginConfig>, name: &str) -> Arc<dyn Plugin> {
        Arc::new(StandaloneAuthenticator {
            name: name.to_string(),
            config,
            listener: Mutex::new(None),
        })
    }
}

pub struct StandaloneAuthenticator {
    name: String,
    config: Arc<PluginConfig>,
    listener: Mutex<Option<TcpListener>>,
}

impl StandaloneAuthenticator {
    fn bind_addr(&self) -> Result<SocketAddr, PluginError> {
        let port = self
            .config
            .setting::<u16>(&self.name, "http01_port")?
            .unwrap_or(DEFAULT_HTTP01_PORT);
        let address = self
            .config
            .setting::<IpAddr>(&self.name, "http01_address")?
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok(SocketAddr::new(address, port))
    }

    /// Address of the reserved listener once prepared.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }
}

impl Plugin for StandaloneAuthenticator {
    /// Binds the HTTP-01 listener now and keeps it for the rest of the run.
    fn prepare(&self) -> Result<(), PluginError> {
        let addr = self.bind_addr()?;
        let listener = TcpListener::bind(addr).map_err(|err| match err.kind() {
            ErrorKind::AddrInUse | ErrorKind::PermissionDenied | ErrorKind::AddrNotAvailable => {
                PluginError::misconfiguration(format!("cannot listen on {addr}: {err}"))
            }
            _ => PluginError::other(format!("failed to bind {addr}: {err}")),
        })?;
        tracing::debug!(plugin = %self.name, %addr, "reserved http-01 listener");
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        Ok(())
    }

    fn more_info(&self) -> String {
        match self.local_addr() {
            Some(addr) => format!("Listening for HTTP-01 challenges on {addr}."),
            None => "No listener reserved.".to_string(),
        }
    }
}
