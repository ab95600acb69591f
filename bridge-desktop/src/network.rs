//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_CHECK_ADDR: &str = "8.8.8.8:53";

/// Desktop network monitor implementation
///
/// Provides basic network connectivity detection:
/// - Connection status check
/// - Simple connectivity testing
///
/// Desktop connections are reported as unmetered. Hosts that know better
/// (tethering, VPN on cellular) can set [`DesktopNetworkMonitor::with_metered`].
pub struct DesktopNetworkMonitor {
    cached_info: Arc<Mutex<Option<NetworkInfo>>>,
    check_addr: String,
    metered: bool,
}

impl DesktopNetworkMonitor {
    /// Create a new network monitor
    pub fn new() -> Self {
        Self {
            cached_info: Arc::new(Mutex::new(None)),
            check_addr: DEFAULT_CHECK_ADDR.to_string(),
            metered: false,
        }
    }

    /// Check a different `host:port` for connectivity
    pub fn with_check_addr(mut self, addr: impl Into<String>) -> Self {
        self.check_addr = addr.into();
        self
    }

    /// Report the connection as metered
    pub fn with_metered(mut self, metered: bool) -> Self {
        self.metered = metered;
        self
    }

    /// Last observed network info without probing again
    pub async fn last_known(&self) -> Option<NetworkInfo> {
        self.cached_info.lock().await.clone()
    }

    /// Check network connectivity by opening a TCP connection to the check address
    async fn check_connectivity(&self) -> NetworkStatus {
        match tokio::time::timeout(
            Duration::from_secs(5),
            tokio::net::TcpStream::connect(self.check_addr.as_str()),
        )
        .await
        {
            Ok(Ok(_)) => NetworkStatus::Connected,
            Ok(Err(_)) => NetworkStatus::Disconnected,
            Err(_) => NetworkStatus::Disconnected,
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        // Check if we have cached info
        let mut cached = self.cached_info.lock().await;

        // For desktop, we do simple connectivity checks
        let status = self.check_connectivity().await;

        let info = NetworkInfo {
            status,
            network_type: if status == NetworkStatus::Connected {
                // On desktop, we assume Ethernet/WiFi but can't easily distinguish without platform-specific APIs
                Some(NetworkType::Other)
            } else {
                None
            },
            is_metered: self.metered,
            is_expensive: self.metered,
        };

        *cached = Some(info.clone());
        debug!(status = ?status, "Network info updated");

        Ok(info)
    }

    async fn is_wifi(&self) -> bool {
        // Desktop implementation doesn't distinguish network types
        false
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        // Simple implementation: poll periodically
        // A production implementation would use platform-specific APIs to watch for changes
        Ok(Box::new(DesktopNetworkChangeStream {
            monitor: Self::new()
                .with_check_addr(self.check_addr.clone())
                .with_metered(self.metered),
            last_status: None,
        }))
    }
}

/// Network change stream that polls for changes
struct DesktopNetworkChangeStream {
    monitor: DesktopNetworkMonitor,
    last_status: Option<NetworkStatus>,
}

#[async_trait]
impl NetworkChangeStream for DesktopNetworkChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        // Poll every 5 seconds for changes
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;

            if let Ok(info) = self.monitor.get_network_info().await {
                // Only return if status changed
                if self.last_status.as_ref() != Some(&info.status) {
                    self.last_status = Some(info.status);
                    return Some(info);
                }
            }
        }
    }
}

/// Network monitor that reports a host-supplied state.
///
/// Used by hosts that receive connectivity callbacks from the OS, and by
/// tests that need deterministic metered/unmetered transitions.
#[derive(Clone)]
pub struct StaticNetworkMonitor {
    info: Arc<parking_lot::RwLock<NetworkInfo>>,
    changes: tokio::sync::watch::Sender<NetworkInfo>,
}

impl StaticNetworkMonitor {
    pub fn new(info: NetworkInfo) -> Self {
        let (changes, _) = tokio::sync::watch::channel(info.clone());
        Self {
            info: Arc::new(parking_lot::RwLock::new(info)),
            changes,
        }
    }

    /// Connected over an unmetered link
    pub fn unmetered() -> Self {
        Self::new(NetworkInfo {
            status: NetworkStatus::Connected,
            network_type: Some(NetworkType::WiFi),
            is_metered: false,
            is_expensive: false,
        })
    }

    /// Connected over a metered cellular link
    pub fn metered() -> Self {
        Self::new(NetworkInfo {
            status: NetworkStatus::Connected,
            network_type: Some(NetworkType::Cellular),
            is_metered: true,
            is_expensive: true,
        })
    }

    pub fn offline() -> Self {
        Self::new(NetworkInfo {
            status: NetworkStatus::Disconnected,
            network_type: None,
            is_metered: false,
            is_expensive: false,
        })
    }

    /// Replace the reported state and notify subscribers
    pub fn set(&self, info: NetworkInfo) {
        *self.info.write() = info.clone();
        self.changes.send_replace(info);
    }
}

#[async_trait]
impl NetworkMonitor for StaticNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        Ok(self.info.read().clone())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn NetworkChangeStream>> {
        Ok(Box::new(StaticNetworkChangeStream {
            rx: self.changes.subscribe(),
        }))
    }
}

struct StaticNetworkChangeStream {
    rx: tokio::sync::watch::Receiver<NetworkInfo>,
}

#[async_trait]
impl NetworkChangeStream for StaticNetworkChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
