//! BLE transport for the low-power board
//!
//! The low-power board exposes one service with a notify characteristic
//! carrying radio packets and a write characteristic taking commands.
//!
//! # Service UUIDs
//!
//! - `0000fe84-0000-1000-8000-00805f9b34fb` - Low-power board service
//! - `2d30c082-f39f-4ce6-923f-3484ea480596` - Receive (notify)
//! - `2d30c083-f39f-4ce6-923f-3484ea480596` - Send (write)

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Manager, Peripheral};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::Transport;

/// Low-power board service UUID
pub const LOW_POWER_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fe84_0000_1000_8000_00805f9b34fb);

/// Notification characteristic UUID (board to host)
pub const RECEIVE_CHAR_UUID: Uuid = Uuid::from_u128(0x2d30c082_f39f_4ce6_923f_3484ea480596);

/// Command characteristic UUID (host to board)
pub const SEND_CHAR_UUID: Uuid = Uuid::from_u128(0x2d30c083_f39f_4ce6_923f_3484ea480596);

/// Connected low-power board.
///
/// Writes are queued to a background task, so [`Transport::write`] never
/// blocks. Notifications arrive on the receiver returned by
/// [`BleTransport::connect`].
pub struct BleTransport {
    peripheral: Peripheral,
    commands: mpsc::UnboundedSender<Vec<u8>>,
}

impl BleTransport {
    /// Scan for a board whose name starts with `name_prefix` and connect.
    ///
    /// Must be called from inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if Bluetooth is unavailable, no board is found within
    /// `scan_duration`, or the board lacks the expected characteristics.
    pub async fn connect(
        name_prefix: &str,
        scan_duration: Duration,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>), TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::NotFound("Bluetooth adapter".to_string()))?;

        tracing::info!("Scanning for low-power boards...");
        adapter.start_scan(ScanFilter { services: vec![LOW_POWER_SERVICE_UUID] }).await?;
        tokio::time::sleep(scan_duration).await;
        adapter.stop_scan().await?;

        let mut found = None;
        for peripheral in adapter.peripherals().await? {
            let name = peripheral.properties().await?.and_then(|p| p.local_name);
            if name.as_deref().is_some_and(|n| n.starts_with(name_prefix)) {
                found = Some(peripheral);
                break;
            }
        }
        let peripheral =
            found.ok_or_else(|| TransportError::NotFound(format!("board named {name_prefix}*")))?;

        peripheral.connect().await?;
        peripheral.discover_services().await?;
        tracing::info!("Connected to {}", peripheral.address());

        let characteristics = peripheral.characteristics();
        let receive = characteristics
            .iter()
            .find(|c| c.uuid == RECEIVE_CHAR_UUID)
            .cloned()
            .ok_or_else(|| TransportError::NotFound("receive characteristic".to_string()))?;
        let send = characteristics
            .iter()
            .find(|c| c.uuid == SEND_CHAR_UUID)
            .cloned()
            .ok_or_else(|| TransportError::NotFound("send characteristic".to_string()))?;

        peripheral.subscribe(&receive).await?;
        tracing::debug!("Subscribed to board notifications");

        let (data_tx, data_rx) = mpsc::channel(256);
        let mut stream = peripheral.notifications().await?;
        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != RECEIVE_CHAR_UUID {
                    continue;
                }
                if data_tx.send(notification.value).await.is_err() {
                    break;
                }
            }
            tracing::info!("Notification stream ended");
        });

        let (commands, mut command_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer = peripheral.clone();
        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                if let Err(e) = writer.write(&send, &command, WriteType::WithoutResponse).await {
                    tracing::warn!("BLE write failed: {e}");
                }
            }
        });

        Ok((Self { peripheral, commands }, data_rx))
    }

    /// Disconnect from the board.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request fails
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Transport for BleTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.commands.send(bytes.to_vec()).map_err(|_| TransportError::Closed)
    }
}
