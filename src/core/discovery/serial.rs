//! USB serial discovery

use super::{DiscoveredDevice, Discovery, DiscoveryError};
use crate::config::LinkConfig;
use crate::core::transport::TransportType;
use serialport::{SerialPortInfo, SerialPortType};

/// Finds attached controllers by USB vendor/product id
#[derive(Debug, Clone)]
pub struct SerialDiscovery {
    vendor_id: u16,
    product_id: u16,
}

impl SerialDiscovery {
    /// Match a specific USB vendor/product pair
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Use the ids from the serial settings
    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.serial.vendor_id, config.serial.product_id)
    }

    /// Turn one enumerated port into a device if it is a controller
    pub fn device_from_port(&self, port: &SerialPortInfo) -> Option<DiscoveredDevice> {
        let SerialPortType::UsbPort(usb) = &port.port_type else {
            return None;
        };
        if usb.vid != self.vendor_id || usb.pid != self.product_id {
            return None;
        }

        Some(DiscoveredDevice {
            name: usb
                .product
                .clone()
                .unwrap_or_else(|| port.port_name.clone()),
            address: port.port_name.clone(),
            busy: false,
        })
    }
}

impl Discovery for SerialDiscovery {
    fn find(&self) -> Result<Vec<DiscoveredDevice>, DiscoveryError> {
        let ports = serialport::available_ports().map_err(|e| {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            DiscoveryError::Enumeration(e.to_string())
        })?;

        let devices: Vec<DiscoveredDevice> = ports
            .iter()
            .filter_map(|port| self.device_from_port(port))
            .collect();
        for device in &devices {
            tracing::debug!("Serial controller at {}", device.address);
        }
        Ok(devices)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }
}
