//! Serial port adapter using the `serialport` crate
//!
//! Implements `SerialFactory` and `SerialConnection` traits.
//! `SerialPortFactory` holds no state; it only lists and opens OS ports.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::domain::{ModemError, ModemResult, SerialPortInfo};
use crate::ports::{SerialConnection, SerialFactory};

/// Per-read timeout; bounds how long the reader thread takes to notice a close
const READ_TIMEOUT_MS: u64 = 100;

/// Zero-sized factory for creating serial port connections.
pub struct SerialPortFactory;

impl SerialFactory for SerialPortFactory {
    fn list_ports(&self) -> ModemResult<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| ModemError::Serial(format!("Failed to list ports: {e}")))?;

        Ok(ports
            .into_iter()
            .map(|p| SerialPortInfo {
                port_type: describe_port_type(&p.port_type),
                name: p.port_name,
            })
            .collect())
    }

    fn open(&self, port: &str, baud_rate: u32) -> ModemResult<Box<dyn SerialConnection>> {
        let serial = serialport::new(port, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .open()
            .map_err(|e| ModemError::Serial(format!("Failed to open {port}: {e}")))?;

        Ok(Box::new(SerialPortConnection {
            name: port.to_string(),
            port: serial,
            connected: true,
        }))
    }
}

/// Short label for a port listing, e.g. `USB 2C7C:0125 EC25 LTE`
fn describe_port_type(kind: &serialport::SerialPortType) -> String {
    use serialport::SerialPortType;
    match kind {
        SerialPortType::UsbPort(usb) => match usb.product.as_deref() {
            Some(product) => format!("USB {:04X}:{:04X} {product}", usb.vid, usb.pid),
            None => format!("USB {:04X}:{:04X}", usb.vid, usb.pid),
        },
        SerialPortType::PciPort => "PCI".into(),
        SerialPortType::BluetoothPort => "Bluetooth".into(),
        SerialPortType::Unknown => "Native".into(),
    }
}

/// An open serial port connection wrapping the `serialport` crate.
pub struct SerialPortConnection {
    name: String,
    port: Box<dyn serialport::SerialPort>,
    connected: bool,
}

impl SerialConnection for SerialPortConnection {
    fn write(&mut self, data: &[u8]) -> ModemResult<usize> {
        self.port
            .write_all(data)
            .and_then(|_| self.port.flush())
            .map(|_| data.len())
            .map_err(|e| ModemError::Serial(format!("{}: write failed: {e}", self.name)))
    }

    fn read(&mut self, buffer: &mut [u8]) -> ModemResult<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => {
                self.connected = false;
                Err(ModemError::Serial(format!("{}: read failed: {e}", self.name)))
            }
        }
    }

    fn try_clone(&self) -> ModemResult<Box<dyn SerialConnection>> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| ModemError::Serial(format!("{}: clone failed: {e}", self.name)))?;
        Ok(Box::new(SerialPortConnection {
            name: self.name.clone(),
            port,
            connected: self.connected,
        }))
    }

    fn close(&mut self) -> ModemResult<()> {
        // The OS handle is released when `port` is dropped.
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
