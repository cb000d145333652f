//! Port scan: find modems and read their SIM identity.

use std::sync::Arc;
use std::thread;

use crate::at::{encode, parse_imei, parse_operator, parse_own_number, parse_signal, AtCommand};
use crate::channel::SerialChannel;
use crate::domain::{EngineConfig, ModemResult, SerialPortInfo, SimInfo};
use crate::ports::SerialFactory;

pub struct PortScanner {
    factory: Arc<dyn SerialFactory>,
    config: EngineConfig,
}

impl PortScanner {
    pub fn new(factory: Arc<dyn SerialFactory>, config: EngineConfig) -> Self {
        Self { factory, config }
    }

    pub fn list_ports(&self) -> ModemResult<Vec<SerialPortInfo>> {
        self.factory.list_ports()
    }

    /// Probe one port. Never fails: problems are reported in the result.
    pub fn probe(&self, port: &str) -> SimInfo {
        let channel = SerialChannel::new(port, self.config.baud_rate, self.factory.clone());
        if !channel.open() {
            return SimInfo::unavailable(port, "Cannot open port");
        }
        thread::sleep(self.config.probe_settle());

        let timeout = self.config.status_timeout();
        let query = |command: AtCommand| channel.send_and_await(&encode(&command), timeout);

        let number_reply = query(AtCommand::OwnNumber);
        let phone_number = parse_own_number(&number_reply)
            .or_else(|| parse_own_number(&query(AtCommand::FirstPhonebookEntry)));
        let operator_reply = query(AtCommand::Operator);
        let imei_reply = query(AtCommand::Imei);
        let signal_reply = query(AtCommand::SignalQuality);
        channel.close();

        let responsive = [&number_reply, &operator_reply, &imei_reply, &signal_reply]
            .iter()
            .any(|reply| !reply.trim().is_empty());
        if !responsive {
            return SimInfo::unavailable(port, "No response");
        }

        let carrier = parse_operator(&operator_reply);
        let status = if phone_number.is_some() || carrier.is_some() {
            "Ready"
        } else {
            "No SIM"
        };
        log::info!(
            "[{port}] {status}: number {}, carrier {}",
            phone_number.as_deref().unwrap_or("-"),
            carrier.as_deref().unwrap_or("-")
        );
        SimInfo {
            com_port: port.to_string(),
            available: true,
            status: status.to_string(),
            phone_number,
            carrier,
            imei: parse_imei(&imei_reply),
            signal: parse_signal(&signal_reply),
        }
    }

    /// Probe every listed port, `worker_threads` at a time. Results keep
    /// the listing order.
    pub fn scan_all(&self) -> ModemResult<Vec<SimInfo>> {
        let ports = self.list_ports()?;
        log::info!("Scanning {} ports", ports.len());

        let batch = self.config.worker_threads.max(1);
        let mut results = Vec::with_capacity(ports.len());
        for chunk in ports.chunks(batch) {
            thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|info| (info, scope.spawn(move || self.probe(&info.name))))
                    .collect();
                for (info, handle) in handles {
                    results.push(handle.join().unwrap_or_else(|_| {
                        log::error!("[{}] probe panicked", info.name);
                        SimInfo::unavailable(&info.name, "Probe failed")
                    }));
                }
            });
        }
        Ok(results)
    }
}
