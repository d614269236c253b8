//! Connector/driver test rig
//!
//! A [`KvRig`] owns an in-memory channel, a memory key-value backend and a
//! driver acquired through a [`DriverContext`]. Connectors opened from the rig
//! talk to that driver.

use std::{sync::Arc, time::Duration};

use cirrus_connector::{ConnectorConfig, KvConnector};
use cirrus_driver::{
    BackendKind, BackendTable, DriverConfig, DriverContext, DriverStub, MemoryKvBackend,
};
use cirrus_transport::{Channel, MemoryChannel, SessionHandle, SessionReceiver};

/// Builder for [`KvRig`]
#[derive(Debug, Clone)]
pub struct KvRigBuilder {
    driver: DriverConfig,
    connector_workers: usize,
}

impl Default for KvRigBuilder {
    fn default() -> Self {
        Self {
            driver: DriverConfig::for_role("kv-driver"),
            connector_workers: 2,
        }
    }
}

impl KvRigBuilder {
    /// Role the driver listens on
    pub fn role(mut self, role: &str) -> Self {
        self.driver.role = role.to_string();
        self
    }

    /// Driver worker threads
    pub fn driver_workers(mut self, workers: usize) -> Self {
        self.driver.worker_threads = workers;
        self
    }

    /// Send workers per connector
    pub fn connector_workers(mut self, workers: usize) -> Self {
        self.connector_workers = workers;
        self
    }

    /// Violations tolerated per session before the driver aborts it
    pub fn max_protocol_violations(mut self, max: u32) -> Self {
        self.driver.max_protocol_violations = max;
        self
    }

    /// Driver shutdown grace period
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.driver.shutdown_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Start the channel and the driver
    pub fn build(self) -> KvRig {
        crate::init_tracing();
        let channel = Arc::new(MemoryChannel::new().expect("memory channel runtime"));
        let backend = MemoryKvBackend::new();
        let mut table = BackendTable::new();
        table.register(BackendKind::Memory, backend.constructor());
        let context = DriverContext::new(table);
        let driver = context
            .acquire(self.driver.clone(), Arc::clone(&channel) as Arc<dyn Channel>)
            .expect("driver starts");
        KvRig {
            channel,
            backend,
            context,
            driver,
            connector_workers: self.connector_workers,
        }
    }
}

/// Running driver plus the channel connectors reach it on
#[derive(Debug)]
pub struct KvRig {
    channel: Arc<MemoryChannel>,
    backend: MemoryKvBackend,
    context: DriverContext,
    driver: DriverStub,
    connector_workers: usize,
}

impl Default for KvRig {
    fn default() -> Self {
        Self::new()
    }
}

impl KvRig {
    /// Rig with default settings
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Customise the rig before starting it
    pub fn builder() -> KvRigBuilder {
        KvRigBuilder::default()
    }

    /// Channel shared by driver and connectors
    pub fn channel(&self) -> &Arc<MemoryChannel> {
        &self.channel
    }

    /// Backend behind the driver
    pub fn backend(&self) -> &MemoryKvBackend {
        &self.backend
    }

    /// Context owning the driver
    pub fn context(&self) -> &DriverContext {
        &self.context
    }

    /// The running driver
    pub fn driver(&self) -> &DriverStub {
        &self.driver
    }

    /// Connector configuration pointed at this rig's driver
    pub fn connector_config(&self, client_id: &str, bucket: &str) -> ConnectorConfig {
        ConnectorConfig {
            worker_threads: self.connector_workers,
            ..ConnectorConfig::new(client_id, bucket).with_driver_role(self.driver.role())
        }
    }

    /// Connector with an open session, not yet accessed
    pub fn connector(&self, client_id: &str, bucket: &str) -> KvConnector {
        KvConnector::open(
            self.connector_config(client_id, bucket),
            self.channel.as_ref(),
        )
        .expect("connector opens")
    }

    /// Connector that has accessed `bucket`
    pub fn accessed(&self, client_id: &str, bucket: &str) -> KvConnector {
        let connector = self.connector(client_id, bucket);
        connector
            .access()
            .get_result_timeout(crate::SETTLE_TIMEOUT)
            .expect("access succeeds");
        connector
    }

    /// Raw session to the driver with a custom receiver
    pub fn raw_session(&self, receiver: Arc<dyn SessionReceiver>) -> SessionHandle {
        self.channel
            .connect(self.driver.role(), receiver)
            .expect("driver is listening")
    }

    /// Release the rig's hold on the driver, destroying it
    pub fn stop(&self) -> bool {
        self.context.release(self.driver.role()).expect("driver is running")
    }
}
