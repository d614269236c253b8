//! Driver context
//!
//! Owns the running driver stubs of a process, keyed by role. Components that
//! need a driver acquire it from the context they were handed and release it
//! when done; the stub is destroyed when its last holder releases it.

use std::{collections::HashMap, fmt, sync::Arc};

use cirrus_transport::Channel;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    backend::BackendTable,
    config::DriverConfig,
    errors::{DriverError, Result},
    stub::DriverStub,
};

struct RunningDriver {
    stub: DriverStub,
    channel: Arc<dyn Channel>,
    holders: usize,
}

/// Registry of running driver stubs
pub struct DriverContext {
    backends: BackendTable,
    drivers: Mutex<HashMap<String, RunningDriver>>,
}

impl fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut roles: Vec<_> = self.drivers.lock().keys().cloned().collect();
        roles.sort();
        f.debug_struct("DriverContext")
            .field("backends", &self.backends)
            .field("roles", &roles)
            .finish()
    }
}

impl DriverContext {
    /// Context creating stubs from `backends`
    pub fn new(backends: BackendTable) -> Self {
        Self {
            backends,
            drivers: Mutex::new(HashMap::new()),
        }
    }

    /// Stub serving `config.role`, started and listening on `channel` if it is
    /// not running yet
    pub fn acquire(&self, config: DriverConfig, channel: Arc<dyn Channel>) -> Result<DriverStub> {
        let mut drivers = self.drivers.lock();
        if let Some(running) = drivers.get_mut(&config.role) {
            running.holders += 1;
            debug!(role = %config.role, holders = running.holders, "Driver acquired");
            return Ok(running.stub.clone());
        }

        let stub = DriverStub::new(config, &self.backends)?;
        if let Err(e) = stub.listen(channel.as_ref()) {
            stub.destroy();
            return Err(e);
        }
        info!(role = %stub.role(), "Driver started");
        drivers.insert(
            stub.role().to_string(),
            RunningDriver {
                stub: stub.clone(),
                channel,
                holders: 1,
            },
        );
        Ok(stub)
    }

    /// Drop one hold on the driver for `role`; destroys it when none is left.
    ///
    /// Returns whether the driver was destroyed.
    pub fn release(&self, role: &str) -> Result<bool> {
        let retired = {
            let mut drivers = self.drivers.lock();
            let Some(running) = drivers.get_mut(role) else {
                return Err(DriverError::UnknownDriver {
                    role: role.to_string(),
                });
            };
            running.holders -= 1;
            if running.holders > 0 {
                debug!(role, holders = running.holders, "Driver released");
                return Ok(false);
            }
            drivers.remove(role)
        };

        match retired {
            Some(running) => {
                running.channel.close_listener(role);
                running.stub.retire()?;
                info!(role, "Driver stopped");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Running stub for `role`
    pub fn stub(&self, role: &str) -> Option<DriverStub> {
        self.drivers
            .lock()
            .get(role)
            .map(|running| running.stub.clone())
    }

    /// Holders of the driver for `role`; zero if it is not running
    pub fn holders(&self, role: &str) -> usize {
        self.drivers
            .lock()
            .get(role)
            .map_or(0, |running| running.holders)
    }

    /// Destroy every running stub regardless of holders.
    ///
    /// Returns how many stubs were destroyed.
    pub fn shutdown_all(&self) -> usize {
        let drained: Vec<_> = self.drivers.lock().drain().map(|(_, r)| r).collect();
        for running in &drained {
            running.channel.close_listener(running.stub.role());
            running.stub.destroy();
        }
        if !drained.is_empty() {
            info!(drivers = drained.len(), "All drivers stopped");
        }
        drained.len()
    }
}
