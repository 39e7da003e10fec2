//! Demo device: a simulated thermostat.
//!
//! Parameters `setpoint` (double) and `heating` (bool) are mirrored into
//! sync cells. While networked the device publishes its temperature every
//! loop and reacts to `target` messages in local scope.

use std::sync::Mutex;

use nodelink_core::{ConnectivityState, Parameter, QoS, Scope, SyncCell};
use nodelink_runtime::{Device, DeviceContext};
use tracing::{debug, info, warn};

pub struct Thermostat {
    setpoint: SyncCell<f64>,
    heating: SyncCell<bool>,
    temperature: Mutex<f64>,
}

impl Thermostat {
    pub fn new() -> Self {
        Self {
            setpoint: SyncCell::new(0.0),
            heating: SyncCell::new(false),
            temperature: Mutex::new(18.0),
        }
    }

    /// Declarations of the device parameters, bound to the device's cells.
    pub fn parameters(&self) -> Vec<Parameter> {
        vec![
            Parameter::double("setpoint", 21.0).synced(&self.setpoint),
            Parameter::bool("heating", true).synced(&self.heating),
        ]
    }

    pub fn temperature(&self) -> f64 {
        *self.temperature.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move the temperature half a degree towards the setpoint when heating,
    /// otherwise let it cool down.
    fn step(&self) -> f64 {
        let mut temperature = self.temperature.lock().unwrap_or_else(|e| e.into_inner());
        let setpoint = self.setpoint.get();
        if self.heating.get() && *temperature < setpoint {
            *temperature = (*temperature + 0.5).min(setpoint);
        } else {
            *temperature -= 0.1;
        }
        *temperature
    }
}

impl Default for Thermostat {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Thermostat {
    fn on_online(&self, ctx: &DeviceContext) {
        ctx.subscribe("target", QoS::AtLeastOnce, Scope::Local);
        info!(setpoint = self.setpoint.get(), "thermostat online");
    }

    fn on_offline(&self, _ctx: &DeviceContext) {
        info!("thermostat offline");
    }

    fn on_message(&self, ctx: &DeviceContext, topic: &str, payload: &[u8], scope: Scope) {
        if scope != Scope::Local || topic != "target" {
            debug!(topic, %scope, "ignored message");
            return;
        }

        let value = String::from_utf8_lossy(payload);
        match value.trim().parse::<f64>() {
            Ok(target) => {
                if let Err(e) = ctx.params().set_double("setpoint", target) {
                    warn!(error = %e, "failed to store setpoint");
                }
            }
            Err(_) => warn!(payload = %value, "invalid target"),
        }
    }

    fn on_loop(&self, ctx: &DeviceContext) {
        let temperature = self.step();
        ctx.publish_str("temperature", &format!("{temperature:.1}"), Scope::Local);
    }

    fn on_update(&self, _ctx: &DeviceContext, param: &str, value: &str) {
        info!(param, value, "parameter updated remotely");
    }

    fn on_status(&self, state: ConnectivityState) {
        debug!(%state, "thermostat saw state change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodelink_core::{MemoryBackend, ParameterStore};

    #[test]
    fn test_parameters_bind_cells() {
        let thermostat = Thermostat::new();
        let store =
            ParameterStore::with_parameters(MemoryBackend::new("t"), 4, thermostat.parameters())
                .unwrap();
        store.init().unwrap();

        assert_eq!(thermostat.setpoint.get(), 21.0);
        assert!(thermostat.heating.get());

        store.set_double("setpoint", 19.5).unwrap();
        assert_eq!(thermostat.setpoint.get(), 19.5);
    }

    #[test]
    fn test_step_heats_towards_setpoint() {
        let thermostat = Thermostat::new();
        thermostat.setpoint.set(19.0);
        thermostat.heating.set(true);

        assert_eq!(thermostat.step(), 18.5);
        assert_eq!(thermostat.step(), 19.0);
        assert_eq!(thermostat.step(), 19.0 - 0.1);
    }
}
