//! Control Plane Metrics
//!
//! Prometheus collectors for the VLAN pool, network records, switch calls
//! and API errors. Each [`ControlPlaneMetrics`] owns its own registry so
//! several managers can coexist in one process (tests do this).

use crate::error::{Error, ErrorKind, Result};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "haas_control_plane";

/// Outcome label of a switch call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    Skipped,
    Failed,
    TimedOut,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Ok => "ok",
            CallOutcome::Skipped => "skipped",
            CallOutcome::Failed => "failed",
            CallOutcome::TimedOut => "timed_out",
        }
    }
}

/// Metrics exported by the control plane
#[derive(Debug, Clone)]
pub struct ControlPlaneMetrics {
    registry: Registry,
    leased_vlans: IntGauge,
    networks: IntGauge,
    switch_calls: IntCounterVec,
    api_errors: IntCounterVec,
}

fn register_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

impl ControlPlaneMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let leased_vlans = IntGauge::with_opts(
            Opts::new("leased_vlans", "VLAN tags currently leased").namespace(NAMESPACE),
        )
        .map_err(register_err)?;
        let networks = IntGauge::with_opts(
            Opts::new("networks", "Network records currently stored").namespace(NAMESPACE),
        )
        .map_err(register_err)?;
        let switch_calls = IntCounterVec::new(
            Opts::new("switch_calls_total", "Switch port calls by switch and outcome")
                .namespace(NAMESPACE),
            &["switch", "outcome"],
        )
        .map_err(register_err)?;
        let api_errors = IntCounterVec::new(
            Opts::new("api_errors_total", "Failed API requests by error kind")
                .namespace(NAMESPACE),
            &["kind"],
        )
        .map_err(register_err)?;

        registry
            .register(Box::new(leased_vlans.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(networks.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(switch_calls.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(api_errors.clone()))
            .map_err(register_err)?;

        Ok(Self {
            registry,
            leased_vlans,
            networks,
            switch_calls,
            api_errors,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_leased_vlans(&self, count: usize) {
        self.leased_vlans.set(count as i64);
    }

    pub fn set_networks(&self, count: usize) {
        self.networks.set(count as i64);
    }

    pub fn record_switch_call(&self, switch: &str, outcome: CallOutcome) {
        self.switch_calls
            .with_label_values(&[switch, outcome.as_str()])
            .inc();
    }

    pub fn record_api_error(&self, kind: ErrorKind) {
        self.api_errors.with_label_values(&[kind.as_str()]).inc();
    }

    /// Render all collectors in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("metrics encoding failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let metrics = ControlPlaneMetrics::new().unwrap();
        metrics.set_leased_vlans(2);
        metrics.record_switch_call("1", CallOutcome::Ok);
        metrics.record_switch_call("1", CallOutcome::TimedOut);
        metrics.record_api_error(ErrorKind::Authorization);

        let text = metrics.encode().unwrap();
        assert!(text.contains("haas_control_plane_leased_vlans 2"));
        assert!(text.lines().any(|line| {
            line.starts_with("haas_control_plane_switch_calls_total")
                && line.contains(r#"outcome="timed_out""#)
                && line.contains(r#"switch="1""#)
                && line.ends_with(" 1")
        }));
        assert!(text.contains(r#"haas_control_plane_api_errors_total{kind="authorization"} 1"#));
    }

    #[test]
    fn test_independent_registries() {
        let a = ControlPlaneMetrics::new().unwrap();
        let b = ControlPlaneMetrics::new().unwrap();
        a.set_networks(5);
        assert!(b.encode().unwrap().contains("haas_control_plane_networks 0"));
    }
}
