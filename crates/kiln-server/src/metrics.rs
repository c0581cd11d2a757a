//! Prometheus counters for the server.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::ServerResult;

/// Connection and traffic counters, registered in a private registry.
///
/// Cloning is cheap and every clone updates the same series.
#[derive(Clone, Debug)]
pub struct ServerMetrics {
    registry: Registry,
    pub connections_accepted: IntCounter,
    pub connections_active: IntGauge,
    pub connections_closed: IntCounter,
    pub bytes_read: IntCounter,
    pub errors: IntCounter,
}

impl ServerMetrics {
    pub fn new() -> ServerResult<Self> {
        let registry = Registry::new();

        let connections_accepted = IntCounter::new(
            "kiln_connections_accepted_total",
            "Connections accepted by the listener",
        )?;
        let connections_active =
            IntGauge::new("kiln_connections_active", "Connections currently served")?;
        let connections_closed = IntCounter::new(
            "kiln_connections_closed_total",
            "Connections whose task has finished",
        )?;
        let bytes_read = IntCounter::new("kiln_bytes_read_total", "Bytes read from peers")?;
        let errors = IntCounter::new("kiln_errors_total", "Error events emitted")?;

        registry.register(Box::new(connections_accepted.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(connections_closed.clone()))?;
        registry.register(Box::new(bytes_read.clone()))?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            registry,
            connections_accepted,
            connections_active,
            connections_closed,
            bytes_read,
            errors,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of connections currently being served.
    pub fn active(&self) -> usize {
        usize::try_from(self.connections_active.get()).unwrap_or(0)
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_accepted.inc();
        self.connections_active.inc();
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_closed.inc();
        self.connections_active.dec();
    }

    /// Renders every series in the Prometheus text exposition format.
    pub fn render(&self) -> ServerResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::ServerError::Metrics(e.to_string()))
    }
}
