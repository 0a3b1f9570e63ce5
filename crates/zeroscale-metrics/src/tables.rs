//! The shared status tables.

use dashmap::DashMap;
use parking_lot::Mutex;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use zeroscale_state::{ContainerId, ServiceId};

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "Container ID")]
    id: String,
    #[tabled(rename = "Utilization")]
    utilization: String,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "Service ID")]
    id: String,
    #[tabled(rename = "Replicas")]
    replicas: u64,
}

#[derive(Tabled)]
struct ArmedPortRow {
    #[tabled(rename = "Service ID")]
    service_id: String,
    #[tabled(rename = "Port")]
    port: u32,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Event")]
    event: String,
}

/// In-memory tables shared by every subsystem.
///
/// Writers are the monitors (utilization), the actuator (replicas), the
/// port-wake probe (armed ports), and anyone with something to say (events).
#[derive(Default)]
pub struct LogTables {
    containers: DashMap<ContainerId, f64>,
    services: DashMap<ServiceId, u64>,
    armed_ports: DashMap<u32, ServiceId>,
    events: Mutex<Vec<String>>,
}

impl LogTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest observed utilization for a container.
    pub fn set_container_utilization(&self, container_id: &str, value: f64) {
        self.containers.insert(container_id.to_string(), value);
    }

    pub fn remove_container(&self, container_id: &str) {
        self.containers.remove(container_id);
    }

    /// Record the replica count last applied to a service.
    pub fn set_service_replicas(&self, service_id: &str, replicas: u64) {
        self.services.insert(service_id.to_string(), replicas);
    }

    pub fn remove_service(&self, service_id: &str) {
        self.services.remove(service_id);
    }

    /// Record a port armed in the local port-wake probe.
    pub fn add_armed_port(&self, port: u32, service_id: &str) {
        self.armed_ports.insert(port, service_id.to_string());
    }

    pub fn remove_armed_port(&self, port: u32) {
        self.armed_ports.remove(&port);
    }

    /// Append a line to the event log.
    pub fn add_event(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }

    /// Render all tables to one report string.
    pub fn render(&self, include_events: bool) -> String {
        let mut out = String::new();

        let containers: Vec<ContainerRow> = self
            .containers
            .iter()
            .map(|e| ContainerRow {
                id: e.key().clone(),
                utilization: format!("{:.2}", e.value()),
            })
            .collect();
        out.push_str(&render_table(containers));
        out.push('\n');

        let services: Vec<ServiceRow> = self
            .services
            .iter()
            .map(|e| ServiceRow {
                id: e.key().clone(),
                replicas: *e.value(),
            })
            .collect();
        out.push_str(&render_table(services));
        out.push('\n');

        let ports: Vec<ArmedPortRow> = self
            .armed_ports
            .iter()
            .map(|e| ArmedPortRow {
                service_id: e.value().clone(),
                port: *e.key(),
            })
            .collect();
        out.push_str(&render_table(ports));
        out.push('\n');

        if include_events {
            let events: Vec<EventRow> = self
                .events
                .lock()
                .iter()
                .map(|e| EventRow { event: e.clone() })
                .collect();
            out.push_str(&render_table(events));
            out.push('\n');
        }

        out
    }
}

fn render_table<R: Tabled>(rows: Vec<R>) -> String {
    let mut table = Table::new(rows);
    table.with(Style::ascii());
    table.to_string()
}
