//! In-container runtime for strata-built services: the health gate and the
//! process supervisor that launches the ASGI server.

pub mod health;
pub mod supervisor;
pub mod uploads;

pub use health::{
    HealthError, HealthGate, HealthProbe, HealthState, HealthStatus, HttpProbe, ProbeOutcome,
};
pub use supervisor::{EXIT_CONFIG, Exit, Supervisor, SupervisorConfig, SupervisorError};
pub use uploads::{ProvisionError, ensure_read_only, write_probe};
