// Domain layer: schema, plan, notebook and log models plus the ports the
// pipelines depend on.

pub mod logs;
pub mod notebook;
pub mod plan;
pub mod ports;
pub mod schema;
