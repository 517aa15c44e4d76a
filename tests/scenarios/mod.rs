//! Cache scenarios and graph properties

mod graph_properties;
mod persistence_scenarios;
mod workflow_scenarios;
