pub mod probe_table;

pub use probe_table::ProbeTable;
