// Collision Sentinel - Core Library
// Conditions NYC collision extracts (crash, person, vehicle, weather),
// integrates them, derives severity, and windows the result.

pub mod table;          // String-valued table model
pub mod storage;        // CSV / Parquet artifacts, streaming scan + sink
pub mod error;
pub mod columns;        // Canonical names + alias resolution
pub mod dates;
pub mod diagnostics;    // Stage reports (anomaly vs expected)
pub mod sources;        // Per-source conditioners
pub mod integrate;      // Fixed join sequence
pub mod severity;
pub mod window;         // Streaming recent-years filter
pub mod collision_view;
pub mod config;
pub mod logging;
pub mod manifest;
pub mod pipeline;

// Re-export commonly used types
pub use table::{Row, Table, Value};
pub use storage::{
    count_rows, read_table, read_table_counted, scan_table, write_table, TableFormat, TableScan,
    TableSink,
};
pub use error::{PipelineError, Result};
pub use columns::{resolve, resolve_fields, ColumnMap, FieldSpec};
pub use diagnostics::{profile_table, ReportSink, StageReport, TableProfile, Tier, TracingSink};
pub use sources::{
    get_conditioner, CrashConditioner, PersonConditioner, SourceConditioner, SourceKind,
    VehicleConditioner, VehicleTypeTable, WeatherCondition, WeatherConditioner, WeatherSignals,
    INJURY_CATEGORIES, MISSING_INJURY_DEFAULT, WEATHER_PRECEDENCE,
};
pub use integrate::{hash_join, ConditionedSources, DatasetIntegrator, JoinKind, JoinSpec, JoinStats};
pub use severity::{CollisionAggregate, CollisionSeverity, PersonSeverity, SeverityDeriver};
pub use window::{TemporalWindowFilter, WindowBounds};
pub use collision_view::CollisionView;
pub use config::PipelineConfig;
pub use manifest::{ArtifactRecord, RunManifest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
