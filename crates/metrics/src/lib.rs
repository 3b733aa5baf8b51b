pub mod catalog;
pub mod combine;
pub mod definition;
pub mod defs;
pub mod query;
pub mod rewrite;
pub mod span_filter;
pub mod wrapper;

pub use catalog::MetricCatalog;
pub use definition::{MetricDefinition, MetricKind, MetricType};
pub use query::{MetricRepository, MetricsService, QueryMetricsRequest, QueryMetricsResponse};
pub use span_filter::{PlatformSpanFilter, SpanEnv, SpanFilter};
pub use wrapper::Wrapper;
