/*!
 * Monitoring Module
 * Structured tracing for the coordinator
 */

pub mod tracer;

pub use tracer::{generate_trace_id, init_tracing, TaskSpan};
