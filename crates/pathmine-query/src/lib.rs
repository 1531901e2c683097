//! Pathmine path query engine.
//!
//! Turns dot-separated paths (`Gene.organism.name`) into validated, typed
//! queries over a [`pathmine_model::Model`] and compiles them for an
//! [`executor::ObjectStore`].
//!
//! ## Pipeline
//!
//! ```text
//! Path ──resolve──▶ ResolvedPath ──▶ PathQuery (nodes, view, sort, logic)
//!                                        │            │
//!                                analysis::locked_paths / link_paths
//!                                        │
//!                                  compile::compile ──▶ ExecutableQuery ──▶ ObjectStore
//! ```
//!
//! Templates ([`template::Template`]) are published queries whose editable
//! constraints are filled in per request; [`template::count_templates`]
//! counts a batch of them, isolating failures per template.
//!
//! Nothing in this crate spawns threads or holds global mutable state. The
//! model is shared read-only behind an `Arc`; each [`PathQuery`] belongs to
//! one editing context.

pub mod analysis;
pub mod builder;
pub mod compile;
pub mod config;
pub mod constraint;
pub mod executor;
pub mod logic;
pub mod path;
pub mod query;
pub mod registry;
pub mod resolve;
pub mod template;
pub mod value;
pub mod xml;

pub use analysis::{link_paths, locked_paths};
pub use builder::{type_for_path, BuilderSnapshot};
pub use compile::{compile, CompileError, ExecutableQuery};
pub use config::{Direction, EngineConfig, ObjectViewPolicy};
pub use constraint::{Constraint, ConstraintOp, ConstraintValue};
pub use executor::{ExecutionError, ExecutionLimits, ObjectStore, ResultSet, ResultValue};
pub use logic::LogicExpr;
pub use path::Path;
pub use query::{OrderBy, PathNode, PathQuery, QueryError};
pub use registry::{Scope, TemplateRegistry};
pub use resolve::{NodeKind, PathError, PathErrorReason, PathResolver, ResolvedPath};
pub use template::{
    count_results, count_templates, object_template_counts, CountOutcome, ObjectView, Template,
    TemplateError, TemplateValue,
};
pub use value::Value;
pub use xml::{parse_query, parse_templates, query_to_xml, template_to_xml, XmlError};
