// Submodules for separation of concerns
mod exec;
mod filter;
mod operand;
mod plan;
mod shape;

// Public API re-exports
pub use exec::{execute, execute_with_count};
pub use filter::{CmpOp, Filter, FilterBuilder, GEO_COORDS_FIELD, GEO_FIELD};
pub use operand::{Operand, coerce_bson};
pub use plan::{FindOptions, Order, Projection, QueryPlan, SortSpec};
pub use shape::{
    OutputMode, RenderOptions, apply_metadata_projection, parse_options, shape_entities,
    shape_entity, strip_builtins, strip_identity,
};
