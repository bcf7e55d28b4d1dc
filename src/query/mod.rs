//! Query algebra and the compiler that builds it from descriptors and request parameters.

pub mod compiler;
pub mod expr;
pub mod plan;

pub use compiler::{attach_foreign, compile_list, delete_selection, lookup, CompiledList, DEFAULT_LIST_MODE};
pub use expr::{coerce_literal, compare_values, values_equal, Comparison, Expr};
pub use plan::{
    ForeignJoin, Lookup, RowQuery, Selection, SortDirection, StreamOp, StreamQuery, StreamSource, TableRef,
    Transform, Transformable,
};
