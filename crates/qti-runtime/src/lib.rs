mod aggregates;
mod eval;
mod exec;
mod geometry;
mod mapping;
mod math;
mod numeric;
mod registry;
mod rng;
mod test_ctx;

pub use eval::{eval_expr, EvalEnv};
pub use exec::{exec_program, ExecFlow};
pub use registry::{
    CustomOperatorCall, CustomOperatorFn, CustomOperatorRegistry, EmptyCustomOperatorRegistry,
    MapCustomOperatorRegistry,
};
pub use rng::seeded_rng;
pub use test_ctx::{TestEvalContext, TestItemView};
