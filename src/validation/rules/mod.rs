//! The individual validation rules. Each rule inspects one node, slot or
//! vector and reports at most one error; the validator drives the iteration.

pub(crate) mod allocation;
pub(crate) mod structure;
