//! Per root type storage policies

use crate::model::{Root, RootType};

/// Storage policy for a given root type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootPolicy {
    /// Roots of this type cannot have children: each version builds its root from scratch
    /// and the root is not carried into the next version.
    pub no_child_roots: bool,
}

static STATE_POLICY: RootPolicy = RootPolicy {
    no_child_roots: false,
};

static IO_POLICY: RootPolicy = RootPolicy {
    no_child_roots: true,
};

/// Policy for a root type; `None` for [`RootType::Invalid`]
pub fn policy_for_root_type(root_type: RootType) -> Option<&'static RootPolicy> {
    match root_type {
        RootType::State => Some(&STATE_POLICY),
        RootType::IO => Some(&IO_POLICY),
        RootType::Invalid => None,
    }
}

pub fn policy_for_root(root: &Root) -> Option<&'static RootPolicy> {
    policy_for_root_type(root.root_type)
}

/// All root types whose policy satisfies the predicate
pub fn root_types_with_policy(predicate: impl Fn(&RootPolicy) -> bool) -> Vec<RootType> {
    RootType::ALL
        .into_iter()
        .filter(|t| policy_for_root_type(*t).is_some_and(&predicate))
        .collect()
}

/// All supported root types
pub fn root_types() -> Vec<RootType> {
    root_types_with_policy(|_| true)
}
