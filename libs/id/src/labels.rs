//! Label and annotation keys stamped on managed instances.

/// Name of the owning instance set.
pub const INSTANCE_SET_NAME: &str = "instanceset.io/instance-set";

/// Name of the instance itself, used by per-instance selectors.
pub const INSTANCE_NAME: &str = "instanceset.io/instance-name";

/// Template that produced the instance; empty for the default template.
pub const TEMPLATE_NAME: &str = "instanceset.io/instance-template";

/// Lower-cased role name reported by role probing.
pub const ROLE: &str = "instanceset.io/role";

/// Revision hash of the template the instance was built from.
pub const REVISION_HASH: &str = "controller-revision-hash";

/// Annotations that restart an instance when changed. They survive the
/// in-place field filter so a change forces a new revision.
pub const RESTART_ANNOTATIONS: &[&str] = &[
    "instanceset.io/restart",
    "kubectl.kubernetes.io/restartedAt",
];
