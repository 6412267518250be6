//! Template resolution: which instances should exist and what each looks
//! like.

mod build;
mod builder;
mod merge;
mod resolver;

pub use build::{build_instance, match_labels};
pub use builder::{default_template_replicas, NameBuilder, ResolvedTemplate, DEFAULT_TEMPLATE};
pub use merge::{merge_claim_templates, merge_template};
pub use resolver::{resolve_flat, resolve_separated, NamingMode, Resolution, Resolver, TemplateDemand};
