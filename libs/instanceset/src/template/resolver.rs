//! Ordinal allocation across templates.
//!
//! One resolver serves both naming modes:
//!
//! - **Flat**: every template draws from one set-wide ordinal pool. The
//!   pass is seeded with the ordinals each template currently holds (as
//!   recorded in status) so assignments are sticky across passes.
//! - **Separated**: each template owns its own pool; only the template's
//!   constraint and its offline names are considered.
//!
//! Running out of ordinals is not an error: the resolution records a
//! per-template shortfall and the caller retries on a later pass.

use std::collections::BTreeMap;

use crate::ordinals::{fill_from, next_free, shrink_to, OrdinalSet, OrdinalSpace};

/// How instance names relate to ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingMode {
    /// `parent-[template-]ordinal`, one ordinal pool per template.
    Separated,
    /// `parent-ordinal`, one ordinal pool for the whole set.
    Flat,
}

impl NamingMode {
    pub fn from_flag(flat: bool) -> Self {
        if flat {
            NamingMode::Flat
        } else {
            NamingMode::Separated
        }
    }
}

/// What one template asks of the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDemand {
    pub name: String,
    pub replicas: usize,
    /// Explicit ordinal constraint; `None` draws from the open pool.
    pub constraint: Option<OrdinalSpace>,
    /// Offline ordinals in this template's pool (separated mode).
    pub offline: OrdinalSet,
}

impl TemplateDemand {
    pub fn new(name: impl Into<String>, replicas: usize) -> Self {
        Self {
            name: name.into(),
            replicas,
            constraint: None,
            offline: OrdinalSet::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: OrdinalSpace) -> Self {
        self.constraint = (!constraint.is_empty()).then_some(constraint);
        self
    }

    pub fn with_offline(mut self, offline: OrdinalSet) -> Self {
        self.offline = offline;
        self
    }
}

/// Result of one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Template name to assigned ordinals.
    pub ordinals: BTreeMap<String, OrdinalSet>,
    /// Template name to missing slot count, only for short templates.
    pub shortfall: BTreeMap<String, usize>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.shortfall.is_empty()
    }

    pub fn total_assigned(&self) -> usize {
        self.ordinals.values().map(OrdinalSet::len).sum()
    }

    pub fn total_shortfall(&self) -> usize {
        self.shortfall.values().sum()
    }

    fn assign(&mut self, template: &str, ordinals: OrdinalSet, short: usize) {
        if short > 0 {
            self.shortfall.insert(template.to_string(), short);
        }
        self.ordinals.insert(template.to_string(), ordinals);
    }
}

/// Resolves ordinals for a set of templates.
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    mode: NamingMode,
}

impl Resolver {
    pub fn new(mode: NamingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> NamingMode {
        self.mode
    }

    /// `current` maps template names (including templates that no longer
    /// exist) to the ordinals they hold; `offline` holds flat-pool offline
    /// ordinals. Separated mode ignores both and uses each demand's own
    /// offline set.
    pub fn resolve(
        &self,
        demands: &[TemplateDemand],
        current: &BTreeMap<String, OrdinalSet>,
        offline: &OrdinalSet,
    ) -> Resolution {
        match self.mode {
            NamingMode::Flat => resolve_flat(demands, current, offline),
            NamingMode::Separated => resolve_separated(demands),
        }
    }
}

/// Flat-pool resolution.
///
/// Templates with an explicit constraint go first, by name: each keeps the
/// ordinals it holds inside its constraint, sheds the highest when it has
/// too many, and grows with the lowest constraint ordinals that no other
/// constrained template holds or has just been given. Ordinals held by
/// unconstrained or removed templates may be claimed.
///
/// Unconstrained templates follow, by name (the default template `""`
/// sorts first). They keep what they hold outside every constraint and
/// outside the offline set, shed the highest, and grow with the lowest
/// ordinal that is neither held by anyone at the start of the pass nor
/// already handed out.
pub fn resolve_flat(
    demands: &[TemplateDemand],
    current: &BTreeMap<String, OrdinalSet>,
    offline: &OrdinalSet,
) -> Resolution {
    let empty = OrdinalSet::new();
    let held = |name: &str| current.get(name).unwrap_or(&empty);

    let mut sorted: Vec<&TemplateDemand> = demands.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let (constrained, open): (Vec<_>, Vec<_>) =
        sorted.into_iter().partition(|d| d.constraint.is_some());

    let mut used: OrdinalSet = current.values().flatten().copied().collect();
    let mut resolution = Resolution::default();

    for demand in &constrained {
        let Some(space) = demand.constraint.as_ref() else {
            continue;
        };

        let mut blocked = offline.clone();
        for other in constrained.iter().filter(|o| o.name != demand.name) {
            blocked.extend(held(&other.name));
            if let Some(given) = resolution.ordinals.get(&other.name) {
                blocked.extend(given);
            }
        }

        let mut keep: OrdinalSet = held(&demand.name)
            .iter()
            .copied()
            .filter(|o| space.contains(*o) && !offline.contains(o))
            .collect();
        shrink_to(&mut keep, demand.replicas);

        let candidates = space.iter().filter(|o| !blocked.contains(o));
        let short = fill_from(&mut keep, demand.replicas, candidates);

        resolution.assign(&demand.name, keep, short);
    }

    for given in resolution.ordinals.values() {
        used.extend(given);
    }

    let reserved: Vec<&OrdinalSpace> = constrained
        .iter()
        .filter_map(|d| d.constraint.as_ref())
        .collect();

    for demand in &open {
        let mut keep: OrdinalSet = held(&demand.name)
            .iter()
            .copied()
            .filter(|o| !offline.contains(o) && !reserved.iter().any(|s| s.contains(*o)))
            .collect();
        shrink_to(&mut keep, demand.replicas);

        let mut taken = used.clone();
        taken.extend(offline);
        let mut cursor = Some(0);
        while keep.len() < demand.replicas {
            let Some(next) = cursor.and_then(|from| next_free(from, &taken, &reserved)) else {
                break;
            };
            keep.insert(next);
            taken.insert(next);
            cursor = next.checked_add(1);
        }
        let short = demand.replicas - keep.len();

        used.extend(&keep);
        resolution.assign(&demand.name, keep, short);
    }

    resolution
}

/// Separated-pool resolution: each template takes the lowest ordinals of
/// its constraint (or of `0..`) that are not offline.
pub fn resolve_separated(demands: &[TemplateDemand]) -> Resolution {
    let mut resolution = Resolution::default();

    for demand in demands {
        let mut picked = OrdinalSet::new();
        let short = match demand.constraint.as_ref() {
            Some(space) => fill_from(
                &mut picked,
                demand.replicas,
                space.iter().filter(|o| !demand.offline.contains(o)),
            ),
            None => fill_from(
                &mut picked,
                demand.replicas,
                (0..=i32::MAX).filter(|o| !demand.offline.contains(o)),
            ),
        };
        resolution.assign(&demand.name, picked, short);
    }

    resolution
}
