// Coupled-regulator discovery and validation
//
// Some rails are wired so that their voltages must move together. The
// coupling declarations are static configuration; this module answers pure
// queries over them and validates that declarations are symmetric. An
// asymmetric declaration is a configuration error and is reported as
// invalid, never auto-corrected.

use std::collections::HashMap;

/// Read-only queries over coupled-regulator declarations.
///
/// All three queries are side-effect-free and idempotent. Like the supply
/// directory, the implementation is chosen once at construction;
/// [`NoCoupling`] serves when the configuration declares nothing.
pub trait CouplingResolver: Send + Sync {
    /// Number of partners `device` declares; 0 when coupling is
    /// undeclared or unsupported.
    fn coupled_count(&self, device: &str) -> usize;

    /// The partner at `index` in declaration order, `None` out of range.
    fn coupled_at(&self, device: &str, index: usize) -> Option<&str>;

    /// True only if every partner that `device` declares reciprocally
    /// declares `device` back, with a matching partner count.
    fn is_coupling_valid(&self, device: &str) -> bool;
}

/// Resolver for configurations with no coupling declarations.
pub struct NoCoupling;

impl CouplingResolver for NoCoupling {
    fn coupled_count(&self, _device: &str) -> usize {
        0
    }

    fn coupled_at(&self, _device: &str, _index: usize) -> Option<&str> {
        None
    }

    fn is_coupling_valid(&self, _device: &str) -> bool {
        true
    }
}

/// Resolver over declared coupling tables.
pub struct DeclaredCoupling {
    partners: HashMap<String, Vec<String>>,
}

impl DeclaredCoupling {
    /// Build from (device, declared partners) pairs. Declaration order of
    /// partners is preserved for [`CouplingResolver::coupled_at`].
    pub fn new(declarations: Vec<(String, Vec<String>)>) -> Self {
        DeclaredCoupling {
            partners: declarations.into_iter().collect(),
        }
    }
}

impl CouplingResolver for DeclaredCoupling {
    fn coupled_count(&self, device: &str) -> usize {
        self.partners.get(device).map(Vec::len).unwrap_or(0)
    }

    fn coupled_at(&self, device: &str, index: usize) -> Option<&str> {
        self.partners
            .get(device)?
            .get(index)
            .map(String::as_str)
    }

    fn is_coupling_valid(&self, device: &str) -> bool {
        let Some(mine) = self.partners.get(device) else {
            // Nothing declared, nothing to contradict.
            return true;
        };
        mine.iter().all(|partner| {
            self.partners
                .get(partner)
                .map(|theirs| {
                    theirs.iter().any(|d| d == device) && theirs.len() == mine.len()
                })
                .unwrap_or(false)
        })
    }
}
