// Supply name resolution
//
// Maps (consumer, supply name) to the name of a registered device. Two
// sources are consulted: per-consumer declared bindings first (the
// descriptive-tree form), then the global supply map as a fallback. Both
// are built once at construction and never mutated, so lookups take no
// locks.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::ConsumerId;

/// Resolves supply names for consumers.
///
/// Implementations are selected once when the manager is constructed; the
/// configuration-absent case is [`EmptyDirectory`], not a compile-time
/// branch.
pub trait SupplyDirectory: Send + Sync {
    /// Resolve `supply` for `consumer` to a device name.
    ///
    /// `Ok(None)` means nothing matched; the caller decides whether that is
    /// fatal. Returns [`Error::Ambiguous`] when the declared binding and the
    /// supply map name different devices.
    fn resolve(&self, consumer: &ConsumerId, supply: &str) -> Result<Option<String>>;

    /// Supply names declared for `consumer`, in declaration order.
    ///
    /// Backs the get-all-supplies bulk form; the fallback map does not
    /// contribute here.
    fn declared_for(&self, consumer: &ConsumerId) -> Vec<String>;
}

/// A per-consumer supply binding from the descriptive configuration.
#[derive(Debug, Clone)]
pub struct SupplyBinding {
    pub consumer: ConsumerId,
    pub supply: String,
    pub device: String,
}

/// A global supply map entry; `consumer: None` matches any consumer.
#[derive(Debug, Clone)]
pub struct SupplyMapEntry {
    pub consumer: Option<ConsumerId>,
    pub supply: String,
    pub device: String,
}

/// Directory over declared bindings with a supply-map fallback.
pub struct DeclaredDirectory {
    bindings: Vec<SupplyBinding>,
    declared_order: HashMap<ConsumerId, Vec<String>>,
    map: Vec<SupplyMapEntry>,
}

impl DeclaredDirectory {
    pub fn new(bindings: Vec<SupplyBinding>, map: Vec<SupplyMapEntry>) -> Self {
        let mut declared_order: HashMap<ConsumerId, Vec<String>> = HashMap::new();
        for binding in &bindings {
            declared_order
                .entry(binding.consumer.clone())
                .or_default()
                .push(binding.supply.clone());
        }
        DeclaredDirectory {
            bindings,
            declared_order,
            map,
        }
    }

    fn binding_match(&self, consumer: &ConsumerId, supply: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|b| &b.consumer == consumer && b.supply == supply)
            .map(|b| b.device.as_str())
    }

    // First matching map entry wins; later entries never override.
    fn map_match(&self, consumer: &ConsumerId, supply: &str) -> Option<&str> {
        self.map
            .iter()
            .find(|e| {
                e.supply == supply
                    && e.consumer
                        .as_ref()
                        .map(|c| c == consumer)
                        .unwrap_or(true)
            })
            .map(|e| e.device.as_str())
    }
}

impl SupplyDirectory for DeclaredDirectory {
    fn resolve(&self, consumer: &ConsumerId, supply: &str) -> Result<Option<String>> {
        let declared = self.binding_match(consumer, supply);
        let mapped = self.map_match(consumer, supply);
        match (declared, mapped) {
            (Some(a), Some(b)) if a != b => Err(Error::Ambiguous(format!(
                "{supply} for {consumer}: declared binding names {a}, supply map names {b}"
            ))),
            (Some(device), _) | (None, Some(device)) => Ok(Some(device.to_owned())),
            (None, None) => Ok(None),
        }
    }

    fn declared_for(&self, consumer: &ConsumerId) -> Vec<String> {
        self.declared_order
            .get(consumer)
            .cloned()
            .unwrap_or_default()
    }
}

/// Directory used when no descriptive configuration exists; resolves
/// nothing.
pub struct EmptyDirectory;

impl SupplyDirectory for EmptyDirectory {
    fn resolve(&self, _consumer: &ConsumerId, _supply: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn declared_for(&self, _consumer: &ConsumerId) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> DeclaredDirectory {
        DeclaredDirectory::new(
            vec![
                SupplyBinding {
                    consumer: ConsumerId::new("mmc0"),
                    supply: "vcc".into(),
                    device: "buck1".into(),
                },
                SupplyBinding {
                    consumer: ConsumerId::new("mmc0"),
                    supply: "vqmmc".into(),
                    device: "ldo3".into(),
                },
            ],
            vec![
                SupplyMapEntry {
                    consumer: None,
                    supply: "vdd".into(),
                    device: "buck2".into(),
                },
                SupplyMapEntry {
                    consumer: Some(ConsumerId::new("uart1")),
                    supply: "vcc".into(),
                    device: "ldo1".into(),
                },
            ],
        )
    }

    #[test]
    fn declared_binding_wins_first() {
        let dir = directory();
        let device = dir.resolve(&ConsumerId::new("mmc0"), "vcc").unwrap();
        assert_eq!(device.as_deref(), Some("buck1"));
    }

    #[test]
    fn map_fallback_applies_when_no_binding() {
        let dir = directory();
        let device = dir.resolve(&ConsumerId::new("mmc0"), "vdd").unwrap();
        assert_eq!(device.as_deref(), Some("buck2"));
    }

    #[test]
    fn consumer_filter_restricts_map_entries() {
        let dir = directory();
        let device = dir.resolve(&ConsumerId::new("uart1"), "vcc").unwrap();
        assert_eq!(device.as_deref(), Some("ldo1"));
        assert_eq!(dir.resolve(&ConsumerId::new("spi0"), "vcc").unwrap(), None);
    }

    #[test]
    fn disagreeing_sources_are_ambiguous() {
        let dir = DeclaredDirectory::new(
            vec![SupplyBinding {
                consumer: ConsumerId::new("mmc0"),
                supply: "vcc".into(),
                device: "buck1".into(),
            }],
            vec![SupplyMapEntry {
                consumer: None,
                supply: "vcc".into(),
                device: "ldo1".into(),
            }],
        );
        let err = dir.resolve(&ConsumerId::new("mmc0"), "vcc").unwrap_err();
        assert!(matches!(err, Error::Ambiguous(_)));
    }

    #[test]
    fn agreeing_sources_are_not_ambiguous() {
        let dir = DeclaredDirectory::new(
            vec![SupplyBinding {
                consumer: ConsumerId::new("mmc0"),
                supply: "vcc".into(),
                device: "buck1".into(),
            }],
            vec![SupplyMapEntry {
                consumer: None,
                supply: "vcc".into(),
                device: "buck1".into(),
            }],
        );
        let device = dir.resolve(&ConsumerId::new("mmc0"), "vcc").unwrap();
        assert_eq!(device.as_deref(), Some("buck1"));
    }

    #[test]
    fn declared_supplies_keep_declaration_order() {
        let dir = directory();
        assert_eq!(
            dir.declared_for(&ConsumerId::new("mmc0")),
            vec!["vcc".to_owned(), "vqmmc".to_owned()]
        );
        assert!(dir.declared_for(&ConsumerId::new("uart1")).is_empty());
    }

    #[test]
    fn empty_directory_resolves_nothing() {
        let dir = EmptyDirectory;
        assert_eq!(dir.resolve(&ConsumerId::new("mmc0"), "vcc").unwrap(), None);
        assert!(dir.declared_for(&ConsumerId::new("mmc0")).is_empty());
    }
}
