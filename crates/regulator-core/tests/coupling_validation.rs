// Coupled-regulator queries and acquisition-time validation

use regulator_core::test_utils::MockBackend;
use regulator_core::{
    AccessMode, ConsumerId, DeclaredCoupling, DeclaredDirectory, DeviceConfig, Error,
    RegulatorManager, SupplyBinding,
};

fn directory() -> DeclaredDirectory {
    DeclaredDirectory::new(
        vec![SupplyBinding {
            consumer: ConsumerId::new("cpu"),
            supply: "vdd-core".into(),
            device: "buck1".into(),
        }],
        Vec::new(),
    )
}

#[test]
fn partner_lookup_is_total_within_bounds() {
    let coupling = DeclaredCoupling::new(vec![
        ("buck1".into(), vec!["buck2".into(), "buck3".into()]),
        ("buck2".into(), vec!["buck1".into(), "buck3".into()]),
        ("buck3".into(), vec!["buck1".into(), "buck2".into()]),
    ]);
    let manager = RegulatorManager::new(Box::new(directory()), Box::new(coupling));
    let buck1 = manager
        .register_device(DeviceConfig::new("buck1"), Box::new(MockBackend::new()))
        .unwrap();
    let buck2 = manager
        .register_device(DeviceConfig::new("buck2"), Box::new(MockBackend::new()))
        .unwrap();

    let n = manager.coupled_count(buck1).unwrap();
    assert_eq!(n, 2);
    assert_eq!(manager.coupled_partner(buck1, 0).unwrap(), Some(buck2));
    // Declared but not registered yet.
    assert_eq!(manager.coupled_partner(buck1, 1).unwrap(), None);
    // Out of range.
    assert_eq!(manager.coupled_partner(buck1, n).unwrap(), None);
    assert!(manager.is_coupling_valid(buck1).unwrap());
}

#[test]
fn asymmetric_declaration_is_invalid_and_blocks_acquisition() {
    let coupling = DeclaredCoupling::new(vec![
        ("buck1".into(), vec!["buck2".into()]),
        ("buck2".into(), Vec::new()),
    ]);
    let manager = RegulatorManager::new(Box::new(directory()), Box::new(coupling));
    let buck1 = manager
        .register_device(DeviceConfig::new("buck1"), Box::new(MockBackend::new()))
        .unwrap();

    assert!(!manager.is_coupling_valid(buck1).unwrap());
    let err = manager
        .get(&ConsumerId::new("cpu"), "vdd-core", AccessMode::Normal)
        .unwrap_err();
    assert!(matches!(err, Error::CouplingMismatch(_)));
}

#[test]
fn symmetric_declaration_admits_acquisition() {
    let coupling = DeclaredCoupling::new(vec![
        ("buck1".into(), vec!["buck2".into()]),
        ("buck2".into(), vec!["buck1".into()]),
    ]);
    let manager = RegulatorManager::new(Box::new(directory()), Box::new(coupling));
    manager
        .register_device(DeviceConfig::new("buck1"), Box::new(MockBackend::new()))
        .unwrap();

    let handle = manager
        .get(&ConsumerId::new("cpu"), "vdd-core", AccessMode::Normal)
        .unwrap();
    manager.put(&handle).unwrap();
}

#[test]
fn uncoupled_devices_validate_trivially() {
    let coupling = DeclaredCoupling::new(vec![(
        "buck9".into(),
        vec!["buck8".into()],
    )]);
    let manager = RegulatorManager::new(Box::new(directory()), Box::new(coupling));
    let buck1 = manager
        .register_device(DeviceConfig::new("buck1"), Box::new(MockBackend::new()))
        .unwrap();

    assert_eq!(manager.coupled_count(buck1).unwrap(), 0);
    assert!(manager.is_coupling_valid(buck1).unwrap());
    let handle = manager
        .get(&ConsumerId::new("cpu"), "vdd-core", AccessMode::Normal)
        .unwrap();
    manager.put(&handle).unwrap();
}
