// All-or-nothing bulk acquisition and rollback

use regulator_core::test_utils::MockBackend;
use regulator_core::{
    AccessMode, ConsumerId, DeclaredDirectory, DeviceConfig, DeviceId, Error, NoCoupling,
    RegulatorManager, SupplyBinding,
};

fn setup() -> (RegulatorManager, DeviceId, DeviceId) {
    let directory = DeclaredDirectory::new(
        vec![
            SupplyBinding {
                consumer: ConsumerId::new("mmc0"),
                supply: "vcc".into(),
                device: "buck1".into(),
            },
            SupplyBinding {
                consumer: ConsumerId::new("mmc0"),
                supply: "vdd".into(),
                device: "buck2".into(),
            },
            SupplyBinding {
                consumer: ConsumerId::new("wifi"),
                supply: "vdd".into(),
                device: "buck2".into(),
            },
        ],
        Vec::new(),
    );
    let manager = RegulatorManager::new(Box::new(directory), Box::new(NoCoupling));
    let buck1 = manager
        .register_device(DeviceConfig::new("buck1"), Box::new(MockBackend::new()))
        .unwrap();
    let buck2 = manager
        .register_device(DeviceConfig::new("buck2"), Box::new(MockBackend::new()))
        .unwrap();
    (manager, buck1, buck2)
}

#[test]
fn successful_bulk_attaches_everything_in_request_order() {
    let (manager, buck1, buck2) = setup();
    let consumer = ConsumerId::new("mmc0");

    let handles = manager
        .bulk_get(
            &consumer,
            &[("vcc", AccessMode::Normal), ("vdd", AccessMode::Normal)],
        )
        .unwrap();
    assert_eq!(handles.len(), 2);
    assert_eq!(handles[0].supply_name(), "vcc");
    assert_eq!(handles[1].supply_name(), "vdd");
    assert_eq!(manager.device_snapshot(buck1).unwrap().open_count, 1);
    assert_eq!(manager.device_snapshot(buck2).unwrap().open_count, 1);

    for handle in &handles {
        manager.put(handle).unwrap();
    }
}

#[test]
fn unresolvable_supply_rolls_back_the_whole_sequence() {
    let (manager, buck1, buck2) = setup();
    let consumer = ConsumerId::new("mmc0");

    let err = manager
        .bulk_get(
            &consumer,
            &[
                ("vcc", AccessMode::Normal),
                ("vdd", AccessMode::Normal),
                ("vio", AccessMode::Normal),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(manager.device_snapshot(buck1).unwrap().open_count, 0);
    assert_eq!(manager.device_snapshot(buck2).unwrap().open_count, 0);
}

#[test]
fn failure_at_index_zero_attaches_nothing() {
    let (manager, buck1, buck2) = setup();
    let consumer = ConsumerId::new("mmc0");

    let err = manager
        .bulk_get(
            &consumer,
            &[("vio", AccessMode::Normal), ("vcc", AccessMode::Normal)],
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(manager.device_snapshot(buck1).unwrap().open_count, 0);
    assert_eq!(manager.device_snapshot(buck2).unwrap().open_count, 0);
}

#[test]
fn busy_mid_bulk_rolls_back_but_leaves_other_owners_alone() {
    let (manager, buck1, buck2) = setup();
    let wifi = ConsumerId::new("wifi");
    let mmc = ConsumerId::new("mmc0");

    let held = manager.get(&wifi, "vdd", AccessMode::Normal).unwrap();
    let err = manager
        .bulk_get(
            &mmc,
            &[("vcc", AccessMode::Normal), ("vdd", AccessMode::Exclusive)],
        )
        .unwrap_err();
    assert!(matches!(err, Error::Busy(_)));

    // The partial acquisition was undone; the other consumer's handle
    // survived untouched.
    assert_eq!(manager.device_snapshot(buck1).unwrap().open_count, 0);
    assert_eq!(manager.device_snapshot(buck2).unwrap().open_count, 1);
    manager.put(&held).unwrap();
}

#[test]
fn optional_entries_do_not_fail_a_bulk_sequence() {
    let (manager, buck1, _) = setup();
    let consumer = ConsumerId::new("mmc0");

    let handles = manager
        .bulk_get(
            &consumer,
            &[("vcc", AccessMode::Normal), ("vio", AccessMode::Optional)],
        )
        .unwrap();
    assert_eq!(handles.len(), 2);
    assert!(!handles[0].is_stub());
    assert!(handles[1].is_stub());
    assert_eq!(manager.device_snapshot(buck1).unwrap().open_count, 1);

    for handle in &handles {
        manager.put(handle).unwrap();
    }
}
