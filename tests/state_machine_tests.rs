//! Connection manager state machine tests
//!
//! Drives the manager directly with the scriptable mock host: selection,
//! permission flow, lazy open, close, and hot-plug transitions.

use printlink::error::{HostError, OpenError, SelectError};
use printlink::manager::ConnectionManager;
use printlink::test_utils::{MockHost, mock_device};
use printlink::types::{DeviceId, PermissionState, SelectStatus};

const VENDOR: u16 = 0x04b8;
const PRODUCT: u16 = 0x0202;

#[test]
fn select_fails_with_empty_registry() {
    let (host, _handle) = MockHost::new();
    let mut manager = ConnectionManager::new(Box::new(host));

    let result = manager.select_device(VENDOR, PRODUCT);
    assert_eq!(result, Err(SelectError::NoDevices));
    assert!(manager.selected_device().is_none());
}

#[test]
fn select_fails_for_absent_identity() {
    let (host, handle) = MockHost::new();
    handle.add_device(mock_device(1, 0x1234, 0x5678));
    let mut manager = ConnectionManager::new(Box::new(host));

    let result = manager.select_device(VENDOR, PRODUCT);
    assert_eq!(
        result,
        Err(SelectError::NotFound {
            vendor_id: VENDOR,
            product_id: PRODUCT,
        })
    );
    assert!(manager.selected_device().is_none());
}

#[test]
fn select_with_prior_grant_is_ready() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    let mut manager = ConnectionManager::new(Box::new(host));

    let status = manager.select_device(VENDOR, PRODUCT).unwrap();
    assert_eq!(status, SelectStatus::Ready);
    assert_eq!(manager.permission_state(), PermissionState::Granted);
    // No permission request was needed
    assert!(handle.requests().is_empty());
}

#[test]
fn select_without_grant_issues_permission_request() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    let mut manager = ConnectionManager::new(Box::new(host));

    let status = manager.select_device(VENDOR, PRODUCT).unwrap();
    assert_eq!(status, SelectStatus::PermissionPending);
    assert_eq!(manager.permission_state(), PermissionState::Requested);
    assert_eq!(handle.requests(), vec![device.id]);
}

#[test]
fn failed_select_leaves_previous_selection_untouched() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    manager.ensure_open().unwrap();

    let result = manager.select_device(0xdead, 0xbeef);
    assert!(matches!(result, Err(SelectError::NotFound { .. })));

    // Previous selection and its open connection survive
    assert_eq!(manager.selected_device().unwrap().id, device.id);
    assert!(manager.is_open());
    assert_eq!(handle.open_count(), 1);
}

#[test]
fn reselect_of_open_device_is_idempotent() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    manager.ensure_open().unwrap();
    assert_eq!(handle.open_count(), 1);

    // No close/reopen on reselect of the same identity
    let status = manager.select_device(VENDOR, PRODUCT).unwrap();
    assert_eq!(status, SelectStatus::Ready);
    assert!(manager.is_open());
    assert_eq!(handle.open_count(), 1);
    assert_eq!(handle.release_count(), 0);
}

#[test]
fn selecting_a_different_device_closes_the_old_connection() {
    let (host, handle) = MockHost::new();
    let epson = mock_device(1, VENDOR, PRODUCT);
    let zebra = mock_device(2, 0x0a5f, 0x0081);
    handle.add_device(epson.clone());
    handle.add_device(zebra.clone());
    handle.grant(epson.id);
    handle.grant(zebra.id);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    manager.ensure_open().unwrap();

    let status = manager.select_device(0x0a5f, 0x0081).unwrap();
    assert_eq!(status, SelectStatus::Ready);
    assert!(!manager.is_open());
    assert_eq!(handle.release_count(), 1);
    assert_eq!(manager.selected_device().unwrap().id, zebra.id);
}

#[test]
fn permission_grant_enables_open() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    assert!(matches!(
        manager.ensure_open(),
        Err(OpenError::NotAuthorized(PermissionState::Requested))
    ));

    manager.on_permission_result(device.id, true);
    assert_eq!(manager.permission_state(), PermissionState::Granted);
    assert!(manager.ensure_open().is_ok());
    assert!(manager.is_open());
}

#[test]
fn permission_denial_blocks_open_until_regranted() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    manager.on_permission_result(device.id, false);

    assert_eq!(manager.permission_state(), PermissionState::Denied);
    assert!(matches!(
        manager.ensure_open(),
        Err(OpenError::NotAuthorized(PermissionState::Denied))
    ));

    // A denied selection is retry-eligible: reselect issues a fresh request
    let status = manager.select_device(VENDOR, PRODUCT).unwrap();
    assert_eq!(status, SelectStatus::PermissionPending);
    assert_eq!(handle.requests().len(), 2);

    manager.on_permission_result(device.id, true);
    assert!(manager.ensure_open().is_ok());
}

#[test]
fn permission_result_for_other_device_is_ignored() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    manager.on_permission_result(DeviceId(99), true);

    assert_eq!(manager.permission_state(), PermissionState::Requested);
}

#[test]
fn ensure_open_without_selection_fails() {
    let (host, _handle) = MockHost::new();
    let mut manager = ConnectionManager::new(Box::new(host));

    assert!(matches!(manager.ensure_open(), Err(OpenError::NoSelection)));
}

#[test]
fn ensure_open_is_lazy_and_reuses_the_link() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    assert_eq!(handle.open_count(), 0);

    manager.ensure_open().unwrap();
    manager.ensure_open().unwrap();
    assert_eq!(handle.open_count(), 1);
}

#[test]
fn ensure_open_fails_without_bulk_out_endpoint() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    handle.set_bulk_endpoint(None);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    assert!(matches!(
        manager.ensure_open(),
        Err(OpenError::NoSuchEndpoint { interface: 0 })
    ));
    // Device was never opened
    assert_eq!(handle.open_count(), 0);
}

#[test]
fn ensure_open_maps_open_failure() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    handle.fail_open(HostError::Busy);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    assert!(matches!(
        manager.ensure_open(),
        Err(OpenError::OpenFailed(HostError::Busy))
    ));
    assert!(!manager.is_open());
}

#[test]
fn claim_failure_closes_the_fresh_link() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    handle.fail_claim(HostError::Busy);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    assert!(matches!(
        manager.ensure_open(),
        Err(OpenError::ClaimFailed(HostError::Busy))
    ));
    assert_eq!(handle.open_count(), 1);
    assert!(!manager.is_open());

    // The failure is not sticky; the next attempt succeeds
    assert!(manager.ensure_open().is_ok());
}

#[test]
fn close_keeps_selection_and_grant() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    manager.ensure_open().unwrap();
    manager.close();

    assert!(!manager.is_open());
    assert_eq!(handle.release_count(), 1);
    assert_eq!(manager.selected_device().unwrap().id, device.id);
    assert_eq!(manager.permission_state(), PermissionState::Granted);

    // A later ensure_open reconnects
    manager.ensure_open().unwrap();
    assert_eq!(handle.open_count(), 2);
}

#[test]
fn close_is_a_noop_when_nothing_is_open() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.close();
    manager.select_device(VENDOR, PRODUCT).unwrap();
    manager.close();

    assert_eq!(handle.release_count(), 0);
    assert_eq!(manager.selected_device().unwrap().id, device.id);
}

#[test]
fn detach_forces_close_and_resets_permission() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    manager.ensure_open().unwrap();

    manager.on_device_detached(device.id);
    assert!(!manager.is_open());
    assert_eq!(manager.permission_state(), PermissionState::Unknown);
    assert!(matches!(
        manager.ensure_open(),
        Err(OpenError::NotAuthorized(PermissionState::Unknown))
    ));
}

#[test]
fn detach_of_unrelated_device_is_ignored() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    handle.grant(device.id);
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    manager.ensure_open().unwrap();

    manager.on_device_detached(DeviceId(42));
    assert!(manager.is_open());
    assert_eq!(manager.permission_state(), PermissionState::Granted);
}

#[test]
fn reattach_of_pending_device_reissues_permission_request() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    assert_eq!(handle.requests().len(), 1);

    // Unplugged mid-request, then replugged under a fresh registry id
    manager.on_device_detached(device.id);
    let replugged = mock_device(2, VENDOR, PRODUCT);
    manager.on_device_attached(&replugged);

    assert_eq!(manager.permission_state(), PermissionState::Requested);
    assert_eq!(handle.requests(), vec![device.id, replugged.id]);

    handle.grant(replugged.id);
    handle.add_device(replugged.clone());
    manager.on_permission_result(replugged.id, true);
    assert!(manager.ensure_open().is_ok());
}

#[test]
fn attach_of_unrelated_device_is_ignored() {
    let (host, handle) = MockHost::new();
    let device = mock_device(1, VENDOR, PRODUCT);
    handle.add_device(device.clone());
    let mut manager = ConnectionManager::new(Box::new(host));

    manager.select_device(VENDOR, PRODUCT).unwrap();
    manager.on_device_attached(&mock_device(9, 0x1111, 0x2222));

    assert_eq!(handle.requests().len(), 1);
    assert_eq!(manager.selected_device().unwrap().id, device.id);
}
