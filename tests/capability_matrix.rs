use clinic_comms_service::capabilities::{capabilities, require};
use clinic_comms_service::models::{TenantRole, UserRole};

#[test]
fn super_admin_holds_every_capability_regardless_of_participation() {
    for is_participant in [false, true] {
        for is_sender in [false, true] {
            let caps = capabilities(
                UserRole::SuperAdmin,
                TenantRole::Member,
                is_participant,
                is_sender,
            );
            assert!(caps.can_view);
            assert!(caps.can_delete);
            assert!(caps.can_edit_own);
            assert!(caps.can_view_audit_logs);
        }
    }
}

#[test]
fn provider_capabilities_are_participation_gated() {
    for role in [UserRole::Pharmacist, UserRole::Doctor] {
        let inside = capabilities(role, TenantRole::Member, true, false);
        assert!(inside.can_view);
        assert!(inside.can_send);
        assert!(inside.can_access_patient_data);

        let outside = capabilities(role, TenantRole::Member, false, false);
        assert!(!outside.can_view);
        assert!(!outside.can_send);
    }
}

#[test]
fn conversation_delete_needs_tenant_admin_on_top_of_participation() {
    let member = capabilities(UserRole::Doctor, TenantRole::Member, true, false);
    assert!(!member.can_delete);

    let admin = capabilities(UserRole::Doctor, TenantRole::Admin, true, false);
    assert!(admin.can_delete);

    // tenant admin without participation still cannot delete
    let absent_admin = capabilities(UserRole::Doctor, TenantRole::Admin, false, false);
    assert!(!absent_admin.can_delete);
}

#[test]
fn own_message_capabilities_need_sender_identity() {
    let non_sender = capabilities(UserRole::Doctor, TenantRole::Member, true, false);
    assert!(!non_sender.can_edit_own);
    assert!(!non_sender.can_delete_own);

    let sender = capabilities(UserRole::Doctor, TenantRole::Member, true, true);
    assert!(sender.can_edit_own);
    assert!(sender.can_delete_own);
}

#[test]
fn patients_keep_a_restricted_subset() {
    let caps = capabilities(UserRole::Patient, TenantRole::Member, true, true);
    assert!(caps.can_view);
    assert!(caps.can_send);
    assert!(caps.can_edit_own);
    assert!(!caps.can_delete);
    assert!(!caps.can_add_participant);
    assert!(!caps.can_remove_participant);
    assert!(!caps.can_view_audit_logs);
}

#[test]
fn require_names_the_missing_capability() {
    let caps = capabilities(UserRole::Patient, TenantRole::Member, true, false);
    let err = require(caps.can_delete, "can_delete").unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("can_delete"), "got: {rendered}");
}
