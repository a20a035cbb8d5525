//! Role-derived capability matrix.
//!
//! A single pure function maps (role, tenant role, participation facts) to
//! the full set of allowed operations. It is evaluated fresh on every
//! request; capability snapshots stored on participant rows are display
//! data and are never consulted here.

use crate::error::AppError;
use crate::models::{TenantRole, UserRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_create_conversation: bool,
    pub can_view: bool,
    pub can_update: bool,
    pub can_delete: bool,
    pub can_send: bool,
    pub can_edit_own: bool,
    pub can_delete_own: bool,
    pub can_add_participant: bool,
    pub can_remove_participant: bool,
    pub can_access_patient_data: bool,
    pub can_view_audit_logs: bool,
    pub can_manage_files: bool,
    pub can_create_threads: bool,
    pub can_search: bool,
}

impl Capabilities {
    pub const ALL: Capabilities = Capabilities {
        can_create_conversation: true,
        can_view: true,
        can_update: true,
        can_delete: true,
        can_send: true,
        can_edit_own: true,
        can_delete_own: true,
        can_add_participant: true,
        can_remove_participant: true,
        can_access_patient_data: true,
        can_view_audit_logs: true,
        can_manage_files: true,
        can_create_threads: true,
        can_search: true,
    };

    pub const NONE: Capabilities = Capabilities {
        can_create_conversation: false,
        can_view: false,
        can_update: false,
        can_delete: false,
        can_send: false,
        can_edit_own: false,
        can_delete_own: false,
        can_add_participant: false,
        can_remove_participant: false,
        can_access_patient_data: false,
        can_view_audit_logs: false,
        can_manage_files: false,
        can_create_threads: false,
        can_search: false,
    };
}

/// Pure function: no I/O, no clock, no stored state.
pub fn capabilities(
    role: UserRole,
    tenant_role: TenantRole,
    is_participant: bool,
    is_sender: bool,
) -> Capabilities {
    match role {
        UserRole::SuperAdmin => Capabilities::ALL,

        UserRole::Pharmacist | UserRole::Doctor => Capabilities {
            can_create_conversation: true,
            can_view: is_participant,
            can_update: is_participant,
            can_delete: is_participant && tenant_role.is_admin(),
            can_send: is_participant,
            can_edit_own: is_participant && is_sender,
            can_delete_own: is_participant && is_sender,
            can_add_participant: is_participant,
            can_remove_participant: is_participant,
            can_access_patient_data: true,
            can_view_audit_logs: tenant_role.is_admin(),
            can_manage_files: is_participant,
            can_create_threads: is_participant,
            can_search: true,
        },

        UserRole::Nurse => Capabilities {
            can_create_conversation: true,
            can_view: is_participant,
            can_update: is_participant,
            can_delete: false,
            can_send: is_participant,
            can_edit_own: is_participant && is_sender,
            can_delete_own: is_participant && is_sender,
            can_add_participant: is_participant && tenant_role.is_admin(),
            can_remove_participant: is_participant && tenant_role.is_admin(),
            can_access_patient_data: true,
            can_view_audit_logs: false,
            can_manage_files: is_participant,
            can_create_threads: is_participant,
            can_search: true,
        },

        UserRole::Patient => Capabilities {
            can_create_conversation: true,
            can_view: is_participant,
            can_update: false,
            can_delete: false,
            can_send: is_participant,
            can_edit_own: is_participant && is_sender,
            can_delete_own: is_participant && is_sender,
            can_add_participant: false,
            can_remove_participant: false,
            can_access_patient_data: false,
            can_view_audit_logs: false,
            can_manage_files: is_participant,
            can_create_threads: is_participant,
            can_search: true,
        },
    }
}

/// Enforcement helper: deny with the missing capability's name.
pub fn require(granted: bool, capability: &'static str) -> Result<(), AppError> {
    if granted {
        Ok(())
    } else {
        Err(AppError::PermissionDenied(capability))
    }
}
