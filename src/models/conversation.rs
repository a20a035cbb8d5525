use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard cap on participants per conversation, enforced regardless of caller.
pub const MAX_PARTICIPANTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Direct,
    Group,
    PatientQuery,
    ClinicalConsultation,
}

impl ConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::PatientQuery => "patient_query",
            Self::ClinicalConsultation => "clinical_consultation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            "patient_query" => Some(Self::PatientQuery),
            "clinical_consultation" => Some(Self::ClinicalConsultation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
    Resolved,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SuperAdmin,
    Pharmacist,
    Doctor,
    Nurse,
    Patient,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Pharmacist => "pharmacist",
            Self::Doctor => "doctor",
            Self::Nurse => "nurse",
            Self::Patient => "patient",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "super_admin" => Some(Self::SuperAdmin),
            "pharmacist" => Some(Self::Pharmacist),
            "doctor" => Some(Self::Doctor),
            "nurse" => Some(Self::Nurse),
            "patient" => Some(Self::Patient),
            _ => None,
        }
    }

    /// Anyone licensed to answer a patient query.
    pub fn is_provider(&self) -> bool {
        matches!(
            self,
            Self::SuperAdmin | Self::Pharmacist | Self::Doctor | Self::Nurse
        )
    }
}

/// Role within the tenant (workplace), orthogonal to the clinical role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantRole {
    Owner,
    Admin,
    Member,
}

impl TenantRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub role: UserRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub unread_count: i32,
    /// Denormalized capability snapshot for display. Never authoritative;
    /// the live capability matrix is consulted on every request.
    #[serde(default)]
    pub permissions: serde_json::Value,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub is_encrypted: bool,
    pub encryption_key_id: Option<String>,
    pub clinical_context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: ConversationType,
    pub title: Option<String>,
    pub participants: Vec<Participant>,
    pub patient_id: Option<Uuid>,
    pub case_id: Option<Uuid>,
    pub status: ConversationStatus,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_id: Option<Uuid>,
    pub created_by: Uuid,
    pub metadata: ConversationMetadata,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Append a participant. Rejoining after leaving reactivates the
    /// existing record instead of duplicating it.
    pub fn add_participant(&mut self, user_id: Uuid, role: UserRole) -> Result<(), AppError> {
        if let Some(existing) = self.participants.iter_mut().find(|p| p.user_id == user_id) {
            if existing.is_active() {
                return Err(AppError::validation(
                    "participants",
                    "user is already an active participant",
                ));
            }
            existing.left_at = None;
            existing.role = role;
            existing.joined_at = Utc::now();
            return Ok(());
        }
        if self.active_participants().count() >= MAX_PARTICIPANTS {
            return Err(AppError::validation(
                "participants",
                format!("conversation is limited to {MAX_PARTICIPANTS} participants"),
            ));
        }
        self.participants.push(Participant {
            user_id,
            role,
            joined_at: Utc::now(),
            left_at: None,
            last_read_at: None,
            unread_count: 0,
            permissions: serde_json::Value::Null,
        });
        Ok(())
    }

    /// Soft removal: the record stays for history, `left_at` marks it gone.
    pub fn remove_participant(&mut self, user_id: Uuid) -> bool {
        match self
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id && p.is_active())
        {
            Some(p) => {
                p.left_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn update_last_message(&mut self, message_id: Uuid, at: DateTime<Utc>) {
        self.last_message_id = Some(message_id);
        self.last_message_at = Some(at);
        self.updated_at = at;
    }

    /// Additive unread bump for every active participant except the sender.
    pub fn increment_unread(&mut self, exclude_user_id: Uuid) {
        for p in self
            .participants
            .iter_mut()
            .filter(|p| p.is_active() && p.user_id != exclude_user_id)
        {
            p.unread_count += 1;
        }
    }

    /// Idempotent: repeated calls leave the same state.
    pub fn mark_read(&mut self, user_id: Uuid) {
        if let Some(p) = self
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id && p.is_active())
        {
            p.unread_count = 0;
            p.last_read_at = Some(Utc::now());
        }
    }

    pub fn has_active_participant(&self, user_id: Uuid) -> bool {
        self.participants
            .iter()
            .any(|p| p.user_id == user_id && p.is_active())
    }

    pub fn participant_role(&self, user_id: Uuid) -> Option<UserRole> {
        self.participants
            .iter()
            .find(|p| p.user_id == user_id && p.is_active())
            .map(|p| p.role)
    }

    pub fn active_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_active())
    }

    pub fn unread_count(&self, user_id: Uuid) -> i32 {
        self.participants
            .iter()
            .find(|p| p.user_id == user_id)
            .map(|p| p.unread_count)
            .unwrap_or(0)
    }
}

/// Type-specific participant composition rules, re-checked server-side at
/// creation time no matter what the caller claims.
pub fn validate_composition(
    kind: ConversationType,
    participants: &[(Uuid, UserRole)],
) -> Result<(), AppError> {
    if participants.len() > MAX_PARTICIPANTS {
        return Err(AppError::validation(
            "participants",
            format!("conversation is limited to {MAX_PARTICIPANTS} participants"),
        ));
    }
    let patients = participants
        .iter()
        .filter(|(_, r)| *r == UserRole::Patient)
        .count();
    let providers = participants.iter().filter(|(_, r)| r.is_provider()).count();
    let pharmacists = participants
        .iter()
        .filter(|(_, r)| *r == UserRole::Pharmacist)
        .count();
    let doctors = participants
        .iter()
        .filter(|(_, r)| *r == UserRole::Doctor)
        .count();

    match kind {
        ConversationType::Direct => {
            if participants.len() != 2 {
                return Err(AppError::validation(
                    "participants",
                    "direct conversations require exactly 2 participants",
                ));
            }
        }
        ConversationType::Group => {
            if participants.len() < 2 {
                return Err(AppError::validation(
                    "participants",
                    "group conversations require at least 2 participants",
                ));
            }
        }
        ConversationType::PatientQuery => {
            if patients != 1 {
                return Err(AppError::validation(
                    "participants",
                    "patient queries require exactly 1 patient",
                ));
            }
            if providers < 1 {
                return Err(AppError::validation(
                    "participants",
                    "patient queries require at least 1 provider",
                ));
            }
        }
        ConversationType::ClinicalConsultation => {
            if pharmacists < 1 || doctors < 1 {
                return Err(AppError::validation(
                    "participants",
                    "clinical consultations require at least 1 pharmacist and 1 doctor",
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(kind: ConversationType) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            kind,
            title: None,
            participants: vec![],
            patient_id: None,
            case_id: None,
            status: ConversationStatus::Active,
            priority: Priority::Normal,
            tags: vec![],
            last_message_at: None,
            last_message_id: None,
            created_by: Uuid::new_v4(),
            metadata: ConversationMetadata::default(),
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn direct_requires_exactly_two() {
        let a = (Uuid::new_v4(), UserRole::Doctor);
        let b = (Uuid::new_v4(), UserRole::Patient);
        let c = (Uuid::new_v4(), UserRole::Nurse);
        assert!(validate_composition(ConversationType::Direct, &[a, b]).is_ok());
        assert!(validate_composition(ConversationType::Direct, &[a]).is_err());
        assert!(validate_composition(ConversationType::Direct, &[a, b, c]).is_err());
    }

    #[test]
    fn patient_query_needs_one_patient_and_a_provider() {
        let patient_a = (Uuid::new_v4(), UserRole::Patient);
        let patient_c = (Uuid::new_v4(), UserRole::Patient);
        let provider_b = (Uuid::new_v4(), UserRole::Pharmacist);

        assert!(
            validate_composition(ConversationType::PatientQuery, &[patient_a, provider_b]).is_ok()
        );
        // two patients, no provider
        assert!(
            validate_composition(ConversationType::PatientQuery, &[patient_a, patient_c]).is_err()
        );
    }

    #[test]
    fn clinical_consultation_needs_pharmacist_and_doctor() {
        let pharmacist = (Uuid::new_v4(), UserRole::Pharmacist);
        let doctor = (Uuid::new_v4(), UserRole::Doctor);
        let nurse = (Uuid::new_v4(), UserRole::Nurse);
        assert!(validate_composition(
            ConversationType::ClinicalConsultation,
            &[pharmacist, doctor, nurse]
        )
        .is_ok());
        assert!(
            validate_composition(ConversationType::ClinicalConsultation, &[pharmacist, nurse])
                .is_err()
        );
    }

    #[test]
    fn participant_cap_is_enforced() {
        let many: Vec<_> = (0..11).map(|_| (Uuid::new_v4(), UserRole::Nurse)).collect();
        assert!(validate_composition(ConversationType::Group, &many).is_err());
    }

    #[test]
    fn remove_sets_left_at_and_keeps_history() {
        let mut conv = conversation(ConversationType::Group);
        let user = Uuid::new_v4();
        conv.add_participant(user, UserRole::Nurse).unwrap();
        assert!(conv.has_active_participant(user));

        assert!(conv.remove_participant(user));
        assert!(!conv.has_active_participant(user));
        // record survives as history
        assert_eq!(conv.participants.len(), 1);
        assert!(conv.participants[0].left_at.is_some());
        // second removal is a no-op
        assert!(!conv.remove_participant(user));
    }

    #[test]
    fn rejoin_reactivates_instead_of_duplicating() {
        let mut conv = conversation(ConversationType::Group);
        let user = Uuid::new_v4();
        conv.add_participant(user, UserRole::Nurse).unwrap();
        conv.remove_participant(user);
        conv.add_participant(user, UserRole::Doctor).unwrap();
        assert_eq!(conv.participants.len(), 1);
        assert_eq!(conv.participant_role(user), Some(UserRole::Doctor));
    }

    #[test]
    fn adding_active_participant_twice_is_rejected() {
        let mut conv = conversation(ConversationType::Group);
        let user = Uuid::new_v4();
        conv.add_participant(user, UserRole::Nurse).unwrap();
        assert!(conv.add_participant(user, UserRole::Nurse).is_err());
    }

    #[test]
    fn unread_increment_skips_sender_and_departed() {
        let mut conv = conversation(ConversationType::Group);
        let sender = Uuid::new_v4();
        let other = Uuid::new_v4();
        let gone = Uuid::new_v4();
        conv.add_participant(sender, UserRole::Doctor).unwrap();
        conv.add_participant(other, UserRole::Nurse).unwrap();
        conv.add_participant(gone, UserRole::Nurse).unwrap();
        conv.remove_participant(gone);

        conv.increment_unread(sender);
        conv.increment_unread(sender);

        assert_eq!(conv.unread_count(sender), 0);
        assert_eq!(conv.unread_count(other), 2);
        assert_eq!(conv.unread_count(gone), 0);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut conv = conversation(ConversationType::Group);
        let user = Uuid::new_v4();
        conv.add_participant(user, UserRole::Nurse).unwrap();
        conv.increment_unread(Uuid::new_v4());

        conv.mark_read(user);
        let first = conv.participants[0].clone();
        conv.mark_read(user);
        assert_eq!(conv.unread_count(user), 0);
        assert_eq!(first.unread_count, conv.participants[0].unread_count);
    }
}
