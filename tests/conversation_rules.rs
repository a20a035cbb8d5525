use chrono::Utc;
use clinic_comms_service::models::conversation::validate_composition;
use clinic_comms_service::models::{
    Conversation, ConversationMetadata, ConversationStatus, ConversationType, Participant,
    Priority, UserRole, MAX_PARTICIPANTS,
};
use uuid::Uuid;

fn ids(n: usize) -> Vec<Uuid> {
    (0..n).map(|_| Uuid::new_v4()).collect()
}

#[test]
fn direct_requires_exactly_two() {
    let two: Vec<_> = ids(2).into_iter().map(|u| (u, UserRole::Doctor)).collect();
    assert!(validate_composition(ConversationType::Direct, &two).is_ok());

    let three: Vec<_> = ids(3).into_iter().map(|u| (u, UserRole::Doctor)).collect();
    assert!(validate_composition(ConversationType::Direct, &three).is_err());

    let one: Vec<_> = ids(1).into_iter().map(|u| (u, UserRole::Doctor)).collect();
    assert!(validate_composition(ConversationType::Direct, &one).is_err());
}

#[test]
fn patient_query_needs_one_patient_and_a_provider() {
    let patient = Uuid::new_v4();
    let doctor = Uuid::new_v4();

    let ok = vec![(patient, UserRole::Patient), (doctor, UserRole::Doctor)];
    assert!(validate_composition(ConversationType::PatientQuery, &ok).is_ok());

    // two patients
    let two_patients = vec![
        (patient, UserRole::Patient),
        (Uuid::new_v4(), UserRole::Patient),
        (doctor, UserRole::Doctor),
    ];
    assert!(validate_composition(ConversationType::PatientQuery, &two_patients).is_err());

    // no provider
    let no_provider = vec![(patient, UserRole::Patient)];
    assert!(validate_composition(ConversationType::PatientQuery, &no_provider).is_err());

    // a nurse counts as a provider
    let with_nurse = vec![(patient, UserRole::Patient), (Uuid::new_v4(), UserRole::Nurse)];
    assert!(validate_composition(ConversationType::PatientQuery, &with_nurse).is_ok());
}

#[test]
fn clinical_consultation_needs_pharmacist_and_doctor() {
    let ok = vec![
        (Uuid::new_v4(), UserRole::Pharmacist),
        (Uuid::new_v4(), UserRole::Doctor),
    ];
    assert!(validate_composition(ConversationType::ClinicalConsultation, &ok).is_ok());

    let doctors_only = vec![
        (Uuid::new_v4(), UserRole::Doctor),
        (Uuid::new_v4(), UserRole::Doctor),
    ];
    assert!(validate_composition(ConversationType::ClinicalConsultation, &doctors_only).is_err());
}

#[test]
fn participant_cap_applies_to_every_kind() {
    let over: Vec<_> = ids(MAX_PARTICIPANTS + 1)
        .into_iter()
        .map(|u| (u, UserRole::Doctor))
        .collect();
    assert!(validate_composition(ConversationType::Group, &over).is_err());

    let at_cap: Vec<_> = ids(MAX_PARTICIPANTS)
        .into_iter()
        .map(|u| (u, UserRole::Doctor))
        .collect();
    assert!(validate_composition(ConversationType::Group, &at_cap).is_ok());
}

fn conversation_with(participants: Vec<Participant>) -> Conversation {
    Conversation {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        kind: ConversationType::Group,
        title: Some("ward round".into()),
        participants,
        patient_id: None,
        case_id: None,
        status: ConversationStatus::Active,
        priority: Priority::Normal,
        tags: vec![],
        last_message_at: None,
        last_message_id: None,
        created_by: Uuid::new_v4(),
        metadata: ConversationMetadata {
            is_encrypted: false,
            encryption_key_id: None,
            clinical_context: None,
        },
        is_deleted: false,
        deleted_at: None,
        deleted_by: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn participant(user_id: Uuid) -> Participant {
    Participant {
        user_id,
        role: UserRole::Doctor,
        joined_at: Utc::now(),
        left_at: None,
        last_read_at: None,
        unread_count: 0,
        permissions: serde_json::Value::Null,
    }
}

#[test]
fn leave_and_rejoin_reactivates_the_same_record() {
    let user = Uuid::new_v4();
    let mut conversation = conversation_with(vec![participant(user), participant(Uuid::new_v4())]);

    assert!(conversation.remove_participant(user));
    assert!(!conversation.has_active_participant(user));
    // record survives the departure
    assert_eq!(conversation.participants.len(), 2);

    assert!(conversation.add_participant(user, UserRole::Doctor).is_ok());
    assert!(conversation.has_active_participant(user));
    assert_eq!(conversation.participants.len(), 2);
}

#[test]
fn unread_counters_skip_the_sender() {
    let sender = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let mut conversation = conversation_with(vec![participant(sender), participant(reader)]);

    conversation.increment_unread(sender);
    conversation.increment_unread(sender);
    assert_eq!(conversation.unread_count(sender), 0);
    assert_eq!(conversation.unread_count(reader), 2);

    conversation.mark_read(reader);
    assert_eq!(conversation.unread_count(reader), 0);
    // marking read twice stays at zero
    conversation.mark_read(reader);
    assert_eq!(conversation.unread_count(reader), 0);
}
