//! Treatment chaincode behavior against an in-process ledger.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Code, Request};

use auth::{AuthVerifier, ContractRegistry};
use ledger::{Ledger, LedgerServiceImpl, MemoryBlockStore};
use ledger_client::{LedgerClient, LedgerClientConfig};
use proto::treatment_service_server::TreatmentService;
use proto::{
    Actor, AddTreatmentRequest, GetTreatmentRequest, TreatmentRecord, UpdateTreatmentRequest,
};
use treatment::{
    InMemoryOrgPermits, MemoryTreatmentStore, OrgPermits, RecordNotifier, TreatmentServiceImpl,
    TreatmentStore,
};

const SECRET: &str = "treatment-test-secret";
const HOSPITAL: &str = "hosp-1";

struct Harness {
    service: TreatmentServiceImpl,
    verifier: AuthVerifier,
    store: Arc<MemoryTreatmentStore>,
    ledger_addr: String,
}

async fn start(register: bool) -> Harness {
    let verifier = AuthVerifier::new(SECRET);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ledger_core = Arc::new(Ledger::open(Arc::new(MemoryBlockStore::new())).await.unwrap());
    let ledger_service = LedgerServiceImpl::new(
        ledger_core,
        Arc::new(ContractRegistry::new()),
        AuthVerifier::new(SECRET),
    );
    tokio::spawn(async move {
        Server::builder()
            .add_service(proto::ledger_service_server::LedgerServiceServer::new(
                ledger_service,
            ))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    let mut ledger = LedgerClient::connect(LedgerClientConfig::new(
        format!("http://{}", addr),
        auth::generate_contract_id(),
    ))
    .unwrap();
    if register {
        let admin_token = verifier
            .create_actor_token("admin-1", Actor::Admin, "Admin", 3600)
            .unwrap();
        ledger.register_contract(&admin_token).await.unwrap();
    }

    let store = Arc::new(MemoryTreatmentStore::new());
    let permits = Arc::new(InMemoryOrgPermits::new());
    permits.insert(HOSPITAL, "General Hospital").await;
    let notifier = RecordNotifier::connect("http://127.0.0.1:1").unwrap();

    let treatment_store: Arc<dyn TreatmentStore> = store.clone();
    let service = TreatmentServiceImpl::new(treatment_store, permits, verifier.clone(), ledger, notifier);
    Harness {
        service,
        verifier,
        store,
        ledger_addr: format!("http://{}", addr),
    }
}

fn record(id: &str) -> TreatmentRecord {
    TreatmentRecord {
        id: id.to_string(),
        patient_id: "pat-1".to_string(),
        hospital_id: HOSPITAL.to_string(),
        description: "Annual checkup".to_string(),
        medication: "None".to_string(),
        date: 1_700_000_000_000,
    }
}

fn with_token<T>(message: T, token: &str) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert("authorization", format!("Bearer {}", token).parse().unwrap());
    request
}

fn hospital_token(verifier: &AuthVerifier) -> String {
    verifier
        .create_actor_token(HOSPITAL, Actor::Hospital, "General Hospital", 3600)
        .unwrap()
}

#[tokio::test]
async fn test_add_then_owner_read_round_trip() {
    let h = start(true).await;
    let token = hospital_token(&h.verifier);

    let added = h
        .service
        .add_treatment(with_token(
            AddTreatmentRequest {
                treatment: Some(record("t-1")),
            },
            &token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(added.success);
    assert!(!added.block_hash.is_empty());

    // The local row carries the block hash of the ledger entry.
    let stored = h.store.get("t-1").await.unwrap().unwrap();
    assert_eq!(stored.block_hash, added.block_hash);

    let patient_token = h
        .verifier
        .create_actor_token("pat-1", Actor::Patient, "Pat Doe", 3600)
        .unwrap();
    let read = h
        .service
        .get_treatment(with_token(
            GetTreatmentRequest {
                treatment_id: "t-1".to_string(),
                patient_id: "pat-1".to_string(),
                is_owner: true,
                access_token: String::new(),
            },
            &patient_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(read.treatment.unwrap(), record("t-1"));
    assert_eq!(read.block_hash, added.block_hash);
}

#[tokio::test]
async fn test_capability_read_gate() {
    let h = start(true).await;
    let token = hospital_token(&h.verifier);
    h.service
        .add_treatment(with_token(
            AddTreatmentRequest {
                treatment: Some(record("t-1")),
            },
            &token,
        ))
        .await
        .unwrap();

    // A patient-scoped token for the right patient opens the record.
    let capability = h.verifier.create_patient_token("pat-1", 3600).unwrap();
    let read = h
        .service
        .get_treatment(Request::new(GetTreatmentRequest {
            treatment_id: "t-1".to_string(),
            patient_id: "pat-1".to_string(),
            is_owner: false,
            access_token: capability,
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(read.treatment.is_some());

    // A token scoped to a different patient does not.
    let foreign = h.verifier.create_patient_token("pat-2", 3600).unwrap();
    let status = h
        .service
        .get_treatment(Request::new(GetTreatmentRequest {
            treatment_id: "t-1".to_string(),
            patient_id: "pat-1".to_string(),
            is_owner: false,
            access_token: foreign,
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    // No token at all is a validation failure.
    let status = h
        .service
        .get_treatment(Request::new(GetTreatmentRequest {
            treatment_id: "t-1".to_string(),
            patient_id: "pat-1".to_string(),
            is_owner: false,
            access_token: String::new(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_owner_read_requires_matching_patient_claims() {
    let h = start(true).await;
    let token = hospital_token(&h.verifier);
    h.service
        .add_treatment(with_token(
            AddTreatmentRequest {
                treatment: Some(record("t-1")),
            },
            &token,
        ))
        .await
        .unwrap();

    let other_patient = h
        .verifier
        .create_actor_token("pat-2", Actor::Patient, "Other", 3600)
        .unwrap();
    let status = h
        .service
        .get_treatment(with_token(
            GetTreatmentRequest {
                treatment_id: "t-1".to_string(),
                patient_id: "pat-1".to_string(),
                is_owner: true,
                access_token: String::new(),
            },
            &other_patient,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn test_write_requires_permitted_hospital_identity() {
    let h = start(true).await;

    // A non-hospital caller is rejected on identity.
    let patient_token = h
        .verifier
        .create_actor_token(HOSPITAL, Actor::Patient, "Not A Hospital", 3600)
        .unwrap();
    let status = h
        .service
        .add_treatment(with_token(
            AddTreatmentRequest {
                treatment: Some(record("t-1")),
            },
            &patient_token,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    // A hospital outside the allow-map is rejected on permits.
    let rogue = h
        .verifier
        .create_actor_token("hosp-rogue", Actor::Hospital, "Rogue", 3600)
        .unwrap();
    let mut rogue_record = record("t-1");
    rogue_record.hospital_id = "hosp-rogue".to_string();
    let status = h
        .service
        .add_treatment(with_token(
            AddTreatmentRequest {
                treatment: Some(rogue_record),
            },
            &rogue,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    assert!(h.store.get("t-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_add_is_resource_exhausted() {
    let h = start(true).await;
    let token = hospital_token(&h.verifier);

    h.service
        .add_treatment(with_token(
            AddTreatmentRequest {
                treatment: Some(record("t-1")),
            },
            &token,
        ))
        .await
        .unwrap();

    let status = h
        .service
        .add_treatment(with_token(
            AddTreatmentRequest {
                treatment: Some(record("t-1")),
            },
            &token,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::ResourceExhausted);
}

#[tokio::test]
async fn test_update_missing_record_is_not_found() {
    let h = start(true).await;
    let token = hospital_token(&h.verifier);

    let status = h
        .service
        .update_treatment(with_token(
            UpdateTreatmentRequest {
                treatment: Some(record("t-404")),
            },
            &token,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn test_update_amends_record_and_writes_new_block() {
    let h = start(true).await;
    let token = hospital_token(&h.verifier);

    let added = h
        .service
        .add_treatment(with_token(
            AddTreatmentRequest {
                treatment: Some(record("t-1")),
            },
            &token,
        ))
        .await
        .unwrap()
        .into_inner();

    let mut amended = record("t-1");
    amended.description = "Follow-up visit".to_string();
    amended.medication = "Ibuprofen".to_string();
    let updated = h
        .service
        .update_treatment(with_token(
            UpdateTreatmentRequest {
                treatment: Some(amended.clone()),
            },
            &token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(updated.success);
    assert_ne!(updated.block_hash, added.block_hash);

    let stored = h.store.get("t-1").await.unwrap().unwrap();
    assert_eq!(stored.record.description, "Follow-up visit");
    assert_eq!(stored.record.medication, "Ibuprofen");
    assert_eq!(stored.block_hash, updated.block_hash);

    // Both the original and the amendment are on the chain.
    let mut ledger = LedgerClient::connect(LedgerClientConfig::new(
        h.ledger_addr.clone(),
        auth::generate_contract_id(),
    ))
    .unwrap();
    let admin_token = h
        .verifier
        .create_actor_token("admin-1", Actor::Admin, "Admin", 3600)
        .unwrap();
    ledger.register_contract(&admin_token).await.unwrap();
    assert!(ledger.get_block(&added.block_hash).await.is_ok());
    assert!(ledger.get_block(&updated.block_hash).await.is_ok());
}

#[tokio::test]
async fn test_ledger_failure_leaves_no_local_row() {
    // The client's contract is never registered, so the ledger append is
    // rejected and the staged local write must roll back.
    let h = start(false).await;
    let token = hospital_token(&h.verifier);

    let status = h
        .service
        .add_treatment(with_token(
            AddTreatmentRequest {
                treatment: Some(record("t-1")),
            },
            &token,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(h.store.get("t-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_validation_precedes_side_effects() {
    let h = start(true).await;
    let token = hospital_token(&h.verifier);

    let mut bad = record("t-1");
    bad.patient_id = String::new();
    let status = h
        .service
        .add_treatment(with_token(
            AddTreatmentRequest {
                treatment: Some(bad),
            },
            &token,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = h
        .service
        .add_treatment(with_token(AddTreatmentRequest { treatment: None }, &token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    assert!(h.store.get("t-1").await.unwrap().is_none());
}
