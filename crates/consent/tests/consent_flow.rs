//! End-to-end consent lifecycle against an in-process ledger.
//!
//! The ledger service runs on a loopback port with an in-memory block
//! store; the permission service is driven directly with signed metadata,
//! the way the gRPC layer would deliver it.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Code, Request};

use auth::{AuthVerifier, ContractRegistry};
use consent::{ConsentEngine, MemoryGrantStore, Notifier, PatientPermissionServiceImpl};
use ledger::{Ledger, LedgerServiceImpl, MemoryBlockStore};
use ledger_client::{LedgerClient, LedgerClientConfig};
use proto::patient_permission_service_server::PatientPermissionService;
use proto::{
    Actor, ActorPayload, GetActivePermissionsRequest, GetPermissionTokenRequest,
    GrantPermissionTokenRequest, PermissionMethod, RequestPermissionTokenRequest,
    RequesterProfile, RevokePermissionTokenRequest,
};

const SECRET: &str = "consent-flow-test-secret";

struct Harness {
    service: PatientPermissionServiceImpl,
    verifier: AuthVerifier,
    ledger: LedgerClient,
}

async fn start() -> Harness {
    let verifier = AuthVerifier::new(SECRET);

    // In-process ledger on an ephemeral loopback port.
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
    let admin_token = verifier
        .create_actor_token("admin-1", Actor::Admin, "Admin", 3600)
        .unwrap();
    ledger.register_contract(&admin_token).await.unwrap();

    let engine = ConsentEngine::new(Arc::new(MemoryGrantStore::new()));
    // Nothing listens on the notification port; delivery is best-effort
    // and must not affect any outcome below.
    let notifier = Notifier::connect("http://127.0.0.1:1", "https://app.test").unwrap();

    let service = PatientPermissionServiceImpl::new(
        engine,
        verifier.clone(),
        ledger.clone(),
        notifier,
    );
    Harness {
        service,
        verifier,
        ledger,
    }
}

fn actor(id: &str, group: Actor, name: &str) -> ActorPayload {
    ActorPayload {
        group: group as i32,
        id: id.to_string(),
        display_name: name.to_string(),
    }
}

fn with_token<T>(message: T, token: &str) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert("authorization", format!("Bearer {}", token).parse().unwrap());
    request
}

fn request_message() -> RequestPermissionTokenRequest {
    RequestPermissionTokenRequest {
        patient: Some(actor("pat-1", Actor::Patient, "Pat Doe")),
        requester: Some(actor("ins-1", Actor::Insurance, "Acme Insurance")),
        requester_profile: Some(RequesterProfile {
            id: "ins-1".to_string(),
            group: Actor::Insurance as i32,
            display_name: "Acme Insurance".to_string(),
            organization: "Acme Group".to_string(),
        }),
        reason: "Claims audit".to_string(),
        method: PermissionMethod::Email as i32,
    }
}

#[tokio::test]
async fn test_request_grant_lookup_revoke_lifecycle() {
    let h = start().await;
    let requester_token = h
        .verifier
        .create_actor_token("ins-1", Actor::Insurance, "Acme Insurance", 3600)
        .unwrap();
    let patient_token = h
        .verifier
        .create_actor_token("pat-1", Actor::Patient, "Pat Doe", 3600)
        .unwrap();

    // Request: recorded and accepted.
    let response = h
        .service
        .request_permission_token(with_token(request_message(), &requester_token))
        .await
        .unwrap()
        .into_inner();
    assert!(response.success);

    // Before any grant, lookup is a clean denial.
    let lookup = h
        .service
        .get_permission_token(with_token(
            GetPermissionTokenRequest {
                patient_id: "pat-1".to_string(),
                requester: Some(actor("ins-1", Actor::Insurance, "Acme Insurance")),
            },
            &requester_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(!lookup.allowed);
    assert!(lookup.access_token.is_empty());

    // Grant with a patient-scoped authorization token.
    let authorization = h.verifier.create_patient_token("pat-1", 3600).unwrap();
    let grant = h
        .service
        .grant_permission_token(Request::new(GrantPermissionTokenRequest {
            requester: Some(actor("ins-1", Actor::Insurance, "Acme Insurance")),
            organization: Some(actor("acme", Actor::Insurance, "Acme Group")),
            patient: Some(actor("pat-1", Actor::Patient, "Pat Doe")),
            authorization_token: authorization.clone(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(grant.success);
    assert!(!grant.block_hash.is_empty());

    // The audit block is durable on the ledger.
    let mut ledger = h.ledger.clone();
    let block = ledger.get_block(&grant.block_hash).await.unwrap();
    assert_eq!(block.hash, grant.block_hash);

    // Lookup now succeeds with the stored token.
    let lookup = h
        .service
        .get_permission_token(with_token(
            GetPermissionTokenRequest {
                patient_id: "pat-1".to_string(),
                requester: Some(actor("ins-1", Actor::Insurance, "Acme Insurance")),
            },
            &requester_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(lookup.allowed);
    assert_eq!(lookup.access_token, authorization);

    // The patient sees the active grant.
    let active = h
        .service
        .get_active_permissions(with_token(
            GetActivePermissionsRequest {
                patient_id: "pat-1".to_string(),
            },
            &patient_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(active.profiles.len(), 1);
    assert_eq!(active.profiles[0].id, "ins-1");

    // Revoke and observe denial again.
    let revoked = h
        .service
        .revoke_permission_token(with_token(
            RevokePermissionTokenRequest {
                patient_id: "pat-1".to_string(),
                requester_id: "ins-1".to_string(),
            },
            &patient_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(revoked.success);

    let lookup = h
        .service
        .get_permission_token(with_token(
            GetPermissionTokenRequest {
                patient_id: "pat-1".to_string(),
                requester: Some(actor("ins-1", Actor::Insurance, "Acme Insurance")),
            },
            &requester_token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(!lookup.allowed);
}

#[tokio::test]
async fn test_request_requires_matching_caller_identity() {
    let h = start().await;

    // No metadata at all.
    let status = h
        .service
        .request_permission_token(Request::new(request_message()))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    // A different requester's token.
    let other = h
        .verifier
        .create_actor_token("ins-2", Actor::Insurance, "Other", 3600)
        .unwrap();
    let status = h
        .service
        .request_permission_token(with_token(request_message(), &other))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn test_grant_rejects_foreign_or_garbage_authorization() {
    let h = start().await;

    let mut message = GrantPermissionTokenRequest {
        requester: Some(actor("ins-1", Actor::Insurance, "Acme Insurance")),
        organization: Some(actor("acme", Actor::Insurance, "Acme Group")),
        patient: Some(actor("pat-1", Actor::Patient, "Pat Doe")),
        authorization_token: "not-a-token".to_string(),
    };
    let status = h
        .service
        .grant_permission_token(Request::new(message.clone()))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    // A valid token for a different patient.
    message.authorization_token = h.verifier.create_patient_token("pat-2", 3600).unwrap();
    let status = h
        .service
        .grant_permission_token(Request::new(message))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn test_actor_token_is_not_grant_authorization() {
    let h = start().await;

    // An ordinary patient login token carries the wrong audience and must
    // not authorize a grant.
    let login = h
        .verifier
        .create_actor_token("pat-1", Actor::Patient, "Pat Doe", 3600)
        .unwrap();
    let status = h
        .service
        .grant_permission_token(Request::new(GrantPermissionTokenRequest {
            requester: Some(actor("ins-1", Actor::Insurance, "Acme Insurance")),
            organization: Some(actor("acme", Actor::Insurance, "Acme Group")),
            patient: Some(actor("pat-1", Actor::Patient, "Pat Doe")),
            authorization_token: login,
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn test_only_the_patient_revokes_and_lists() {
    let h = start().await;
    let requester_token = h
        .verifier
        .create_actor_token("ins-1", Actor::Insurance, "Acme Insurance", 3600)
        .unwrap();

    let status = h
        .service
        .revoke_permission_token(with_token(
            RevokePermissionTokenRequest {
                patient_id: "pat-1".to_string(),
                requester_id: "ins-1".to_string(),
            },
            &requester_token,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let status = h
        .service
        .get_active_permissions(with_token(
            GetActivePermissionsRequest {
                patient_id: "pat-1".to_string(),
            },
            &requester_token,
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn test_request_validates_payloads() {
    let h = start().await;
    let requester_token = h
        .verifier
        .create_actor_token("ins-1", Actor::Insurance, "Acme Insurance", 3600)
        .unwrap();

    let mut message = request_message();
    message.patient = None;
    let status = h
        .service
        .request_permission_token(with_token(message, &requester_token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let mut message = request_message();
    message.requester = Some(actor("ins-1", Actor::Unspecified, "Acme Insurance"));
    let status = h
        .service
        .request_permission_token(with_token(message, &requester_token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let mut message = request_message();
    message.requester_profile = None;
    let status = h
        .service
        .request_permission_token(with_token(message, &requester_token))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}
