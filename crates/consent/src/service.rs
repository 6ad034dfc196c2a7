//! gRPC facade for the patient permission API
//!
//! Handlers validate, authenticate the caller against the signed claims in
//! request metadata, drive the consent engine, and (for grants) append the
//! audit transaction to the ledger.

use prost::Message;
use std::time::Instant;
use tonic::{Request, Response, Status};
use tracing::{debug, error};

use auth::AuthVerifier;
use ledger_client::LedgerClient;
use monitoring::{record_grpc_request, record_permission_grant};
use proto::patient_permission_service_server::PatientPermissionService;
use proto::{
    Actor, ActorPayload, GetActivePermissionsRequest, GetActivePermissionsResponse,
    GetPermissionTokenRequest, GetPermissionTokenResponse, GrantPermissionTokenRequest,
    GrantPermissionTokenResponse, Operation, PermissionMethod, RequestPermissionTokenRequest,
    RequestPermissionTokenResponse, RevokePermissionTokenRequest, RevokePermissionTokenResponse,
    Transaction,
};

use crate::engine::ConsentEngine;
use crate::keys::TOKEN_TTL_SECS;
use crate::notify::Notifier;
use crate::profile::RequesterProfile;

pub struct PatientPermissionServiceImpl {
    engine: ConsentEngine,
    verifier: AuthVerifier,
    ledger: LedgerClient,
    notifier: Notifier,
}

impl PatientPermissionServiceImpl {
    pub fn new(
        engine: ConsentEngine,
        verifier: AuthVerifier,
        ledger: LedgerClient,
        notifier: Notifier,
    ) -> Self {
        Self {
            engine,
            verifier,
            ledger,
            notifier,
        }
    }
}

/// Extract a required actor payload with a non-empty id.
fn require_actor_payload<'a>(
    payload: &'a Option<ActorPayload>,
    field: &str,
) -> Result<&'a ActorPayload, Status> {
    let payload = payload
        .as_ref()
        .ok_or_else(|| Status::invalid_argument(format!("{} is required", field)))?;
    if payload.id.is_empty() {
        return Err(Status::invalid_argument(format!(
            "{} id must not be empty",
            field
        )));
    }
    Ok(payload)
}

#[tonic::async_trait]
impl PatientPermissionService for PatientPermissionServiceImpl {
    async fn request_permission_token(
        &self,
        request: Request<RequestPermissionTokenRequest>,
    ) -> Result<Response<RequestPermissionTokenResponse>, Status> {
        let start_time = Instant::now();
        let metadata = request.metadata().clone();
        let req = request.into_inner();

        let patient = require_actor_payload(&req.patient, "patient")?.clone();
        let requester = require_actor_payload(&req.requester, "requester")?.clone();
        if requester.group() == Actor::Unspecified {
            return Err(Status::invalid_argument("Requester group must be specified"));
        }
        let profile = req
            .requester_profile
            .ok_or_else(|| Status::invalid_argument("Requester profile is required"))?;
        if profile.id.is_empty() || profile.display_name.is_empty() {
            return Err(Status::invalid_argument(
                "Requester profile id and display name are required",
            ));
        }
        if profile.id != requester.id {
            return Err(Status::invalid_argument(
                "Requester profile does not match requester",
            ));
        }

        // The caller must be the requester it claims to be.
        self.verifier
            .require_actor(&metadata, requester.group(), &requester.id)?;

        let profile: RequesterProfile = profile.into();
        self.engine.record_request(&profile).await.map_err(|e| {
            error!("Failed to record permission request: {}", e);
            Status::internal(format!("Failed to record permission request: {}", e))
        })?;

        // Patient-scoped capability embedded in the grant URL; short-lived
        // proof that this request may be turned into a grant.
        let grant_token = self
            .verifier
            .create_patient_token(&patient.id, TOKEN_TTL_SECS)
            .map_err(|e| {
                error!("Failed to create patient token: {}", e);
                Status::internal("Failed to create authorization token")
            })?;

        let notifier = self.notifier.clone();
        let requester_name = profile.display_name.clone();
        let reason = req.reason.clone();
        let method = PermissionMethod::try_from(req.method).unwrap_or(PermissionMethod::Unspecified);
        tokio::spawn(async move {
            notifier
                .send_grant_request(&patient, &requester_name, &reason, method, &grant_token)
                .await;
        });

        record_grpc_request(
            "request_permission_token",
            "success",
            start_time.elapsed().as_secs_f64(),
        );
        Ok(Response::new(RequestPermissionTokenResponse {
            success: true,
            message: "Permission request recorded and patient notified".to_string(),
        }))
    }

    async fn grant_permission_token(
        &self,
        request: Request<GrantPermissionTokenRequest>,
    ) -> Result<Response<GrantPermissionTokenResponse>, Status> {
        let start_time = Instant::now();
        let req = request.into_inner();

        let requester = require_actor_payload(&req.requester, "requester")?.clone();
        let organization = require_actor_payload(&req.organization, "organization")?.clone();
        let patient = require_actor_payload(&req.patient, "patient")?.clone();
        if requester.group() == Actor::Unspecified {
            return Err(Status::invalid_argument("Requester group must be specified"));
        }
        if req.authorization_token.is_empty() {
            return Err(Status::invalid_argument("Authorization token is required"));
        }

        // The token is the proof that the real patient authorized the grant.
        let subject = self
            .verifier
            .verify_patient_token(&req.authorization_token)
            .map_err(|e| Status::unauthenticated(format!("Invalid authorization token: {}", e)))?;
        if subject != patient.id {
            return Err(Status::permission_denied(
                "Authorization token does not belong to this patient",
            ));
        }

        let cached_profile = self
            .engine
            .grant(&patient.id, &requester.id, &req.authorization_token)
            .await
            .map_err(|e| {
                error!("Failed to commit grant: {}", e);
                Status::internal(format!("Failed to grant permission: {}", e))
            })?;

        // Durable audit trail; the cache stays the live authorization surface.
        let details = cached_profile
            .map(|p| proto::RequesterProfile::from(p).encode_to_vec())
            .unwrap_or_default();
        let transaction = Transaction {
            operation: Operation::GrantPermission as i32,
            creator: Some(patient.clone()),
            patient: Some(patient.clone()),
            organization: Some(organization),
            details,
        };
        let mut ledger = self.ledger.clone();
        let block = ledger.add_block(transaction).await.map_err(|e| {
            error!("Failed to record grant on ledger: {}", e);
            Status::internal(format!("Failed to record grant on ledger: {}", e))
        })?;

        record_permission_grant();
        record_grpc_request(
            "grant_permission_token",
            "success",
            start_time.elapsed().as_secs_f64(),
        );

        debug!(
            "Granted {} access to patient {} (block {})",
            requester.id, patient.id, block.hash
        );

        Ok(Response::new(GrantPermissionTokenResponse {
            success: true,
            message: format!("Access granted to {}", requester.display_name),
            block_hash: block.hash,
        }))
    }

    async fn revoke_permission_token(
        &self,
        request: Request<RevokePermissionTokenRequest>,
    ) -> Result<Response<RevokePermissionTokenResponse>, Status> {
        let start_time = Instant::now();
        let metadata = request.metadata().clone();
        let req = request.into_inner();

        if req.patient_id.is_empty() || req.requester_id.is_empty() {
            return Err(Status::invalid_argument(
                "Patient id and requester id are required",
            ));
        }

        // Only the patient may revoke.
        self.verifier
            .require_actor(&metadata, Actor::Patient, &req.patient_id)?;

        self.engine
            .revoke(&req.patient_id, &req.requester_id)
            .await
            .map_err(|e| {
                error!("Failed to revoke permission: {}", e);
                Status::internal(format!("Failed to revoke permission: {}", e))
            })?;

        record_grpc_request(
            "revoke_permission_token",
            "success",
            start_time.elapsed().as_secs_f64(),
        );
        Ok(Response::new(RevokePermissionTokenResponse {
            success: true,
            message: format!("Access for {} revoked", req.requester_id),
        }))
    }

    async fn get_permission_token(
        &self,
        request: Request<GetPermissionTokenRequest>,
    ) -> Result<Response<GetPermissionTokenResponse>, Status> {
        let start_time = Instant::now();
        let metadata = request.metadata().clone();
        let req = request.into_inner();

        if req.patient_id.is_empty() {
            return Err(Status::invalid_argument("Patient id is required"));
        }
        let requester = require_actor_payload(&req.requester, "requester")?.clone();

        // Callers may only look up their own grants.
        self.verifier
            .require_actor(&metadata, requester.group(), &requester.id)?;

        let token = self
            .engine
            .lookup(&req.patient_id, &requester.id)
            .await
            .map_err(|e| {
                error!("Failed to look up permission token: {}", e);
                Status::internal(format!("Failed to look up permission token: {}", e))
            })?;

        record_grpc_request(
            "get_permission_token",
            "success",
            start_time.elapsed().as_secs_f64(),
        );

        // A miss is a normal outcome, not an error.
        match token {
            Some(access_token) => Ok(Response::new(GetPermissionTokenResponse {
                allowed: true,
                access_token,
            })),
            None => Ok(Response::new(GetPermissionTokenResponse {
                allowed: false,
                access_token: String::new(),
            })),
        }
    }

    async fn get_active_permissions(
        &self,
        request: Request<GetActivePermissionsRequest>,
    ) -> Result<Response<GetActivePermissionsResponse>, Status> {
        let start_time = Instant::now();
        let metadata = request.metadata().clone();
        let req = request.into_inner();

        if req.patient_id.is_empty() {
            return Err(Status::invalid_argument("Patient id is required"));
        }

        self.verifier
            .require_actor(&metadata, Actor::Patient, &req.patient_id)?;

        let profiles = self.engine.active(&req.patient_id).await.map_err(|e| {
            error!("Failed to list active permissions: {}", e);
            Status::internal(format!("Failed to list active permissions: {}", e))
        })?;

        if profiles.is_empty() {
            debug!("No active permissions for patient {}", req.patient_id);
        }

        record_grpc_request(
            "get_active_permissions",
            "success",
            start_time.elapsed().as_secs_f64(),
        );
        Ok(Response::new(GetActivePermissionsResponse {
            profiles: profiles.into_iter().map(Into::into).collect(),
        }))
    }
}
