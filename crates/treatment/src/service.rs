//! gRPC facade for the treatment chaincode
//!
//! Writes follow the chaincode shape: validate, authenticate the hospital,
//! check the allow-map, stage the local row, append the ledger block, then
//! commit. Reads are gated by ownership or a patient-issued permission
//! token.

use prost::Message;
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};
use tracing::{debug, error};

use auth::AuthVerifier;
use ledger_client::LedgerClient;
use monitoring::record_grpc_request;
use proto::treatment_service_server::TreatmentService;
use proto::{
    Actor, ActorPayload, AddTreatmentRequest, AddTreatmentResponse, GetTreatmentRequest,
    GetTreatmentResponse, Operation, Transaction, TreatmentRecord, UpdateTreatmentRequest,
    UpdateTreatmentResponse,
};

use crate::notify::RecordNotifier;
use crate::permits::OrgPermits;
use crate::store::{TreatmentStore, TreatmentTxn};

pub struct TreatmentServiceImpl {
    store: Arc<dyn TreatmentStore>,
    permits: Arc<dyn OrgPermits>,
    verifier: AuthVerifier,
    ledger: LedgerClient,
    notifier: RecordNotifier,
}

impl TreatmentServiceImpl {
    pub fn new(
        store: Arc<dyn TreatmentStore>,
        permits: Arc<dyn OrgPermits>,
        verifier: AuthVerifier,
        ledger: LedgerClient,
        notifier: RecordNotifier,
    ) -> Self {
        Self {
            store,
            permits,
            verifier,
            ledger,
            notifier,
        }
    }

    fn hospital_payload(id: &str, display_name: &str) -> ActorPayload {
        ActorPayload {
            group: Actor::Hospital as i32,
            id: id.to_string(),
            display_name: display_name.to_string(),
        }
    }

    fn patient_payload(id: &str) -> ActorPayload {
        ActorPayload {
            group: Actor::Patient as i32,
            id: id.to_string(),
            display_name: String::new(),
        }
    }

    fn notify_change(&self, record: &TreatmentRecord, hospital_name: &str, verb: &str) {
        let notifier = self.notifier.clone();
        let patient_id = record.patient_id.clone();
        let body = format!(
            "{} {} a treatment record ({}) on your medical history.",
            hospital_name, verb, record.id
        );
        tokio::spawn(async move {
            notifier
                .send_record_notice(&patient_id, "MediChain: medical record update", &body)
                .await;
        });
    }
}

fn validate_record(record: &Option<TreatmentRecord>) -> Result<&TreatmentRecord, Status> {
    let record = record
        .as_ref()
        .ok_or_else(|| Status::invalid_argument("Treatment record is required"))?;
    if record.id.is_empty() || record.patient_id.is_empty() || record.hospital_id.is_empty() {
        return Err(Status::invalid_argument(
            "Treatment id, patient id and hospital id are required",
        ));
    }
    if record.description.is_empty() {
        return Err(Status::invalid_argument(
            "Treatment description must not be empty",
        ));
    }
    Ok(record)
}

/// Roll back a staged local transaction, then return the given status.
async fn abort<T>(txn: Box<dyn TreatmentTxn>, status: Status) -> Result<T, Status> {
    if let Err(e) = txn.rollback().await {
        error!("Rollback after failed treatment write also failed: {}", e);
    }
    Err(status)
}

#[tonic::async_trait]
impl TreatmentService for TreatmentServiceImpl {
    async fn add_treatment(
        &self,
        request: Request<AddTreatmentRequest>,
    ) -> Result<Response<AddTreatmentResponse>, Status> {
        let start_time = Instant::now();
        let metadata = request.metadata().clone();
        let req = request.into_inner();
        let record = validate_record(&req.treatment)?.clone();

        // Only the authoring hospital itself may write.
        let auth = self
            .verifier
            .require_actor(&metadata, Actor::Hospital, &record.hospital_id)?;
        if !self.permits.is_allowed(&record.hospital_id).await {
            return Err(Status::permission_denied(format!(
                "Hospital {} is not permitted to author treatment records",
                record.hospital_id
            )));
        }

        let existing = self.store.get(&record.id).await.map_err(|e| {
            error!("Failed to check for existing treatment: {}", e);
            Status::internal(format!("Failed to add treatment: {}", e))
        })?;
        if existing.is_some() {
            return Err(Status::resource_exhausted(format!(
                "Treatment {} already exists",
                record.id
            )));
        }

        let mut txn = self.store.begin().await.map_err(|e| {
            error!("Failed to begin treatment transaction: {}", e);
            Status::internal(format!("Failed to add treatment: {}", e))
        })?;
        if let Err(e) = txn.insert(&record).await {
            error!("Failed to stage treatment {}: {}", record.id, e);
            return abort(txn, Status::internal(format!("Failed to add treatment: {}", e))).await;
        }

        let transaction = Transaction {
            operation: Operation::AddTreatment as i32,
            creator: Some(Self::hospital_payload(&auth.id, &auth.display_name)),
            patient: Some(Self::patient_payload(&record.patient_id)),
            organization: Some(Self::hospital_payload(&auth.id, &auth.display_name)),
            details: record.encode_to_vec(),
        };
        let mut ledger = self.ledger.clone();
        let block = match ledger.add_block(transaction).await {
            Ok(block) => block,
            Err(e) => {
                error!("Ledger append for treatment {} failed: {}", record.id, e);
                return abort(txn, Status::internal(format!("Failed to add treatment: {}", e)))
                    .await;
            }
        };

        if let Err(e) = txn.set_block_hash(&record.id, &block.hash).await {
            error!("Failed to attach block hash to {}: {}", record.id, e);
            return abort(txn, Status::internal(format!("Failed to add treatment: {}", e))).await;
        }
        // The ledger entry is durable; only now does the local copy commit.
        txn.commit().await.map_err(|e| {
            error!("Failed to commit treatment {}: {}", record.id, e);
            Status::internal(format!("Failed to add treatment: {}", e))
        })?;

        debug!("Treatment {} recorded in block {}", record.id, block.hash);
        self.notify_change(&record, &auth.display_name, "added");

        record_grpc_request(
            "add_treatment",
            "success",
            start_time.elapsed().as_secs_f64(),
        );
        Ok(Response::new(AddTreatmentResponse {
            success: true,
            message: format!("Treatment {} recorded", record.id),
            block_hash: block.hash,
        }))
    }

    async fn update_treatment(
        &self,
        request: Request<UpdateTreatmentRequest>,
    ) -> Result<Response<UpdateTreatmentResponse>, Status> {
        let start_time = Instant::now();
        let metadata = request.metadata().clone();
        let req = request.into_inner();
        let record = validate_record(&req.treatment)?.clone();

        let auth = self
            .verifier
            .require_actor(&metadata, Actor::Hospital, &record.hospital_id)?;
        if !self.permits.is_allowed(&record.hospital_id).await {
            return Err(Status::permission_denied(format!(
                "Hospital {} is not permitted to author treatment records",
                record.hospital_id
            )));
        }

        let existing = self
            .store
            .get(&record.id)
            .await
            .map_err(|e| {
                error!("Failed to load treatment {}: {}", record.id, e);
                Status::internal(format!("Failed to update treatment: {}", e))
            })?
            .ok_or_else(|| Status::not_found(format!("Treatment {} not found", record.id)))?;
        // Only the hospital that authored a record may amend it.
        if existing.record.hospital_id != auth.id {
            return Err(Status::permission_denied(
                "Only the authoring hospital may update this record",
            ));
        }

        let mut txn = self.store.begin().await.map_err(|e| {
            error!("Failed to begin treatment transaction: {}", e);
            Status::internal(format!("Failed to update treatment: {}", e))
        })?;
        match txn.update(&record).await {
            Ok(0) => {
                return abort(
                    txn,
                    Status::not_found(format!("Treatment {} not found", record.id)),
                )
                .await;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to stage treatment update {}: {}", record.id, e);
                return abort(
                    txn,
                    Status::internal(format!("Failed to update treatment: {}", e)),
                )
                .await;
            }
        }

        let transaction = Transaction {
            operation: Operation::UpdateTreatment as i32,
            creator: Some(Self::hospital_payload(&auth.id, &auth.display_name)),
            patient: Some(Self::patient_payload(&record.patient_id)),
            organization: Some(Self::hospital_payload(&auth.id, &auth.display_name)),
            details: record.encode_to_vec(),
        };
        let mut ledger = self.ledger.clone();
        let block = match ledger.add_block(transaction).await {
            Ok(block) => block,
            Err(e) => {
                error!("Ledger append for treatment {} failed: {}", record.id, e);
                return abort(
                    txn,
                    Status::internal(format!("Failed to update treatment: {}", e)),
                )
                .await;
            }
        };

        if let Err(e) = txn.set_block_hash(&record.id, &block.hash).await {
            error!("Failed to attach block hash to {}: {}", record.id, e);
            return abort(
                txn,
                Status::internal(format!("Failed to update treatment: {}", e)),
            )
            .await;
        }
        txn.commit().await.map_err(|e| {
            error!("Failed to commit treatment {}: {}", record.id, e);
            Status::internal(format!("Failed to update treatment: {}", e))
        })?;

        debug!("Treatment {} updated in block {}", record.id, block.hash);
        self.notify_change(&record, &auth.display_name, "updated");

        record_grpc_request(
            "update_treatment",
            "success",
            start_time.elapsed().as_secs_f64(),
        );
        Ok(Response::new(UpdateTreatmentResponse {
            success: true,
            message: format!("Treatment {} updated", record.id),
            block_hash: block.hash,
        }))
    }

    async fn get_treatment(
        &self,
        request: Request<GetTreatmentRequest>,
    ) -> Result<Response<GetTreatmentResponse>, Status> {
        let start_time = Instant::now();
        let metadata = request.metadata().clone();
        let req = request.into_inner();

        if req.treatment_id.is_empty() || req.patient_id.is_empty() {
            return Err(Status::invalid_argument(
                "Treatment id and patient id are required",
            ));
        }

        if req.is_owner {
            // The patient reads their own record.
            self.verifier
                .require_actor(&metadata, Actor::Patient, &req.patient_id)?;
        } else {
            // Third parties present the capability issued through the
            // consent grant protocol.
            if req.access_token.is_empty() {
                return Err(Status::invalid_argument(
                    "Access token is required for non-owner reads",
                ));
            }
            let subject = self
                .verifier
                .verify_patient_token(&req.access_token)
                .map_err(|e| Status::unauthenticated(format!("Invalid access token: {}", e)))?;
            if subject != req.patient_id {
                return Err(Status::permission_denied(
                    "Access token does not cover this patient",
                ));
            }
        }

        let stored = self
            .store
            .get(&req.treatment_id)
            .await
            .map_err(|e| {
                error!("Failed to load treatment {}: {}", req.treatment_id, e);
                Status::internal(format!("Failed to get treatment: {}", e))
            })?
            .ok_or_else(|| Status::not_found(format!("Treatment {} not found", req.treatment_id)))?;
        // A record belonging to another patient is indistinguishable from a
        // missing one.
        if stored.record.patient_id != req.patient_id {
            return Err(Status::not_found(format!(
                "Treatment {} not found",
                req.treatment_id
            )));
        }

        record_grpc_request(
            "get_treatment",
            "success",
            start_time.elapsed().as_secs_f64(),
        );
        Ok(Response::new(GetTreatmentResponse {
            treatment: Some(stored.record),
            block_hash: stored.block_hash,
        }))
    }
}
