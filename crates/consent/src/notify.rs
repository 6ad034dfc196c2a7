//! Best-effort patient notification
//!
//! Delivery is never load-bearing: a grant request stands whether or not
//! the patient could be reached. Sends are retried a bounded number of
//! times with linear backoff and a per-attempt deadline, then logged and
//! dropped.

use anyhow::{Result, anyhow};
use std::time::Duration;
use tonic::Request;
use tonic::transport::{Channel, Endpoint};
use tracing::{info, warn};

use proto::notification_service_client::NotificationServiceClient;
use proto::{ActorPayload, DeliveryMethod, PermissionMethod, SendRequest};

const SEND_ATTEMPTS: u32 = 5;
const SEND_DEADLINE: Duration = Duration::from_secs(10);

fn delivery_method(method: PermissionMethod) -> DeliveryMethod {
    match method {
        PermissionMethod::Email => DeliveryMethod::Email,
        PermissionMethod::Sms => DeliveryMethod::Sms,
        PermissionMethod::Ussd => DeliveryMethod::Ussd,
        PermissionMethod::Unspecified => DeliveryMethod::Unspecified,
    }
}

#[derive(Clone)]
pub struct Notifier {
    client: NotificationServiceClient<Channel>,
    base_url: String,
}

impl Notifier {
    /// Create a notifier over a lazy channel. The grant base URL must be
    /// configured; construction fails fast otherwise.
    pub fn connect(endpoint: &str, base_url: &str) -> Result<Self> {
        if base_url.is_empty() {
            return Err(anyhow!("Grant base URL must not be empty"));
        }
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| anyhow!("Invalid notification endpoint: {}", e))?
            .connect_lazy();
        Ok(Self {
            client: NotificationServiceClient::new(channel),
            base_url: base_url.to_string(),
        })
    }

    /// Direct "grant access" URL embedded in email notifications. The token
    /// is a patient-scoped capability for this grant request only.
    pub fn grant_url(&self, patient_id: &str, grant_token: &str) -> String {
        format!(
            "{}/grant?patient={}&token={}",
            self.base_url, patient_id, grant_token
        )
    }

    /// Notify the patient of a pending access request. Bounded retry with
    /// linear backoff in whole seconds; the final failure is logged and
    /// swallowed.
    pub async fn send_grant_request(
        &self,
        patient: &ActorPayload,
        requester_name: &str,
        reason: &str,
        method: PermissionMethod,
        grant_token: &str,
    ) {
        let subject = "MediChain: data access request".to_string();
        let body = match method {
            PermissionMethod::Email => format!(
                "{} is requesting access to your medical records. Reason: {}. \
                 Grant access here: {}",
                requester_name,
                reason,
                self.grant_url(&patient.id, grant_token)
            ),
            _ => format!(
                "{} is requesting access to your medical records. Reason: {}.",
                requester_name, reason
            ),
        };

        let request = SendRequest {
            recipient: patient.id.clone(),
            subject,
            body,
            method: delivery_method(method) as i32,
        };

        let mut client = self.client.clone();
        for attempt in 1..=SEND_ATTEMPTS {
            let mut rpc = Request::new(request.clone());
            rpc.set_timeout(SEND_DEADLINE);
            match client.send(rpc).await {
                Ok(_) => {
                    info!("Notified patient {} of access request", patient.id);
                    return;
                }
                Err(e) if attempt < SEND_ATTEMPTS => {
                    warn!(
                        "Notification attempt {}/{} for patient {} failed: {}",
                        attempt, SEND_ATTEMPTS, patient.id, e
                    );
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
                Err(e) => {
                    warn!(
                        "Giving up notifying patient {} after {} attempts: {}",
                        patient.id, SEND_ATTEMPTS, e
                    );
                }
            }
        }
    }
}
