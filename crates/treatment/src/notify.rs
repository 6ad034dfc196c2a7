//! Best-effort patient notification for record changes
//!
//! A failed notification never rolls back a committed record; sends are
//! retried a bounded number of times with linear backoff and then dropped.

use anyhow::{Result, anyhow};
use std::time::Duration;
use tonic::Request;
use tonic::transport::{Channel, Endpoint};
use tracing::{info, warn};

use proto::notification_service_client::NotificationServiceClient;
use proto::{DeliveryMethod, SendRequest};

const SEND_ATTEMPTS: u32 = 5;
const SEND_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct RecordNotifier {
    client: NotificationServiceClient<Channel>,
}

impl RecordNotifier {
    pub fn connect(endpoint: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| anyhow!("Invalid notification endpoint: {}", e))?
            .connect_lazy();
        Ok(Self {
            client: NotificationServiceClient::new(channel),
        })
    }

    /// Tell the patient their record changed. Bounded retry, then log and
    /// drop.
    pub async fn send_record_notice(&self, patient_id: &str, subject: &str, body: &str) {
        let request = SendRequest {
            recipient: patient_id.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            method: DeliveryMethod::Email as i32,
        };

        let mut client = self.client.clone();
        for attempt in 1..=SEND_ATTEMPTS {
            let mut rpc = Request::new(request.clone());
            rpc.set_timeout(SEND_DEADLINE);
            match client.send(rpc).await {
                Ok(_) => {
                    info!("Notified patient {} of record change", patient_id);
                    return;
                }
                Err(e) if attempt < SEND_ATTEMPTS => {
                    warn!(
                        "Notification attempt {}/{} for patient {} failed: {}",
                        attempt, SEND_ATTEMPTS, patient_id, e
                    );
                    tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                }
                Err(e) => {
                    warn!(
                        "Giving up notifying patient {} after {} attempts: {}",
                        patient_id, SEND_ATTEMPTS, e
                    );
                }
            }
        }
    }
}
