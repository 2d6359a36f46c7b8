use crate::config::NetworkConfig;
use crate::data_structures::{LedgerIdentity, ValidatorIdentity};
use crate::network::{
    AttestationHandler, AttestationRequest, AttestationResponse, NetworkMessage, TransportError, ValidatorTransport,
};
use async_trait::async_trait;
use log::{debug, warn};
use rand::{thread_rng, Rng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Validator transport over tokio channels, with configurable latency and
/// request loss. Each registered validator serves its inbox on its own task.
#[derive(Clone, Debug)]
pub struct InProcessNetwork {
    config: Arc<NetworkConfig>,
    inboxes: Arc<Mutex<HashMap<ValidatorIdentity, mpsc::Sender<NetworkMessage>>>>,
}

impl InProcessNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        InProcessNetwork { config: Arc::new(config), inboxes: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Connects a validator. Registering again replaces its previous inbox.
    pub async fn register(&self, handler: Arc<dyn AttestationHandler>) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel(self.config.inbox_capacity);
        let identity = handler.identity().clone();
        self.inboxes.lock().await.insert(identity.clone(), tx);
        debug!("[InProcessNetwork] Registered validator {}", identity);
        tokio::spawn(serve_inbox(handler, rx))
    }

    /// Drops a validator's inbox; its serving task then ends.
    pub async fn disconnect(&self, validator: &ValidatorIdentity) -> bool {
        let removed = self.inboxes.lock().await.remove(validator).is_some();
        if removed {
            debug!("[InProcessNetwork] Disconnected validator {}", validator);
        }
        removed
    }

    pub async fn is_connected(&self, validator: &ValidatorIdentity) -> bool {
        self.inboxes.lock().await.contains_key(validator)
    }

    // Decide drop and delay up front; ThreadRng must not live across an await
    fn sample_link(&self) -> (bool, Duration) {
        let mut rng = thread_rng();
        let dropped = self.config.drop_rate > 0.0 && rng.gen::<f64>() < self.config.drop_rate;
        let delay_ms = if self.config.min_delay_ms >= self.config.max_delay_ms {
            self.config.min_delay_ms
        } else {
            rng.gen_range(self.config.min_delay_ms..=self.config.max_delay_ms)
        };
        (dropped, Duration::from_millis(delay_ms))
    }
}

async fn serve_inbox(handler: Arc<dyn AttestationHandler>, mut inbox: mpsc::Receiver<NetworkMessage>) {
    while let Some(message) = inbox.recv().await {
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let result = handler.handle(&message.sender, message.request).await;
            if message.reply_to.send(result).is_err() {
                debug!("[InProcessNetwork] Requester for {} went away before the reply", handler.identity());
            }
        });
    }
    debug!("[InProcessNetwork] Inbox of {} closed", handler.identity());
}

#[async_trait]
impl ValidatorTransport for InProcessNetwork {
    async fn request(
        &self,
        sender: &LedgerIdentity,
        validator: &ValidatorIdentity,
        request: AttestationRequest,
    ) -> Result<AttestationResponse, TransportError> {
        let (dropped, delay) = self.sample_link();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if dropped {
            debug!("[InProcessNetwork] Dropping request from {} to {}", sender, validator);
            return Err(TransportError::NoReply(validator.to_string()));
        }

        let inbox = self.inboxes.lock().await.get(validator).cloned();
        let inbox = inbox.ok_or_else(|| TransportError::Unreachable(validator.to_string()))?;

        let (reply_to, reply) = oneshot::channel();
        let message = NetworkMessage { sender: sender.clone(), request, reply_to };
        if inbox.send(message).await.is_err() {
            warn!("[InProcessNetwork] Inbox of {} is closed", validator);
            return Err(TransportError::Unreachable(validator.to_string()));
        }

        match reply.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(reason)) => Err(TransportError::Rejected { validator: validator.to_string(), reason }),
            Err(_) => Err(TransportError::NoReply(validator.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::types::BlockAttestation;
    use crate::test_utils::{create_test_party, create_test_validator, TestValidatorKeys};
    use ethers::types::H256;

    // Answers block requests with a fixed root, refuses the rest
    struct FixedRootValidator {
        keys: TestValidatorKeys,
    }

    #[async_trait]
    impl AttestationHandler for FixedRootValidator {
        fn identity(&self) -> &ValidatorIdentity {
            &self.keys.identity
        }

        async fn handle(&self, _sender: &LedgerIdentity, request: AttestationRequest) -> Result<AttestationResponse, String> {
            match request {
                AttestationRequest::Block { block_number } => Ok(AttestationResponse::Block(BlockAttestation::sign(
                    self.keys.identity.clone(),
                    &self.keys.signing_key,
                    block_number,
                    H256::repeat_byte(7),
                ))),
                AttestationRequest::Notarization { .. } => Err("not supported".to_string()),
            }
        }
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let network = InProcessNetwork::new(NetworkConfig::default());
        let keys = create_test_validator(1);
        let validator = keys.identity.clone();
        network.register(Arc::new(FixedRootValidator { keys })).await;
        let (requester, _) = create_test_party("Requester", 100);

        let response = network
            .request(&requester, &validator, AttestationRequest::Block { block_number: 3 })
            .await
            .unwrap();
        match response {
            AttestationResponse::Block(a) => {
                assert_eq!(a.block_number, 3);
                assert!(a.verify());
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn refusal_and_disconnect() {
        let network = InProcessNetwork::new(NetworkConfig::default());
        let keys = create_test_validator(2);
        let validator = keys.identity.clone();
        network.register(Arc::new(FixedRootValidator { keys })).await;
        let (requester, _) = create_test_party("Requester", 100);
        let notarize = AttestationRequest::Notarization {
            tx_id: H256::zero(),
            notary: requester.clone(),
            notary_signature: crate::attestation::crypto::sign(b"x", &create_test_party("N", 1).1),
        };

        let refused = network.request(&requester, &validator, notarize).await;
        assert!(matches!(refused, Err(TransportError::Rejected { .. })));

        assert!(network.disconnect(&validator).await);
        assert!(!network.is_connected(&validator).await);
        let unreachable = network.request(&requester, &validator, AttestationRequest::Block { block_number: 1 }).await;
        assert!(matches!(unreachable, Err(TransportError::Unreachable(_))));
    }

    #[tokio::test]
    async fn full_drop_rate_loses_every_request() {
        let config = NetworkConfig { drop_rate: 1.0, ..NetworkConfig::default() };
        let network = InProcessNetwork::new(config);
        let keys = create_test_validator(3);
        let validator = keys.identity.clone();
        network.register(Arc::new(FixedRootValidator { keys })).await;
        let (requester, _) = create_test_party("Requester", 100);
        for _ in 0..5 {
            let result = network.request(&requester, &validator, AttestationRequest::Block { block_number: 1 }).await;
            assert!(matches!(result, Err(TransportError::NoReply(_))));
        }
    }

    #[tokio::test]
    async fn delay_is_applied() {
        let config = NetworkConfig { min_delay_ms: 30, max_delay_ms: 30, ..NetworkConfig::default() };
        let network = InProcessNetwork::new(config);
        let keys = create_test_validator(4);
        let validator = keys.identity.clone();
        network.register(Arc::new(FixedRootValidator { keys })).await;
        let (requester, _) = create_test_party("Requester", 100);

        let start = tokio::time::Instant::now();
        network
            .request(&requester, &validator, AttestationRequest::Block { block_number: 1 })
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
