use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::PaymentClient;
use crate::models::{ChargeReceipt, ChargeRequest};

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentBehaviour {
    Approve,
    Decline(String),
    /// Reports success but omits the transaction id.
    ApproveWithoutTransaction,
    Unavailable,
}

pub struct MemoryPayments {
    behaviour: Mutex<PaymentBehaviour>,
    charges: Mutex<Vec<ChargeRequest>>,
}

impl Default for MemoryPayments {
    fn default() -> Self {
        Self::new(PaymentBehaviour::Approve)
    }
}

impl MemoryPayments {
    pub fn new(behaviour: PaymentBehaviour) -> Self {
        Self {
            behaviour: Mutex::new(behaviour),
            charges: Mutex::new(vec![]),
        }
    }

    pub fn set_behaviour(&self, behaviour: PaymentBehaviour) {
        if let Ok(mut current) = self.behaviour.lock() {
            *current = behaviour;
        }
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentClient for MemoryPayments {
    async fn charge(&self, request: &ChargeRequest) -> anyhow::Result<ChargeReceipt> {
        let behaviour = self
            .behaviour
            .lock()
            .map_err(|_| anyhow::anyhow!("payment behaviour lock poisoned"))?
            .clone();

        let receipt = match behaviour {
            PaymentBehaviour::Unavailable => anyhow::bail!("payment service unavailable"),
            PaymentBehaviour::Approve => {
                ChargeReceipt::approved(format!("TX-{}", Uuid::new_v4().simple()))
            }
            PaymentBehaviour::Decline(reason) => ChargeReceipt::declined(reason),
            PaymentBehaviour::ApproveWithoutTransaction => ChargeReceipt {
                success: true,
                transaction_id: None,
                message: None,
            },
        };

        self.charges
            .lock()
            .map_err(|_| anyhow::anyhow!("payment ledger lock poisoned"))?
            .push(request.clone());

        Ok(receipt)
    }
}
