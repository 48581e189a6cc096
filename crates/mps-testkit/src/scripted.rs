use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mps_client::{AuthContext, CallError, MarketplaceAdapter};
use mps_schemas::{InventoryUpdate, MarketplaceId, RemoteOrder, RemoteProduct};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A marketplace whose answers are scripted per call.
///
/// Scripted failures are consumed first, in order; once a script is empty
/// the call succeeds with the configured listing/feed. Every call is
/// recorded.
pub struct ScriptedAdapter {
    marketplace: MarketplaceId,
    products: Mutex<Vec<RemoteProduct>>,
    orders: Mutex<Vec<RemoteOrder>>,
    push_script: Mutex<VecDeque<CallError>>,
    orders_script: Mutex<VecDeque<CallError>>,
    ack_script: Mutex<VecDeque<CallError>>,
    pushes: Mutex<Vec<InventoryUpdate>>,
    push_attempts: Mutex<u32>,
    acks: Mutex<Vec<String>>,
    sinces: Mutex<Vec<DateTime<Utc>>>,
}

impl ScriptedAdapter {
    pub fn new(marketplace: MarketplaceId) -> Self {
        Self {
            marketplace,
            products: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
            push_script: Mutex::new(VecDeque::new()),
            orders_script: Mutex::new(VecDeque::new()),
            ack_script: Mutex::new(VecDeque::new()),
            pushes: Mutex::new(Vec::new()),
            push_attempts: Mutex::new(0),
            acks: Mutex::new(Vec::new()),
            sinces: Mutex::new(Vec::new()),
        }
    }

    pub fn with_products(self, products: Vec<RemoteProduct>) -> Self {
        *guard(&self.products) = products;
        self
    }

    pub fn with_orders(self, orders: Vec<RemoteOrder>) -> Self {
        *guard(&self.orders) = orders;
        self
    }

    /// Fail the next pushes with these HTTP statuses, one per attempt.
    pub fn fail_pushes(self, statuses: &[u16]) -> Self {
        guard(&self.push_script).extend(statuses.iter().map(|s| CallError::status(*s, "scripted")));
        self
    }

    pub fn fail_list_orders(self, statuses: &[u16]) -> Self {
        guard(&self.orders_script).extend(statuses.iter().map(|s| CallError::status(*s, "scripted")));
        self
    }

    pub fn fail_acks(self, statuses: &[u16]) -> Self {
        guard(&self.ack_script).extend(statuses.iter().map(|s| CallError::status(*s, "scripted")));
        self
    }

    /// Replace the order feed between passes.
    pub fn set_orders(&self, orders: Vec<RemoteOrder>) {
        *guard(&self.orders) = orders;
    }

    /// Successful pushes, in order.
    pub fn pushes(&self) -> Vec<InventoryUpdate> {
        guard(&self.pushes).clone()
    }

    /// Every push attempt, failed ones included.
    pub fn push_attempts(&self) -> u32 {
        *guard(&self.push_attempts)
    }

    pub fn acks(&self) -> Vec<String> {
        guard(&self.acks).clone()
    }

    /// `since` of every successful `list_orders` call.
    pub fn sinces(&self) -> Vec<DateTime<Utc>> {
        guard(&self.sinces).clone()
    }
}

#[async_trait]
impl MarketplaceAdapter for ScriptedAdapter {
    fn marketplace(&self) -> MarketplaceId {
        self.marketplace
    }

    async fn list_products(&self, _auth: &AuthContext) -> Result<Vec<RemoteProduct>, CallError> {
        Ok(guard(&self.products).clone())
    }

    async fn push_inventory(
        &self,
        _auth: &AuthContext,
        update: &InventoryUpdate,
    ) -> Result<(), CallError> {
        *guard(&self.push_attempts) += 1;
        if let Some(err) = guard(&self.push_script).pop_front() {
            return Err(err);
        }
        guard(&self.pushes).push(update.clone());
        Ok(())
    }

    async fn list_orders(
        &self,
        _auth: &AuthContext,
        since: DateTime<Utc>,
    ) -> Result<Vec<RemoteOrder>, CallError> {
        if let Some(err) = guard(&self.orders_script).pop_front() {
            return Err(err);
        }
        guard(&self.sinces).push(since);
        Ok(guard(&self.orders).clone())
    }

    async fn acknowledge_order(
        &self,
        _auth: &AuthContext,
        external_id: &str,
    ) -> Result<(), CallError> {
        if let Some(err) = guard(&self.ack_script).pop_front() {
            return Err(err);
        }
        guard(&self.acks).push(external_id.to_string());
        Ok(())
    }
}
