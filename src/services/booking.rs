use std::sync::Arc;

use rust_decimal::Decimal;

use crate::db::{BookingFilter, BookingStore, StoreError};
use crate::errors::AppError;
use crate::models::{Booking, BookingRequest, BookingStatus, ChargeRequest, NewBooking, RowState};
use crate::services::inventory::{InventoryClient, InventoryError};
use crate::services::notification::NotificationClient;
use crate::services::payment::PaymentClient;

pub const MAX_TICKETS_PER_BOOKING: i64 = 10_000;

/// Drives a booking through validation, pricing, inventory reservation,
/// optional payment and notification, compensating the inventory debit when a
/// later step fails.
///
/// Every status change is persisted before the next external call, so a
/// crash leaves a row whose status says how far the saga got.
pub struct BookingOrchestrator {
    store: Arc<dyn BookingStore>,
    inventory: Arc<dyn InventoryClient>,
    payments: Arc<dyn PaymentClient>,
    notifications: Arc<dyn NotificationClient>,
    background_notifications: bool,
}

impl BookingOrchestrator {
    pub fn new(
        store: Arc<dyn BookingStore>,
        inventory: Arc<dyn InventoryClient>,
        payments: Arc<dyn PaymentClient>,
        notifications: Arc<dyn NotificationClient>,
    ) -> Self {
        Self {
            store,
            inventory,
            payments,
            notifications,
            background_notifications: true,
        }
    }

    /// When disabled the confirmation message is sent before `book_ticket`
    /// returns. Failures are swallowed either way.
    pub fn with_background_notifications(mut self, enabled: bool) -> Self {
        self.background_notifications = enabled;
        self
    }

    pub async fn book_ticket(&self, request: &BookingRequest) -> Result<Booking, AppError> {
        validate(request)?;
        let total_price = self.quote(request).await?;

        let booking = self.store.create(&NewBooking {
            event_id: request.event_id,
            user_id: request.user_id,
            total_tickets: request.total_tickets,
            total_price,
        })?;
        tracing::info!(
            booking_id = booking.id,
            event_id = booking.event_id,
            user_id = booking.user_id,
            total_tickets = booking.total_tickets,
            total_price = %booking.total_price,
            "provisional booking created"
        );

        let mut run = SagaRun {
            orchestrator: self,
            persisted: booking.status,
            booking,
            reserved: false,
        };

        run.reserve().await?;
        if let Some(method) = request.payment_method() {
            run.collect_payment(method).await?;
        }
        if let Err(e) = run.persist(BookingStatus::Confirmed) {
            return Err(run.abort(e).await);
        }

        let booking = run.booking;
        tracing::info!(
            booking_id = booking.id,
            payment_id = booking.payment_id.as_deref().unwrap_or("-"),
            "booking confirmed"
        );
        self.send_confirmation(&booking).await;
        Ok(booking)
    }

    /// Cancels a booking, giving its tickets back at most once.
    ///
    /// The canceller restores only when its own compare-and-set raised the
    /// reconciliation flag. A row that is already flagged has a restore owed
    /// by whichever writer flagged it, so cancelling keeps the flag and leaves
    /// the restore to that writer.
    pub async fn cancel_booking(&self, id: i64) -> Result<Booking, AppError> {
        let mut booking = self.require(id)?;

        // Each failed compare-and-set means the row moved forward; the
        // transition graph is acyclic so this settles in a few rounds.
        let owes_restore = loop {
            if booking.status == BookingStatus::Cancelled {
                tracing::info!(booking_id = id, "booking already cancelled");
                return Ok(booking);
            }

            let owes_restore = !booking.reconciliation_required && booking.holds_inventory_claim();
            let next = RowState::new(
                BookingStatus::Cancelled,
                booking.reconciliation_required || owes_restore,
            );
            if self.store.compare_and_set(id, booking.row_state(), next)? {
                tracing::info!(
                    booking_id = id,
                    previous = booking.status.as_str(),
                    owes_restore,
                    "booking cancelled"
                );
                booking.status = next.status;
                booking.reconciliation_required = next.reconciliation_required;
                break owes_restore;
            }
            booking = self.require(id)?;
        };

        if owes_restore {
            if self.return_tickets(&booking).await {
                booking.reconciliation_required = false;
            }
        } else if booking.reconciliation_required {
            tracing::info!(booking_id = id, "cancelled with an inventory restore already in progress");
        }

        Ok(booking)
    }

    pub fn get_booking(&self, id: i64) -> Result<Booking, AppError> {
        self.require(id)
    }

    pub fn list_bookings_by_user(&self, user_id: i64) -> Result<Vec<Booking>, AppError> {
        Ok(self.store.list_by_user(user_id)?)
    }

    pub fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, AppError> {
        Ok(self.store.list(filter)?)
    }

    /// Hard-deletes a finished booking that no longer accounts for any
    /// tickets. Anything else must be cancelled or reconciled first.
    pub fn purge_booking(&self, id: i64) -> Result<(), AppError> {
        let booking = self.require(id)?;
        if !booking.status.is_terminal() || booking.holds_inventory_claim() {
            return Err(AppError::Validation(format!(
                "booking {id} is {} and cannot be purged",
                describe(&booking)
            )));
        }
        if !self.store.delete(id)? {
            return Err(AppError::NotFound(format!("booking {id}")));
        }
        tracing::info!(booking_id = id, "booking purged");
        Ok(())
    }

    fn require(&self, id: i64) -> Result<Booking, AppError> {
        self.store
            .get(id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
    }

    /// Restores the tickets of a row the caller flagged, then clears the flag.
    /// Returns whether the flag was cleared. Any failure leaves the row
    /// flagged for reconciliation.
    async fn return_tickets(&self, booking: &Booking) -> bool {
        let booking_id = booking.id;
        if let Err(e) = self
            .inventory
            .restore_tickets(booking.event_id, booking.total_tickets)
            .await
        {
            tracing::error!(
                booking_id,
                event_id = booking.event_id,
                tickets = booking.total_tickets,
                error = %e,
                "inventory restore failed; reconciliation required"
            );
            return false;
        }

        match self.clear_restore_flag(booking_id) {
            Ok(()) => {
                tracing::info!(booking_id, tickets = booking.total_tickets, "inventory restored");
                true
            }
            Err(e) => {
                tracing::error!(
                    booking_id,
                    error = %e,
                    "inventory restored but reconciliation flag could not be cleared"
                );
                false
            }
        }
    }

    /// A canceller may move a flagged row to CANCELLED while the restore is in
    /// flight, so the clear follows whatever status the row has now.
    fn clear_restore_flag(&self, id: i64) -> Result<(), StoreError> {
        loop {
            let row = self.store.get(id)?.ok_or(StoreError::NotFound(id))?;
            if !row.reconciliation_required {
                return Ok(());
            }
            let cleared = RowState::new(row.status, false);
            if self.store.compare_and_set(id, row.row_state(), cleared)? {
                return Ok(());
            }
        }
    }

    async fn quote(&self, request: &BookingRequest) -> Result<Decimal, AppError> {
        let event_id = request.event_id;

        let available = match self.inventory.available_tickets(event_id).await {
            Ok(n) => n,
            Err(InventoryError::EventNotFound(_)) => {
                return Err(AppError::Validation(format!(
                    "event {event_id} does not exist"
                )))
            }
            Err(e) => return Err(AppError::UpstreamUnavailable(e.to_string())),
        };
        if available < request.total_tickets {
            tracing::info!(
                event_id,
                requested = request.total_tickets,
                available,
                "not enough tickets"
            );
            return Err(AppError::InsufficientInventory {
                event_id,
                requested: request.total_tickets,
                available,
            });
        }

        let unit_price = match self.inventory.unit_price(event_id).await {
            Ok(Some(price)) if !price.is_sign_negative() => price,
            Ok(Some(price)) => {
                tracing::warn!(event_id, price = %price, "ignoring negative ticket price");
                return Err(AppError::PriceNotFound(event_id));
            }
            Ok(None) | Err(InventoryError::EventNotFound(_)) => {
                return Err(AppError::PriceNotFound(event_id))
            }
            Err(e) => return Err(AppError::UpstreamUnavailable(e.to_string())),
        };

        unit_price
            .checked_mul(Decimal::from(request.total_tickets))
            .ok_or_else(|| AppError::Validation("total price is out of range".to_string()))
    }

    async fn send_confirmation(&self, booking: &Booking) {
        let message = format!("Your booking for Event {} was successful!", booking.event_id);
        let booking_id = booking.id;
        let user_id = booking.user_id;

        if self.background_notifications {
            let notifications = Arc::clone(&self.notifications);
            tokio::spawn(async move {
                if let Err(e) = notifications.notify(user_id, &message).await {
                    tracing::warn!(booking_id, user_id, error = %e, "confirmation notification failed");
                }
            });
        } else if let Err(e) = self.notifications.notify(user_id, &message).await {
            tracing::warn!(booking_id, user_id, error = %e, "confirmation notification failed");
        }
    }
}

fn validate(request: &BookingRequest) -> Result<(), AppError> {
    if request.event_id <= 0 || request.user_id <= 0 {
        return Err(AppError::Validation(
            "Event ID and User ID must be provided".to_string(),
        ));
    }
    if request.total_tickets < 1 {
        return Err(AppError::Validation(
            "totalTickets must be at least 1".to_string(),
        ));
    }
    if request.total_tickets > MAX_TICKETS_PER_BOOKING {
        return Err(AppError::Validation(format!(
            "totalTickets must not exceed {MAX_TICKETS_PER_BOOKING}"
        )));
    }
    Ok(())
}

fn describe(booking: &Booking) -> String {
    if booking.reconciliation_required {
        format!("{} awaiting reconciliation", booking.status.as_str())
    } else {
        booking.status.as_str().to_string()
    }
}

/// One in-flight saga: the working copy of the row plus what is known to be
/// durable and what has happened upstream.
struct SagaRun<'a> {
    orchestrator: &'a BookingOrchestrator,
    booking: Booking,
    /// Last status the store acknowledged.
    persisted: BookingStatus,
    /// The inventory debit for this booking went through.
    reserved: bool,
}

impl SagaRun<'_> {
    fn persist(&mut self, next: BookingStatus) -> Result<(), StoreError> {
        debug_assert!(
            self.persisted.can_transition_to(next),
            "illegal transition {} -> {}",
            self.persisted.as_str(),
            next.as_str()
        );
        self.booking.status = next;
        self.orchestrator.store.update(&mut self.booking)?;
        self.persisted = next;
        Ok(())
    }

    async fn reserve(&mut self) -> Result<(), AppError> {
        let booking_id = self.booking.id;
        let outcome = self
            .orchestrator
            .inventory
            .reduce_available_tickets(self.booking.event_id, self.booking.total_tickets)
            .await;

        match outcome {
            Ok(()) => {
                self.reserved = true;
                if let Err(e) = self.persist(BookingStatus::Reserved) {
                    return Err(self.abort(e).await);
                }
                tracing::info!(booking_id, "inventory reserved");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    booking_id,
                    event_id = self.booking.event_id,
                    error = %e,
                    "inventory reservation failed"
                );
                match self.persist(BookingStatus::InventoryFailed) {
                    Ok(()) => {}
                    Err(StoreError::Cancelled(_)) => return Err(AppError::BookingCancelled(booking_id)),
                    Err(se) => tracing::error!(
                        booking_id,
                        error = %se,
                        "could not record failed reservation; row left PENDING"
                    ),
                }
                Err(AppError::InventoryReservationFailed {
                    booking_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn collect_payment(&mut self, payment_method: &str) -> Result<(), AppError> {
        let booking_id = self.booking.id;
        let charge = ChargeRequest {
            booking_id,
            user_id: self.booking.user_id,
            amount: self.booking.total_price,
            payment_method: payment_method.to_string(),
        };

        let reason = match self.orchestrator.payments.charge(&charge).await {
            Ok(receipt) => {
                if let Some(transaction_id) = receipt.settled_transaction().map(str::to_string) {
                    tracing::info!(booking_id, transaction_id = %transaction_id, "payment collected");
                    self.booking.payment_id = Some(transaction_id);
                    if let Err(e) = self.persist(BookingStatus::Paid) {
                        return Err(self.abort(e).await);
                    }
                    return Ok(());
                }
                if receipt.success {
                    "payment reported success without a transaction id".to_string()
                } else {
                    receipt
                        .message
                        .unwrap_or_else(|| "payment declined".to_string())
                }
            }
            Err(e) => format!("{e:#}"),
        };

        tracing::warn!(booking_id, reason = %reason, "payment failed; releasing inventory");
        Err(self.compensate_payment(reason).await)
    }

    /// Flags the row FAILED_PAYMENT in one compare-and-set, which makes this
    /// run the owner of the restore, then gives the tickets back. A crash in
    /// between leaves the row flagged.
    async fn compensate_payment(&mut self, reason: String) -> AppError {
        let booking_id = self.booking.id;
        let owed = RowState::new(BookingStatus::PaymentFailed, true);
        match self.claim_restore(self.persisted, owed) {
            Ok(true) => {}
            // A canceller saw RESERVED, raised the flag and restores itself.
            Ok(false) => return AppError::BookingCancelled(booking_id),
            Err(e) => return self.abort(e).await,
        }

        self.orchestrator.return_tickets(&self.booking).await;
        AppError::PaymentFailed { booking_id, reason }
    }

    /// Raises the restore flag if the row still reads `from` unflagged.
    fn claim_restore(&mut self, from: BookingStatus, owed: RowState) -> Result<bool, StoreError> {
        let expected = RowState::new(from, false);
        if !self
            .orchestrator
            .store
            .compare_and_set(self.booking.id, expected, owed)?
        {
            return Ok(false);
        }
        self.booking.status = owed.status;
        self.booking.reconciliation_required = true;
        if owed.status != BookingStatus::Cancelled {
            self.persisted = owed.status;
        }
        self.reserved = false;
        Ok(true)
    }

    /// Unwinds after the store refused a write mid-saga.
    async fn abort(&mut self, err: StoreError) -> AppError {
        let booking_id = self.booking.id;
        let cancelled = matches!(err, StoreError::Cancelled(_));

        if let Some(transaction_id) = self.booking.payment_id.as_deref() {
            // The row still reads RESERVED or PAID and keeps its tickets, or a
            // canceller saw it that way and returns them.
            tracing::error!(
                booking_id,
                transaction_id,
                error = %err,
                "payment taken but booking could not be confirmed; reconciliation required"
            );
        } else if self.reserved {
            self.release_reservation(cancelled).await;
        }

        if cancelled {
            tracing::info!(booking_id, "booking cancelled while in flight");
            AppError::BookingCancelled(booking_id)
        } else {
            tracing::error!(booking_id, error = %err, "booking saga aborted");
            AppError::Storage(err.to_string())
        }
    }

    /// Gives back this run's debit unless a canceller already owns it.
    async fn release_reservation(&mut self, cancelled: bool) {
        let booking_id = self.booking.id;
        let mut current = if cancelled {
            BookingStatus::Cancelled
        } else {
            self.persisted
        };

        loop {
            // A canceller that saw RESERVED or PAID raised the flag itself.
            if current == BookingStatus::Cancelled
                && matches!(self.persisted, BookingStatus::Reserved | BookingStatus::Paid)
            {
                return;
            }
            let owed = if current == BookingStatus::Cancelled {
                RowState::new(BookingStatus::Cancelled, true)
            } else {
                RowState::new(BookingStatus::InventoryFailed, true)
            };
            match self.claim_restore(current, owed) {
                Ok(true) => break,
                // Only a canceller writes alongside the saga.
                Ok(false) if current != BookingStatus::Cancelled => {
                    current = BookingStatus::Cancelled;
                }
                Ok(false) => {
                    tracing::error!(
                        booking_id,
                        "booking changed before the restore was claimed; reconciliation required"
                    );
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        booking_id,
                        status = self.persisted.as_str(),
                        error = %e,
                        "could not claim inventory restore; booking keeps its tickets"
                    );
                    return;
                }
            }
        }

        self.orchestrator.return_tickets(&self.booking).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::{Notify, Semaphore};

    use super::*;
    use crate::db::SqliteBookingStore;
    use crate::services::inventory::memory::MemoryInventory;
    use crate::services::notification::memory::MemoryNotifications;
    use crate::services::payment::memory::{MemoryPayments, PaymentBehaviour};

    // ── Fixtures ──

    struct Harness {
        orchestrator: BookingOrchestrator,
        store: Arc<FlakyStore>,
        inventory: Arc<MemoryInventory>,
        payments: Arc<MemoryPayments>,
        notifications: Arc<MemoryNotifications>,
    }

    fn harness() -> Harness {
        harness_with(MemoryInventory::new().with_event(1, 5, Some(dec!(10.00))))
    }

    fn harness_with(inventory: MemoryInventory) -> Harness {
        let store = Arc::new(FlakyStore::new());
        let inventory = Arc::new(inventory);
        let payments = Arc::new(MemoryPayments::default());
        let notifications = Arc::new(MemoryNotifications::new());
        let orchestrator = BookingOrchestrator::new(
            store.clone(),
            inventory.clone(),
            payments.clone(),
            notifications.clone(),
        )
        .with_background_notifications(false);

        Harness {
            orchestrator,
            store,
            inventory,
            payments,
            notifications,
        }
    }

    fn request(event_id: i64, user_id: i64, total_tickets: i64) -> BookingRequest {
        BookingRequest {
            event_id,
            user_id,
            total_tickets,
            payment_method: None,
        }
    }

    fn paid_request(event_id: i64, user_id: i64, total_tickets: i64) -> BookingRequest {
        BookingRequest {
            payment_method: Some("card".to_string()),
            ..request(event_id, user_id, total_tickets)
        }
    }

    /// Sqlite store whose writes can be switched off.
    struct FlakyStore {
        inner: SqliteBookingStore,
        fail_create: AtomicBool,
        fail_update_to: std::sync::Mutex<Option<BookingStatus>>,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: SqliteBookingStore::open(":memory:").unwrap(),
                fail_create: AtomicBool::new(false),
                fail_update_to: std::sync::Mutex::new(None),
            }
        }

        fn fail_updates_to(&self, status: BookingStatus) {
            *self.fail_update_to.lock().unwrap() = Some(status);
        }

        fn all(&self) -> Vec<Booking> {
            self.inner.list(&BookingFilter::default()).unwrap()
        }
    }

    impl BookingStore for FlakyStore {
        fn create(&self, new: &NewBooking) -> Result<Booking, StoreError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(StoreError::LockPoisoned);
            }
            self.inner.create(new)
        }
        fn get(&self, id: i64) -> Result<Option<Booking>, StoreError> {
            self.inner.get(id)
        }
        fn update(&self, booking: &mut Booking) -> Result<(), StoreError> {
            if *self.fail_update_to.lock().unwrap() == Some(booking.status) {
                return Err(StoreError::LockPoisoned);
            }
            self.inner.update(booking)
        }
        fn compare_and_set(&self, id: i64, expected: RowState, next: RowState) -> Result<bool, StoreError> {
            self.inner.compare_and_set(id, expected, next)
        }
        fn delete(&self, id: i64) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }
        fn list_by_user(&self, user_id: i64) -> Result<Vec<Booking>, StoreError> {
            self.inner.list_by_user(user_id)
        }
        fn list(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
            self.inner.list(filter)
        }
    }

    /// Reports availability from a stale snapshot so the debit can lose a
    /// race that the lookup did not see.
    struct StaleInventory {
        inner: MemoryInventory,
        reported: i64,
    }

    #[async_trait]
    impl InventoryClient for StaleInventory {
        async fn available_tickets(&self, _event_id: i64) -> Result<i64, InventoryError> {
            Ok(self.reported)
        }
        async fn unit_price(&self, event_id: i64) -> Result<Option<Decimal>, InventoryError> {
            self.inner.unit_price(event_id).await
        }
        async fn reduce_available_tickets(&self, event_id: i64, delta: i64) -> Result<(), InventoryError> {
            self.inner.reduce_available_tickets(event_id, delta).await
        }
    }

    /// Holds the first credit at a gate so a cancel can land while the
    /// saga's restore is in flight.
    struct GatedInventory {
        inner: MemoryInventory,
        armed: AtomicBool,
        credit_started: Notify,
        gate: Semaphore,
    }

    impl GatedInventory {
        fn new(inner: MemoryInventory) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(true),
                credit_started: Notify::new(),
                gate: Semaphore::new(0),
            }
        }

        fn open(&self) {
            self.gate.add_permits(1);
        }
    }

    #[async_trait]
    impl InventoryClient for GatedInventory {
        async fn available_tickets(&self, event_id: i64) -> Result<i64, InventoryError> {
            self.inner.available_tickets(event_id).await
        }
        async fn unit_price(&self, event_id: i64) -> Result<Option<Decimal>, InventoryError> {
            self.inner.unit_price(event_id).await
        }
        async fn reduce_available_tickets(&self, event_id: i64, delta: i64) -> Result<(), InventoryError> {
            if delta < 0 && self.armed.swap(false, Ordering::SeqCst) {
                self.credit_started.notify_one();
                self.gate.acquire().await.unwrap().forget();
            }
            self.inner.reduce_available_tickets(event_id, delta).await
        }
    }

    fn gated_orchestrator(
        store: Arc<FlakyStore>,
        inventory: Arc<GatedInventory>,
        payments: Arc<MemoryPayments>,
    ) -> Arc<BookingOrchestrator> {
        Arc::new(
            BookingOrchestrator::new(
                store,
                inventory,
                payments,
                Arc::new(MemoryNotifications::new()),
            )
            .with_background_notifications(false),
        )
    }

    // ── BookTicket ──

    #[tokio::test]
    async fn test_book_without_payment_confirms() {
        let h = harness();
        let booking = h.orchestrator.book_ticket(&request(1, 42, 3)).await.unwrap();

        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.total_price, dec!(30.00));
        assert_eq!(booking.total_price.to_string(), "30.00");
        assert_eq!(booking.payment_id, None);
        assert!(!booking.reconciliation_required);
        assert_eq!(h.inventory.available(1), Some(2));
        assert!(h.payments.charges().is_empty());
        assert_eq!(
            h.notifications.sent(),
            vec![(42, "Your booking for Event 1 was successful!".to_string())]
        );

        let stored = h.orchestrator.get_booking(booking.id).unwrap();
        assert_eq!(stored, booking);
    }

    #[tokio::test]
    async fn test_book_with_payment_records_transaction() {
        let h = harness();
        let booking = h.orchestrator.book_ticket(&paid_request(1, 42, 2)).await.unwrap();

        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert!(booking.payment_id.as_deref().unwrap().starts_with("TX-"));

        let charges = h.payments.charges();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].booking_id, booking.id);
        assert_eq!(charges[0].amount, dec!(20.00));
        assert_eq!(charges[0].payment_method, "card");
        assert_eq!(h.inventory.available(1), Some(3));
    }

    #[tokio::test]
    async fn test_insufficient_inventory_creates_nothing() {
        let h = harness();
        h.orchestrator.book_ticket(&request(1, 42, 3)).await.unwrap();

        let err = h.orchestrator.book_ticket(&request(1, 43, 5)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientInventory {
                event_id: 1,
                requested: 5,
                available: 2
            }
        ));
        assert_eq!(h.store.all().len(), 1);
        assert_eq!(h.inventory.available(1), Some(2));
    }

    #[tokio::test]
    async fn test_validation_rejects_before_any_side_effect() {
        let h = harness();
        for bad in [request(0, 42, 1), request(1, 0, 1), request(1, 42, 0), request(1, 42, -2)] {
            let err = h.orchestrator.book_ticket(&bad).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{bad:?} gave {err:?}");
        }
        let err = h
            .orchestrator
            .book_ticket(&request(1, 42, MAX_TICKETS_PER_BOOKING + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(h.store.all().is_empty());
        assert_eq!(h.inventory.available(1), Some(5));
    }

    #[tokio::test]
    async fn test_unknown_event_is_validation_error() {
        let h = harness();
        let err = h.orchestrator.book_ticket(&request(99, 42, 1)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.store.all().is_empty());
    }

    #[tokio::test]
    async fn test_missing_or_negative_price() {
        let h = harness_with(
            MemoryInventory::new()
                .with_event(1, 5, None)
                .with_event(2, 5, Some(dec!(-1))),
        );
        for event_id in [1, 2] {
            let err = h
                .orchestrator
                .book_ticket(&request(event_id, 42, 1))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::PriceNotFound(id) if id == event_id));
        }
        assert!(h.store.all().is_empty());
    }

    #[tokio::test]
    async fn test_free_event_books_at_zero() {
        let h = harness_with(MemoryInventory::new().with_event(1, 5, Some(dec!(0))));
        let booking = h.orchestrator.book_ticket(&request(1, 42, 2)).await.unwrap();
        assert_eq!(booking.total_price, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_lookup_outage_is_upstream_unavailable() {
        let h = harness();
        h.inventory.set_lookup_outage(true);
        let err = h.orchestrator.book_ticket(&request(1, 42, 1)).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));
        assert!(h.store.all().is_empty());
    }

    #[tokio::test]
    async fn test_lost_reservation_race_marks_failed_inventory() {
        let inner = MemoryInventory::new().with_event(1, 1, Some(dec!(10.00)));
        let store = Arc::new(FlakyStore::new());
        let orchestrator = BookingOrchestrator::new(
            store.clone(),
            Arc::new(StaleInventory { inner, reported: 5 }),
            Arc::new(MemoryPayments::default()),
            Arc::new(MemoryNotifications::new()),
        )
        .with_background_notifications(false);

        let err = orchestrator.book_ticket(&request(1, 42, 3)).await.unwrap_err();
        let AppError::InventoryReservationFailed { booking_id, .. } = err else {
            panic!("expected reservation failure, got {err:?}");
        };

        let stored = store.get(booking_id).unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::InventoryFailed);
        assert!(!stored.holds_inventory_claim());
    }

    #[tokio::test]
    async fn test_payment_decline_restores_inventory() {
        let h = harness();
        h.payments
            .set_behaviour(PaymentBehaviour::Decline("card declined".to_string()));

        let err = h.orchestrator.book_ticket(&paid_request(1, 42, 3)).await.unwrap_err();
        let AppError::PaymentFailed { booking_id, reason } = err else {
            panic!("expected payment failure, got {err:?}");
        };
        assert_eq!(reason, "card declined");
        assert_eq!(h.inventory.available(1), Some(5));

        let stored = h.store.get(booking_id).unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::PaymentFailed);
        assert!(!stored.reconciliation_required);
        assert_eq!(stored.payment_id, None);
        assert!(h.notifications.sent().is_empty());
    }

    #[tokio::test]
    async fn test_payment_outage_and_missing_transaction_are_failures() {
        for behaviour in [PaymentBehaviour::Unavailable, PaymentBehaviour::ApproveWithoutTransaction] {
            let h = harness();
            h.payments.set_behaviour(behaviour.clone());

            let err = h.orchestrator.book_ticket(&paid_request(1, 42, 2)).await.unwrap_err();
            assert!(matches!(err, AppError::PaymentFailed { .. }), "{behaviour:?}");
            assert_eq!(h.inventory.available(1), Some(5));
        }
    }

    #[tokio::test]
    async fn test_failed_restore_after_decline_flags_reconciliation() {
        let h = harness();
        h.payments.set_behaviour(PaymentBehaviour::Decline("nope".to_string()));
        h.inventory.set_restore_outage(true);

        let err = h.orchestrator.book_ticket(&paid_request(1, 42, 3)).await.unwrap_err();
        let booking_id = err.booking_id().unwrap();
        assert!(matches!(err, AppError::PaymentFailed { .. }));

        let stored = h.store.get(booking_id).unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::PaymentFailed);
        assert!(stored.reconciliation_required);
        assert!(stored.holds_inventory_claim());
        assert_eq!(h.inventory.available(1), Some(2));

        let flagged = h
            .orchestrator
            .list_bookings(&BookingFilter {
                reconciliation_required: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(flagged.len(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_booking() {
        let h = harness();
        h.notifications.set_failing(true);
        let booking = h.orchestrator.book_ticket(&request(1, 42, 1)).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert!(h.notifications.sent().is_empty());
    }

    #[tokio::test]
    async fn test_background_notification_is_delivered() {
        let h = harness();
        let orchestrator = BookingOrchestrator::new(
            h.store.clone(),
            h.inventory.clone(),
            h.payments.clone(),
            h.notifications.clone(),
        );
        orchestrator.book_ticket(&request(1, 42, 1)).await.unwrap();

        for _ in 0..50 {
            if !h.notifications.sent().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.notifications.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_provisional_write_failure_is_storage_error() {
        let h = harness();
        h.store.fail_create.store(true, Ordering::SeqCst);
        let err = h.orchestrator.book_ticket(&request(1, 42, 2)).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(h.inventory.available(1), Some(5));
    }

    #[tokio::test]
    async fn test_storage_failure_after_reservation_releases_tickets() {
        let h = harness();
        h.store.fail_updates_to(BookingStatus::Confirmed);

        let err = h.orchestrator.book_ticket(&request(1, 42, 2)).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(h.inventory.available(1), Some(5));

        let stored = &h.store.all()[0];
        assert_eq!(stored.status, BookingStatus::InventoryFailed);
        assert!(!stored.reconciliation_required);
        assert!(!stored.holds_inventory_claim());
    }

    #[tokio::test]
    async fn test_storage_failure_after_payment_keeps_claim() {
        let h = harness();
        h.store.fail_updates_to(BookingStatus::Confirmed);

        let err = h.orchestrator.book_ticket(&paid_request(1, 42, 2)).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(h.inventory.available(1), Some(3));

        let stored = &h.store.all()[0];
        assert_eq!(stored.status, BookingStatus::Paid);
        assert!(!stored.reconciliation_required);
        assert!(stored.holds_inventory_claim());
        assert!(stored.payment_id.is_some());

        // a later cancel returns the tickets
        h.orchestrator.cancel_booking(stored.id).await.unwrap();
        assert_eq!(h.inventory.available(1), Some(5));
    }

    // ── CancelBooking ──

    #[tokio::test]
    async fn test_cancel_restores_once() {
        let h = harness();
        let booking = h.orchestrator.book_ticket(&request(1, 42, 3)).await.unwrap();
        assert_eq!(h.inventory.available(1), Some(2));

        let cancelled = h.orchestrator.cancel_booking(booking.id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(!cancelled.reconciliation_required);
        assert_eq!(h.inventory.available(1), Some(5));

        let again = h.orchestrator.cancel_booking(booking.id).await.unwrap();
        assert_eq!(again.status, BookingStatus::Cancelled);
        assert_eq!(h.inventory.available(1), Some(5));

        // retained, not deleted
        let stored = h.orchestrator.get_booking(booking.id).unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_concurrent_cancels_restore_once() {
        let h = harness();
        let booking = h.orchestrator.book_ticket(&request(1, 42, 3)).await.unwrap();
        let orchestrator = Arc::new(h.orchestrator);

        let mut handles = vec![];
        for _ in 0..8 {
            let orchestrator = Arc::clone(&orchestrator);
            handles.push(tokio::spawn(async move {
                orchestrator.cancel_booking(booking.id).await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.status, BookingStatus::Cancelled);
        }
        assert_eq!(h.inventory.available(1), Some(5));
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_not_found() {
        let h = harness();
        let err = h.orchestrator.cancel_booking(404).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_failed_payment_does_not_restore_twice() {
        let h = harness();
        h.payments.set_behaviour(PaymentBehaviour::Decline("no".to_string()));
        let err = h.orchestrator.book_ticket(&paid_request(1, 42, 3)).await.unwrap_err();
        assert_eq!(h.inventory.available(1), Some(5));

        h.orchestrator.cancel_booking(err.booking_id().unwrap()).await.unwrap();
        assert_eq!(h.inventory.available(1), Some(5));
    }

    #[tokio::test]
    async fn test_cancel_with_restore_outage_flags_reconciliation() {
        let h = harness();
        let booking = h.orchestrator.book_ticket(&request(1, 42, 3)).await.unwrap();
        h.inventory.set_restore_outage(true);

        let cancelled = h.orchestrator.cancel_booking(booking.id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(cancelled.reconciliation_required);
        assert_eq!(h.inventory.available(1), Some(2));

        let stored = h.orchestrator.get_booking(booking.id).unwrap();
        assert!(stored.reconciliation_required);

        // a flagged booking still holds tickets and cannot be purged
        let err = h.orchestrator.purge_booking(booking.id).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_of_flagged_failure_leaves_restore_to_its_owner() {
        let h = harness();
        h.payments.set_behaviour(PaymentBehaviour::Decline("no".to_string()));
        h.inventory.set_restore_outage(true);
        let err = h.orchestrator.book_ticket(&paid_request(1, 42, 3)).await.unwrap_err();
        let booking_id = err.booking_id().unwrap();
        h.inventory.set_restore_outage(false);

        let cancelled = h.orchestrator.cancel_booking(booking_id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(cancelled.reconciliation_required);
        assert_eq!(h.inventory.available(1), Some(2));
        assert!(h.orchestrator.get_booking(booking_id).unwrap().holds_inventory_claim());
    }

    #[tokio::test]
    async fn test_cancel_during_payment_compensation_restores_once() {
        let store = Arc::new(FlakyStore::new());
        let inventory = Arc::new(GatedInventory::new(
            MemoryInventory::new().with_event(1, 5, Some(dec!(10.00))),
        ));
        let payments = Arc::new(MemoryPayments::default());
        payments.set_behaviour(PaymentBehaviour::Decline("card declined".to_string()));
        let orchestrator = gated_orchestrator(store.clone(), inventory.clone(), payments);

        let saga = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.book_ticket(&paid_request(1, 42, 3)).await }
        });
        inventory.credit_started.notified().await;

        let in_flight = store.all()[0].clone();
        assert_eq!(in_flight.status, BookingStatus::PaymentFailed);
        assert!(in_flight.reconciliation_required);

        let cancelled = orchestrator.cancel_booking(in_flight.id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(inventory.inner.available(1), Some(2));

        inventory.open();
        let err = saga.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::PaymentFailed { .. }));

        assert_eq!(inventory.inner.available(1), Some(5));
        let stored = store.get(in_flight.id).unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert!(!stored.reconciliation_required);
    }

    #[tokio::test]
    async fn test_cancel_during_storage_abort_restores_once() {
        let store = Arc::new(FlakyStore::new());
        store.fail_updates_to(BookingStatus::Confirmed);
        let inventory = Arc::new(GatedInventory::new(
            MemoryInventory::new().with_event(1, 5, Some(dec!(10.00))),
        ));
        let orchestrator =
            gated_orchestrator(store.clone(), inventory.clone(), Arc::new(MemoryPayments::default()));

        let saga = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.book_ticket(&request(1, 42, 3)).await }
        });
        inventory.credit_started.notified().await;

        let in_flight = store.all()[0].clone();
        assert_eq!(in_flight.status, BookingStatus::InventoryFailed);
        assert!(in_flight.reconciliation_required);

        let cancelled = orchestrator.cancel_booking(in_flight.id).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(inventory.inner.available(1), Some(2));

        inventory.open();
        let err = saga.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));

        assert_eq!(inventory.inner.available(1), Some(5));
        let stored = store.get(in_flight.id).unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert!(!stored.reconciliation_required);
        orchestrator.purge_booking(in_flight.id).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_saga_is_reported_and_released() {
        let h = harness();
        // The saga's RESERVED write lands on a row cancelled while PENDING.
        let pending = h
            .store
            .create(&NewBooking {
                event_id: 1,
                user_id: 42,
                total_tickets: 2,
                total_price: dec!(20.00),
            })
            .unwrap();
        h.orchestrator.cancel_booking(pending.id).await.unwrap();
        h.inventory.reduce_available_tickets(1, 2).await.unwrap();

        let mut run = SagaRun {
            orchestrator: &h.orchestrator,
            booking: pending.clone(),
            persisted: BookingStatus::Pending,
            reserved: true,
        };
        let err = match run.persist(BookingStatus::Reserved) {
            Err(e) => run.abort(e).await,
            Ok(()) => panic!("write over a cancelled row must fail"),
        };
        assert!(matches!(err, AppError::BookingCancelled(id) if id == pending.id));
        assert_eq!(h.inventory.available(1), Some(5));
        assert_eq!(
            h.orchestrator.get_booking(pending.id).unwrap().status,
            BookingStatus::Cancelled
        );
    }

    // ── Reads and purge ──

    #[tokio::test]
    async fn test_list_by_user() {
        let h = harness();
        h.orchestrator.book_ticket(&request(1, 42, 1)).await.unwrap();
        h.orchestrator.book_ticket(&request(1, 42, 1)).await.unwrap();
        h.orchestrator.book_ticket(&request(1, 7, 1)).await.unwrap();

        assert_eq!(h.orchestrator.list_bookings_by_user(42).unwrap().len(), 2);
        assert!(h.orchestrator.list_bookings_by_user(1000).unwrap().is_empty());
        assert_eq!(
            h.orchestrator.list_bookings(&BookingFilter::default()).unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_purge_only_finished_bookings() {
        let h = harness();
        let booking = h.orchestrator.book_ticket(&request(1, 42, 1)).await.unwrap();

        let err = h.orchestrator.purge_booking(booking.id).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let pending = h
            .store
            .create(&NewBooking {
                event_id: 1,
                user_id: 42,
                total_tickets: 1,
                total_price: dec!(10.00),
            })
            .unwrap();
        let err = h.orchestrator.purge_booking(pending.id).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        h.orchestrator.cancel_booking(booking.id).await.unwrap();
        h.orchestrator.purge_booking(booking.id).unwrap();
        assert!(matches!(
            h.orchestrator.get_booking(booking.id),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.orchestrator.purge_booking(booking.id),
            Err(AppError::NotFound(_))
        ));
    }
}
