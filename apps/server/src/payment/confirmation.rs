//! Turns an approved provider payment into confirmed appointments.
//!
//! Delivery is at-least-once, so every session is checked for an earlier
//! confirmation of the same purchase before anything is written. The whole
//! body runs behind one process-wide gate. Individual writes still take the
//! slot lock, which is what keeps them exclusive against the reservation
//! path.

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::gateway::PaymentGateway;
use super::metadata::{BookingMetadata, Session};
use super::notify::Notifier;
use crate::appointments::{self, NewAppointment};
use crate::catalog;
use crate::clock::{format_hhmm, Clock};
use crate::error::BookingResult;
use crate::models::{Appointment, AppointmentStatus};
use crate::slot_lock::SlotLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Not an approved payment event, or nothing usable to book from it.
    Ignored { reason: String },
    /// Every session was already confirmed by an earlier delivery.
    AlreadyProcessed,
    Created {
        appointment_ids: Vec<i64>,
        group_id: Option<String>,
        /// Sessions whose slot was taken by someone else.
        unplaced: usize,
    },
    /// Paid, but no session could be placed. Needs an operator.
    Unplaced { sessions: usize },
}

impl ConfirmationOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored { reason: reason.into() }
    }
}

/// Money attached to the appointment that represents the purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentTerms {
    pub paid_amount: i64,
    pub cash_amount_due: i64,
    pub is_deposit: bool,
}

impl PaymentTerms {
    /// Explicit unit price wins, then the total (halved, rounding up, for a
    /// deposit), then the catalog price. A deposit owes the rest in cash.
    pub fn from_metadata(booking: &BookingMetadata, catalog_price: i64) -> Self {
        let paid_amount = booking
            .unit_price
            .or_else(|| {
                booking
                    .total_amount
                    .map(|total| if booking.deposit { total - total / 2 } else { total })
            })
            .unwrap_or(catalog_price);

        let cash_amount_due = match (booking.deposit, booking.total_amount) {
            (true, Some(total)) => (total - paid_amount).max(0),
            _ => 0,
        };

        Self {
            paid_amount,
            cash_amount_due,
            is_deposit: booking.deposit,
        }
    }

    /// Same deposit flag, no money. Used for every group member but one.
    fn without_amounts(self) -> Self {
        Self {
            paid_amount: 0,
            cash_amount_due: 0,
            is_deposit: self.is_deposit,
        }
    }
}

/// A session with its catalog references resolved.
struct PlannedSession {
    session: Session,
    service_id: i64,
    extra_services: Option<String>,
}

enum SessionResult {
    Created(Appointment),
    AlreadyProcessed,
    SlotTaken,
}

pub struct ConfirmationProcessor {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn PaymentGateway>,
    notifiers: Vec<Arc<dyn Notifier>>,
    gate: Mutex<()>,
}

impl ConfirmationProcessor {
    pub fn new(
        db: SqlitePool,
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            db,
            clock,
            gateway,
            notifiers,
            gate: Mutex::new(()),
        }
    }

    /// Webhook entry point. Anything other than a payment event is ignored
    /// without calling the provider.
    pub async fn handle_notification(
        &self,
        event_kind: Option<&str>,
        payment_id: Option<&str>,
    ) -> BookingResult<ConfirmationOutcome> {
        if !event_kind.is_some_and(|kind| kind.eq_ignore_ascii_case("payment")) {
            return Ok(ConfirmationOutcome::ignored(format!(
                "event type {:?} is not a payment",
                event_kind.unwrap_or("")
            )));
        }
        match payment_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self.on_payment_confirmed(id).await,
            None => Ok(ConfirmationOutcome::ignored("payment event without an id")),
        }
    }

    pub async fn on_payment_confirmed(
        &self,
        provider_payment_id: &str,
    ) -> BookingResult<ConfirmationOutcome> {
        let _serial = self.gate.lock().await;

        let payment = self.gateway.fetch_payment(provider_payment_id).await?;
        if !payment.is_approved() {
            tracing::info!(payment_id = provider_payment_id, status = %payment.status, "Payment not approved, ignoring");
            return Ok(ConfirmationOutcome::ignored(format!("status {}", payment.status)));
        }

        let booking = match BookingMetadata::from_provider(payment.metadata.as_ref()) {
            Ok(booking) => booking,
            Err(e) => {
                tracing::error!(payment_id = provider_payment_id, "Approved payment cannot be booked: {}", e);
                return Ok(ConfirmationOutcome::ignored(e.to_string()));
            }
        };

        catalog::branch_by_id(&self.db, booking.branch_id).await?;
        catalog::barber_by_id(&self.db, booking.barber_id).await?;
        let service = catalog::service_by_id(&self.db, booking.service_id).await?;
        let plans = self.plan(&booking).await?;

        let terms = PaymentTerms::from_metadata(&booking, service.price);
        // A replay that finds any session of this purchase already booked
        // must not attribute the amounts a second time, and joins the
        // group that delivery started.
        let earlier = self.earlier_booking(&booking, &plans).await?;
        let mut amounts_pending = earlier.is_none();
        let group_id = match earlier.and_then(|a| a.group_id) {
            Some(existing) => Some(existing),
            None => booking
                .is_multi_session()
                .then(|| Uuid::new_v4().to_string()),
        };

        let mut created = Vec::new();
        let mut already_processed = 0;
        let mut unplaced = 0;
        for plan in &plans {
            let session_terms = if amounts_pending { terms } else { terms.without_amounts() };
            match self
                .place(&booking, plan, session_terms, group_id.clone())
                .await?
            {
                SessionResult::Created(appointment) => {
                    amounts_pending = false;
                    created.push(appointment);
                }
                SessionResult::AlreadyProcessed => {
                    tracing::info!(
                        payment_id = provider_payment_id,
                        "Session {} {} already confirmed, skipping",
                        plan.session.date,
                        format_hhmm(plan.session.time)
                    );
                    already_processed += 1;
                }
                SessionResult::SlotTaken => {
                    tracing::error!(
                        payment_id = provider_payment_id,
                        barber_id = booking.barber_id,
                        "Paid session {} {} could not be placed, slot already taken",
                        plan.session.date,
                        format_hhmm(plan.session.time)
                    );
                    unplaced += 1;
                }
            }
        }

        if created.is_empty() {
            if unplaced == 0 && already_processed > 0 {
                return Ok(ConfirmationOutcome::AlreadyProcessed);
            }
            return Ok(ConfirmationOutcome::Unplaced { sessions: unplaced });
        }

        tracing::info!(
            payment_id = provider_payment_id,
            group_id = group_id.as_deref().unwrap_or("-"),
            "Payment confirmed {} appointment(s)",
            created.len()
        );
        self.notify(&created).await;

        Ok(ConfirmationOutcome::Created {
            appointment_ids: created.iter().map(|a| a.id).collect(),
            group_id,
            unplaced,
        })
    }

    async fn plan(&self, booking: &BookingMetadata) -> BookingResult<Vec<PlannedSession>> {
        let mut plans = Vec::with_capacity(booking.sessions.len());
        for session in &booking.sessions {
            let service_id = match session.service_id {
                Some(id) => catalog::service_by_id(&self.db, id).await?.id,
                None => booking.service_id,
            };
            let extras = catalog::services_by_ids(&self.db, &session.extra_service_ids).await?;
            plans.push(PlannedSession {
                session: session.clone(),
                service_id,
                extra_services: catalog::join_names(&extras),
            });
        }
        Ok(plans)
    }

    /// A session of this purchase confirmed by an earlier delivery, if any.
    async fn earlier_booking(
        &self,
        booking: &BookingMetadata,
        plans: &[PlannedSession],
    ) -> BookingResult<Option<Appointment>> {
        for plan in plans {
            let existing = appointments::at_slot(
                &self.db,
                booking.barber_id,
                plan.session.date,
                plan.session.time,
            )
            .await?;
            if let Some(found) = existing
                .into_iter()
                .find(|a| is_same_purchase(a, &booking.client.name))
            {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn place(
        &self,
        booking: &BookingMetadata,
        plan: &PlannedSession,
        terms: PaymentTerms,
        group_id: Option<String>,
    ) -> BookingResult<SessionResult> {
        let new = NewAppointment {
            client: booking.client.clone(),
            branch_id: booking.branch_id,
            barber_id: booking.barber_id,
            service_id: plan.service_id,
            extra_services: plan.extra_services.clone(),
            date: plan.session.date,
            time: plan.session.time,
            status: AppointmentStatus::Confirmed,
            payment_confirmed: true,
            paid_amount: terms.paid_amount,
            cash_amount_due: terms.cash_amount_due,
            is_deposit: terms.is_deposit,
            group_id,
            created_at: self.clock.now(),
        };

        let mut lock = SlotLock::acquire(&self.db).await?;
        let result: BookingResult<SessionResult> = async {
            let existing =
                appointments::at_slot(lock.conn(), new.barber_id, new.date, new.time).await?;
            if existing.iter().any(|a| is_same_purchase(a, &new.client.name)) {
                return Ok(SessionResult::AlreadyProcessed);
            }
            if existing.iter().any(Appointment::occupies_slot) {
                return Ok(SessionResult::SlotTaken);
            }
            Ok(SessionResult::Created(appointments::insert(lock.conn(), &new).await?))
        }
        .await;

        match result {
            Ok(SessionResult::Created(appointment)) => {
                lock.commit().await?;
                Ok(SessionResult::Created(appointment))
            }
            Ok(other) => {
                lock.rollback().await;
                Ok(other)
            }
            Err(e) => {
                lock.rollback().await;
                Err(e)
            }
        }
    }

    async fn notify(&self, created: &[Appointment]) {
        for notifier in &self.notifiers {
            if let Err(e) = notifier.appointments_confirmed(created).await {
                tracing::warn!(notifier = notifier.name(), "Confirmation notification failed: {}", e);
            }
        }
    }
}

fn is_same_purchase(existing: &Appointment, client_name: &str) -> bool {
    existing.status == AppointmentStatus::Confirmed
        && existing
            .client_name
            .trim()
            .eq_ignore_ascii_case(client_name.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::testing::*;
    use crate::error::BookingError;
    use crate::payment::gateway::GatewayPayment;
    use crate::payment::metadata::MetadataShape;
    use crate::models::ClientInfo;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── Fakes ──

    #[derive(Default)]
    struct FakeGateway {
        payments: std::sync::Mutex<HashMap<String, GatewayPayment>>,
        calls: AtomicUsize,
    }

    impl FakeGateway {
        fn with(id: &str, status: &str, metadata: Value) -> Arc<Self> {
            let gateway = Self::default();
            gateway.insert(id, status, metadata);
            Arc::new(gateway)
        }

        fn insert(&self, id: &str, status: &str, metadata: Value) {
            self.payments.lock().unwrap().insert(
                id.to_string(),
                GatewayPayment {
                    id: id.to_string(),
                    status: status.to_string(),
                    metadata: metadata.as_object().cloned(),
                },
            );
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn fetch_payment(&self, payment_id: &str) -> BookingResult<GatewayPayment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payments
                .lock()
                .unwrap()
                .get(payment_id)
                .cloned()
                .ok_or_else(|| BookingError::Integration("provider timeout".into()))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        batches: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn appointments_confirmed(&self, appointments: &[Appointment]) -> BookingResult<()> {
            self.batches.lock().unwrap().push(appointments.len());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn appointments_confirmed(&self, _: &[Appointment]) -> BookingResult<()> {
            Err(BookingError::Integration("whatsapp down".into()))
        }
    }

    fn processor(
        pool: &SqlitePool,
        gateway: Arc<dyn PaymentGateway>,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> ConfirmationProcessor {
        ConfirmationProcessor::new(
            pool.clone(),
            Arc::new(FixedClock::at("2030-06-01T12:00:00-03:00")),
            gateway,
            notifiers,
        )
    }

    fn single(extra: Value) -> Value {
        let mut base = json!({
            "branchId": BRANCH,
            "barberId": BARBER,
            "serviceId": HAIRCUT,
            "clientName": "Lucia Perez",
            "clientPhone": "+54911",
            "date": "2030-06-03",
            "time": "10:00"
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        base
    }

    fn three_sessions() -> Value {
        json!({
            "branch_id": BRANCH,
            "barber_id": BARBER,
            "service_id": HAIRCUT,
            "client_name": "Lucia Perez",
            "client_phone": "+54911",
            "total_amount": 300,
            "sessions": [
                {"date": "2030-06-03", "time": "10:00", "extraServiceIds": [BEARD]},
                {"date": "2030-06-10", "time": "10:00"},
                {"date": "2030-06-17", "time": "10:00"}
            ]
        })
    }

    async fn all(pool: &SqlitePool) -> Vec<Appointment> {
        sqlx::query_as::<_, Appointment>("SELECT * FROM appointments ORDER BY id")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    // ── Amounts ──

    fn booking(deposit: bool, total: Option<i64>, unit: Option<i64>) -> BookingMetadata {
        BookingMetadata {
            branch_id: 1,
            barber_id: 1,
            service_id: 1,
            client: ClientInfo { name: "A".into(), phone: "1".into(), age: None },
            deposit,
            total_amount: total,
            unit_price: unit,
            shape: MetadataShape::LegacySingle,
            sessions: Vec::new(),
        }
    }

    #[test]
    fn test_payment_terms_precedence() {
        let terms = PaymentTerms::from_metadata(&booking(false, Some(900), Some(700)), 1000);
        assert_eq!((terms.paid_amount, terms.cash_amount_due), (700, 0));

        let terms = PaymentTerms::from_metadata(&booking(false, Some(900), None), 1000);
        assert_eq!((terms.paid_amount, terms.cash_amount_due), (900, 0));

        let terms = PaymentTerms::from_metadata(&booking(false, None, None), 1000);
        assert_eq!((terms.paid_amount, terms.cash_amount_due), (1000, 0));
    }

    #[test]
    fn test_deposit_halves_rounding_up() {
        let terms = PaymentTerms::from_metadata(&booking(true, Some(1000), None), 0);
        assert_eq!((terms.paid_amount, terms.cash_amount_due, terms.is_deposit), (500, 500, true));

        let terms = PaymentTerms::from_metadata(&booking(true, Some(301), None), 0);
        assert_eq!((terms.paid_amount, terms.cash_amount_due), (151, 150));

        let terms = PaymentTerms::from_metadata(&booking(true, Some(1000), Some(400)), 0);
        assert_eq!((terms.paid_amount, terms.cash_amount_due), (400, 600));

        let terms = PaymentTerms::from_metadata(&booking(true, None, None), 800);
        assert_eq!((terms.paid_amount, terms.cash_amount_due), (800, 0));
    }

    // ── Processing ──

    #[tokio::test]
    async fn test_single_session_is_confirmed() {
        let pool = memory_pool().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let gateway = FakeGateway::with("101", "approved", single(json!({ "unitPrice": "750" })));
        let processor = processor(&pool, gateway, vec![notifier.clone() as Arc<dyn Notifier>]);

        let outcome = processor.on_payment_confirmed("101").await.unwrap();
        let ConfirmationOutcome::Created { appointment_ids, group_id, unplaced } = outcome else {
            panic!("expected creation, got {outcome:?}");
        };
        assert_eq!(appointment_ids.len(), 1);
        assert_eq!(group_id, None);
        assert_eq!(unplaced, 0);

        let rows = all(&pool).await;
        assert_eq!(rows[0].status, AppointmentStatus::Confirmed);
        assert!(rows[0].payment_confirmed);
        assert_eq!(rows[0].paid_amount, 750);
        assert_eq!(*notifier.batches.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_replay_creates_nothing() {
        let pool = memory_pool().await;
        let gateway = FakeGateway::with("102", "approved", single(json!({})));
        let processor = processor(&pool, gateway, vec![]);

        processor.on_payment_confirmed("102").await.unwrap();
        let second = processor.on_payment_confirmed("102").await.unwrap();
        assert_eq!(second, ConfirmationOutcome::AlreadyProcessed);
        assert_eq!(all(&pool).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_create_one_appointment() {
        let pool = memory_pool().await;
        let gateway = FakeGateway::with("103", "approved", single(json!({})));
        let processor = Arc::new(processor(&pool, gateway, vec![]));

        let a = tokio::spawn({
            let p = processor.clone();
            async move { p.on_payment_confirmed("103").await }
        });
        let b = tokio::spawn({
            let p = processor.clone();
            async move { p.on_payment_confirmed("103").await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(all(&pool).await.len(), 1);
    }

    #[tokio::test]
    async fn test_non_approved_and_non_payment_events_are_ignored() {
        let pool = memory_pool().await;
        let gateway = FakeGateway::with("104", "pending", single(json!({})));
        let processor = processor(&pool, gateway.clone(), vec![]);

        let outcome = processor.handle_notification(Some("payment"), Some("104")).await.unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Ignored { .. }));

        let outcome = processor
            .handle_notification(Some("merchant_order"), Some("104"))
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Ignored { .. }));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);

        let outcome = processor.handle_notification(Some("payment"), Some(" ")).await.unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Ignored { .. }));
        assert!(all(&pool).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_metadata_books_nothing() {
        let pool = memory_pool().await;
        let gateway = FakeGateway::with("105", "approved", Value::Null);
        let outcome = processor(&pool, gateway, vec![])
            .on_payment_confirmed("105")
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Ignored { .. }));
        assert!(all(&pool).await.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_is_retryable() {
        let pool = memory_pool().await;
        let gateway = Arc::new(FakeGateway::default());
        let err = processor(&pool, gateway, vec![])
            .on_payment_confirmed("999")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_taken_slot_is_left_unplaced() {
        let pool = memory_pool().await;
        add_appointment(&pool, "2030-06-03", "10:00", "BLOCKED", false).await;
        let gateway = FakeGateway::with("106", "approved", single(json!({})));

        let outcome = processor(&pool, gateway, vec![])
            .on_payment_confirmed("106")
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmationOutcome::Unplaced { sessions: 1 });
        assert_eq!(all(&pool).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unpaid_hold_does_not_block_confirmation() {
        let pool = memory_pool().await;
        add_appointment(&pool, "2030-06-03", "10:00", "AWAITING_PAYMENT", false).await;
        let gateway = FakeGateway::with("107", "approved", single(json!({})));

        let outcome = processor(&pool, gateway, vec![])
            .on_payment_confirmed("107")
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn test_group_amount_lands_on_one_appointment() {
        let pool = memory_pool().await;
        let gateway = FakeGateway::with("108", "approved", three_sessions());
        let outcome = processor(&pool, gateway, vec![])
            .on_payment_confirmed("108")
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Created { ref appointment_ids, .. } if appointment_ids.len() == 3));

        let rows = all(&pool).await;
        let amounts: Vec<i64> = rows.iter().map(|a| a.paid_amount).collect();
        assert_eq!(amounts, vec![300, 0, 0]);
        assert!(rows[0].group_id.is_some());
        assert!(rows.iter().all(|a| a.group_id == rows[0].group_id));
        assert_eq!(rows[0].extra_services.as_deref(), Some("Beard"));
        assert_eq!(rows[1].extra_services, None);
    }

    #[tokio::test]
    async fn test_group_skips_taken_sessions() {
        let pool = memory_pool().await;
        add_appointment(&pool, "2030-06-03", "10:00", "CONFIRMED", true).await;
        let gateway = FakeGateway::with("109", "approved", three_sessions());

        let outcome = processor(&pool, gateway, vec![])
            .on_payment_confirmed("109")
            .await
            .unwrap();
        let ConfirmationOutcome::Created { appointment_ids, unplaced, .. } = outcome else {
            panic!("expected creation");
        };
        assert_eq!(appointment_ids.len(), 2);
        assert_eq!(unplaced, 1);

        let first = appointments::by_id(&pool, appointment_ids[0]).await.unwrap();
        let second = appointments::by_id(&pool, appointment_ids[1]).await.unwrap();
        assert_eq!((first.paid_amount, second.paid_amount), (300, 0));
    }

    #[tokio::test]
    async fn test_group_replay_is_a_no_op() {
        let pool = memory_pool().await;
        let gateway = FakeGateway::with("110", "approved", three_sessions());
        let processor = processor(&pool, gateway, vec![]);

        processor.on_payment_confirmed("110").await.unwrap();
        let again = processor.on_payment_confirmed("110").await.unwrap();
        assert_eq!(again, ConfirmationOutcome::AlreadyProcessed);

        let total: i64 = all(&pool).await.iter().map(|a| a.paid_amount).sum();
        assert_eq!(total, 300);
    }

    #[tokio::test]
    async fn test_partial_replay_does_not_count_money_twice() {
        let pool = memory_pool().await;
        let gateway = FakeGateway::with("111", "approved", three_sessions());
        let processor = processor(&pool, gateway, vec![]);
        processor.on_payment_confirmed("111").await.unwrap();

        // Lose the last session, as if the first delivery died half way.
        sqlx::query("DELETE FROM appointments WHERE date = '2030-06-17'")
            .execute(&pool)
            .await
            .unwrap();

        let outcome = processor.on_payment_confirmed("111").await.unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Created { ref appointment_ids, .. } if appointment_ids.len() == 1));
        let rows = all(&pool).await;
        let total: i64 = rows.iter().map(|a| a.paid_amount).sum();
        assert_eq!(total, 300);

        let mut groups: Vec<_> = rows.iter().map(|a| a.group_id.clone()).collect();
        groups.dedup();
        assert_eq!(rows.len(), 3);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].is_some());
    }

    #[tokio::test]
    async fn test_checkout_metadata_books_every_session() {
        let pool = memory_pool().await;
        let metadata = json!({
            "sucursalId": BRANCH, "barberoId": BARBER, "tipoCorteId": HAIRCUT,
            "clienteNombre": "Ana", "clienteTelefono": "+54911",
            "senia": true, "montoTotal": 2000, "unitPriceUsado": 1000,
            "sesiones": "[{\"fecha\":\"2030-06-03\",\"hora\":\"10:00\",\"adicionalesIds\":[2]},{\"fecha\":\"2030-06-10\",\"hora\":\"10:00\"}]"
        });
        let gateway = FakeGateway::with("120", "approved", metadata);
        let outcome = processor(&pool, gateway, vec![])
            .on_payment_confirmed("120")
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Created { ref appointment_ids, .. } if appointment_ids.len() == 2));

        let rows = all(&pool).await;
        assert_eq!(rows[0].extra_services.as_deref(), Some("Beard"));
        assert_eq!((rows[0].paid_amount, rows[0].cash_amount_due), (1000, 1000));
        assert!(rows.iter().all(|a| a.is_deposit && a.payment_confirmed));
        assert_eq!(rows[0].group_id, rows[1].group_id);
    }

    #[tokio::test]
    async fn test_legacy_slot_service_override() {
        let pool = memory_pool().await;
        let metadata = json!({
            "branchId": BRANCH, "barberId": BARBER, "serviceId": HAIRCUT, "clientName": "Ana",
            "slots": "[{\"date\":\"2030-06-03\",\"time\":\"09:00\",\"serviceId\":2},{\"date\":\"2030-06-04\",\"time\":\"09:00\"}]"
        });
        let gateway = FakeGateway::with("112", "approved", metadata);
        processor(&pool, gateway, vec![])
            .on_payment_confirmed("112")
            .await
            .unwrap();

        let rows = all(&pool).await;
        assert_eq!(rows[0].service_id, BEARD);
        assert_eq!(rows[1].service_id, HAIRCUT);
        // No amounts in metadata: the outer service price is charged once.
        assert_eq!((rows[0].paid_amount, rows[1].paid_amount), (1000, 0));
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_the_booking() {
        let pool = memory_pool().await;
        let recorder = Arc::new(RecordingNotifier::default());
        let gateway = FakeGateway::with("113", "approved", single(json!({})));
        let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(FailingNotifier), recorder.clone() as Arc<dyn Notifier>];

        let outcome = processor(&pool, gateway, notifiers)
            .on_payment_confirmed("113")
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmationOutcome::Created { .. }));
        assert_eq!(all(&pool).await.len(), 1);
        assert_eq!(recorder.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_barber_is_not_found() {
        let pool = memory_pool().await;
        let gateway = FakeGateway::with("114", "approved", single(json!({ "barberId": 77 })));
        let err = processor(&pool, gateway, vec![])
            .on_payment_confirmed("114")
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound { entity: "barber", .. }));
        assert!(!err.is_retryable());
    }
}
