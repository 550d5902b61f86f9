//! Cross-component scenarios: engine, registry, stores, dispatcher and gateway.
//!
//! Verifies:
//! - The stored order status always equals a fresh derivation
//! - Cascades write one status update per changed entity, atomically
//! - Printer exclusivity holds under concurrent assignment
//! - Status polling enforces limits, ownership and sanitization

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::{Duration, Utc};

    use printforge_auth::{ApiKeyVerifier, AuthContext, HmacCsrfTokens};
    use printforge_core::{Money, OrderId, PrintJobId, PrinterId, UserId};
    use printforge_events::{EventBus, InMemoryEventBus};
    use printforge_orders::{Order, OrderStatus, PaymentStatus};
    use printforge_printing::{JobStatus, Material, PrintJob, Printer};

    use crate::audit::{StatusUpdate, Subject};
    use crate::config::{DispatcherConfig, RateLimitConfig};
    use crate::gateway::{
        AsyncStatusGateway, FixedWindowRateLimiter, GatewayError, InMemoryProcessTokenStore,
        ProcessTokens, RequestMethod, StatusRequest, UrlSigner,
    };
    use crate::notifications::{InMemoryNotificationStore, NotificationDispatcher, NotificationType};
    use crate::registry::AssignmentError;
    use crate::store::{
        ChangeSet, InMemorySyncStore, JobFilter, OrderStore, PrintJobStore, PrinterStore,
        StatusUpdateLog, StoreError, SyncStore,
    };
    use crate::sync::{SyncEngine, SyncError, SyncEvent};
    use crate::test_support::{admin, customer, new_order, new_printer, operator, printed_item, stock_item};

    type Bus = Arc<InMemoryEventBus<SyncEvent>>;

    /// Delegates to an in-memory store; commits fail while `fail_commits` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemorySyncStore,
        fail_commits: AtomicBool,
    }

    impl OrderStore for FlakyStore {
        fn get_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
            self.inner.get_order(id)
        }

        fn order_number_exists(&self, number: &str) -> Result<bool, StoreError> {
            self.inner.order_number_exists(number)
        }
    }

    impl PrintJobStore for FlakyStore {
        fn get_job(&self, id: PrintJobId) -> Result<Option<PrintJob>, StoreError> {
            self.inner.get_job(id)
        }

        fn jobs_for_order(&self, order_id: OrderId) -> Result<Vec<PrintJob>, StoreError> {
            self.inner.jobs_for_order(order_id)
        }

        fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<PrintJob>, StoreError> {
            self.inner.list_jobs(filter)
        }
    }

    impl PrinterStore for FlakyStore {
        fn get_printer(&self, id: PrinterId) -> Result<Option<Printer>, StoreError> {
            self.inner.get_printer(id)
        }

        fn list_printers(&self) -> Result<Vec<Printer>, StoreError> {
            self.inner.list_printers()
        }
    }

    impl StatusUpdateLog for FlakyStore {
        fn updates_for_order(&self, order_id: OrderId) -> Result<Vec<StatusUpdate>, StoreError> {
            self.inner.updates_for_order(order_id)
        }
    }

    impl SyncStore for FlakyStore {
        fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("connection reset by peer".to_string()));
            }
            self.inner.commit(changes)
        }
    }

    fn engine_on(store: Arc<dyn SyncStore>) -> SyncEngine<Bus> {
        SyncEngine::new(store, Arc::new(InMemoryEventBus::<SyncEvent>::new()))
    }

    fn engine() -> SyncEngine<Bus> {
        engine_on(Arc::new(InMemorySyncStore::new()))
    }

    /// Place an order with `printed` on-demand items for a fresh customer.
    fn place(engine: &SyncEngine<Bus>, printed: usize) -> (OrderId, Vec<PrintJobId>, UserId) {
        let customer_id = UserId::new();
        let mut items = vec![stock_item()];
        items.extend((0..printed).map(|_| printed_item(Some(Material::Pla))));
        let view = engine
            .create_order(new_order(customer_id, items), &customer(customer_id))
            .unwrap();
        let jobs = view.jobs.iter().map(PrintJob::id_typed).collect();
        (view.order.id_typed(), jobs, customer_id)
    }

    fn pay(engine: &SyncEngine<Bus>, order_id: OrderId) -> Order {
        engine
            .apply_payment_status(order_id, "approved", &operator())
            .unwrap()
    }

    fn move_job(engine: &SyncEngine<Bus>, job_id: PrintJobId, to: JobStatus) -> PrintJob {
        engine
            .apply_job_status_change(job_id, to, None, None, &operator())
            .unwrap()
    }

    fn timeline(engine: &SyncEngine<Bus>, order_id: OrderId) -> Vec<StatusUpdate> {
        engine.order_timeline(order_id, &operator()).unwrap()
    }

    fn assert_consistent(engine: &SyncEngine<Bus>, order_id: OrderId) {
        let stored = engine.get_order(order_id, &operator()).unwrap().order.status();
        assert_eq!(engine.get_aggregate_order_status(order_id).unwrap(), stored);
    }

    #[test]
    fn full_success_path() {
        let engine = engine();
        let ops = operator();
        let printer = engine
            .registry()
            .register_printer(new_printer("Bay 1", vec![Material::Pla]), &ops)
            .unwrap();
        let (order_id, jobs, _) = place(&engine, 1);
        let job_id = jobs[0];
        assert_eq!(engine.get_aggregate_order_status(order_id).unwrap(), OrderStatus::Pending);
        assert!(timeline(&engine, order_id).is_empty());

        let order = pay(&engine, order_id);
        assert_eq!(order.status(), OrderStatus::Processing);
        assert_eq!(order.payment_status(), PaymentStatus::Confirmed);
        assert_consistent(&engine, order_id);

        let summary = engine.add_all_items_to_queue(order_id, &ops).unwrap();
        assert!(summary.created.is_empty());
        assert_eq!(summary.assigned.len(), 1);
        assert_eq!(summary.assigned[0].printer_id, printer.id_typed());

        move_job(&engine, job_id, JobStatus::Printing);
        assert_eq!(
            engine.get_aggregate_order_status(order_id).unwrap(),
            OrderStatus::InProduction
        );
        engine.report_progress(job_id, 50, &ops).unwrap();
        assert_consistent(&engine, order_id);

        let done = move_job(&engine, job_id, JobStatus::Completed);
        assert_eq!(done.progress(), 100);
        assert_consistent(&engine, order_id);
        assert_eq!(
            engine.get_order(order_id, &ops).unwrap().order.status(),
            OrderStatus::Completed
        );

        let freed = engine.registry().get_printer(printer.id_typed(), &ops).unwrap();
        assert_eq!(freed.current_job(), None);

        let transitions: Vec<(String, String)> = timeline(&engine, order_id)
            .into_iter()
            .map(|u| (u.old_status, u.new_status))
            .collect();
        let pairs = |a: &str, b: &str| (a.to_string(), b.to_string());
        assert_eq!(
            transitions,
            vec![
                pairs("pending", "preparing"),
                pairs("pending", "processing"),
                pairs("preparing", "printing"),
                pairs("processing", "in_production"),
                pairs("printing", "completed"),
                pairs("in_production", "completed"),
            ]
        );
    }

    #[test]
    fn cancelling_an_order_cascades_to_every_active_job() {
        let engine = engine();
        let (order_id, jobs, _) = place(&engine, 3);
        pay(&engine, order_id);
        let before = timeline(&engine, order_id).len();

        let order = engine
            .apply_order_status_change(
                order_id,
                OrderStatus::Cancelled,
                Some("customer changed mind".to_string()),
                &operator(),
            )
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);

        let updates = timeline(&engine, order_id);
        let cascade = &updates[before..];
        assert_eq!(cascade.len(), 4);
        assert_eq!(cascade.last().unwrap().subject, Subject::Order(order_id));
        assert!(cascade.iter().all(|u| u.new_status == "cancelled"));

        let view = engine.get_order(order_id, &operator()).unwrap();
        for job in &view.jobs {
            assert!(jobs.contains(&job.id_typed()));
            assert_eq!(job.status(), JobStatus::Cancelled);
            assert!(job.notes().iter().any(|n| n.text.contains("customer changed mind")));
        }
        assert_consistent(&engine, order_id);
    }

    #[test]
    fn completed_next_to_cancelled_flags_a_discrepancy() {
        let engine = engine();
        let (order_id, jobs, _) = place(&engine, 2);
        pay(&engine, order_id);

        move_job(&engine, jobs[0], JobStatus::Printing);
        move_job(&engine, jobs[0], JobStatus::Completed);
        move_job(&engine, jobs[1], JobStatus::Cancelled);

        let order = engine.get_order(order_id, &operator()).unwrap().order;
        assert_eq!(order.status(), OrderStatus::InProduction);
        assert!(order.has_discrepancy());
        assert_consistent(&engine, order_id);
    }

    #[test]
    fn repeated_requests_write_nothing() {
        let engine = engine();
        let (order_id, jobs, _) = place(&engine, 2);
        pay(&engine, order_id);
        move_job(&engine, jobs[0], JobStatus::Printing);
        let before = timeline(&engine, order_id).len();

        move_job(&engine, jobs[0], JobStatus::Printing);
        pay(&engine, order_id);
        assert_eq!(timeline(&engine, order_id).len(), before);

        let cancel = || {
            engine
                .apply_order_status_change(order_id, OrderStatus::Cancelled, None, &operator())
                .unwrap()
        };
        cancel();
        let after_cancel = timeline(&engine, order_id).len();
        cancel();
        assert_eq!(timeline(&engine, order_id).len(), after_cancel);
    }

    #[test]
    fn progress_never_goes_backwards() {
        let engine = engine();
        let (order_id, jobs, _) = place(&engine, 1);
        pay(&engine, order_id);
        move_job(&engine, jobs[0], JobStatus::Printing);
        engine.report_progress(jobs[0], 60, &operator()).unwrap();

        let err = engine.report_progress(jobs[0], 40, &operator()).unwrap_err();
        assert_eq!(
            err,
            SyncError::ProgressRegression {
                current: 60,
                attempted: 40
            }
        );
        assert_eq!(engine.get_job(jobs[0], &operator()).unwrap().progress(), 60);
    }

    #[test]
    fn scheduling_and_material_usage_are_recorded_without_status_updates() {
        let engine = engine();
        let (order_id, jobs, _) = place(&engine, 1);
        pay(&engine, order_id);
        let before = timeline(&engine, order_id).len();

        let start = Utc::now() + Duration::hours(2);
        let job = engine.schedule_job(jobs[0], start, &operator()).unwrap();
        assert_eq!(job.scheduled_start_time(), Some(start));
        assert_eq!(timeline(&engine, order_id).len(), before);

        move_job(&engine, jobs[0], JobStatus::Printing);
        let printing = timeline(&engine, order_id).len();
        match engine.schedule_job(jobs[0], start, &operator()).unwrap_err() {
            SyncError::Validation(msg) if msg.contains("started printing") => {}
            other => panic!("Expected Validation once printing, got {other:?}"),
        }

        match engine.record_material_used(jobs[0], -1.0, &operator()).unwrap_err() {
            SyncError::Validation(_) => {}
            other => panic!("Expected Validation for negative grams, got {other:?}"),
        }
        let job = engine.record_material_used(jobs[0], 42.5, &operator()).unwrap();
        assert_eq!(job.material_used_grams(), Some(42.5));

        assert_eq!(timeline(&engine, order_id).len(), printing);
    }

    #[test]
    fn failed_job_needs_a_reason_and_can_be_requeued() {
        let engine = engine();
        let (order_id, jobs, _) = place(&engine, 1);
        pay(&engine, order_id);
        move_job(&engine, jobs[0], JobStatus::Printing);

        let err = engine
            .apply_job_status_change(jobs[0], JobStatus::Failed, None, None, &operator())
            .unwrap_err();
        assert_eq!(err, SyncError::MissingRequiredField("failure_reason"));

        engine
            .apply_job_status_change(
                jobs[0],
                JobStatus::Failed,
                None,
                Some("layer shift".to_string()),
                &operator(),
            )
            .unwrap();
        assert_eq!(
            engine.get_aggregate_order_status(order_id).unwrap(),
            OrderStatus::Failed
        );

        let retry = engine.requeue_failed_job(jobs[0], &operator()).unwrap();
        assert_eq!(retry.status(), JobStatus::Preparing);
        assert!(engine.get_job(jobs[0], &operator()).unwrap().is_superseded());
        assert_eq!(
            engine.get_order(order_id, &operator()).unwrap().order.status(),
            OrderStatus::Processing
        );
        assert_consistent(&engine, order_id);

        match engine.requeue_failed_job(jobs[0], &operator()).unwrap_err() {
            SyncError::InvalidTransition { .. } => {}
            _ => panic!("Expected InvalidTransition for a superseded job"),
        }
    }

    #[test]
    fn unpaid_jobs_cannot_start() {
        let engine = engine();
        let (_, jobs, _) = place(&engine, 1);
        let err = engine
            .apply_job_status_change(jobs[0], JobStatus::Preparing, None, None, &operator())
            .unwrap_err();
        match err {
            SyncError::InvalidTransition { subject, .. } if subject == "print job" => {}
            _ => panic!("Expected InvalidTransition"),
        }
    }

    #[test]
    fn concurrent_assignment_leaves_one_winner() {
        let engine = Arc::new(engine());
        let ops = operator();
        let printer = engine
            .registry()
            .register_printer(new_printer("Shared", vec![Material::Pla]), &ops)
            .unwrap()
            .id_typed();
        let (a, jobs_a, _) = place(&engine, 1);
        let (b, jobs_b, _) = place(&engine, 1);
        pay(&engine, a);
        pay(&engine, b);

        let handles: Vec<_> = [jobs_a[0], jobs_b[0]]
            .into_iter()
            .map(|job| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    engine
                        .registry()
                        .assign_printer(job, printer, &AuthContext::system())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let busy = results.iter().filter_map(|r| r.as_ref().err()).next().unwrap();
        match busy {
            AssignmentError::PrinterBusy { printer: p, .. } if *p == printer => {}
            other => panic!("Expected PrinterBusy, got {other:?}"),
        }
    }

    #[test]
    fn failed_commit_leaves_no_trace() {
        let store = Arc::new(FlakyStore::default());
        let engine = engine_on(store.clone());
        let (order_id, _, _) = place(&engine, 3);
        pay(&engine, order_id);
        let before = timeline(&engine, order_id);
        let view_before = engine.get_order(order_id, &operator()).unwrap();

        store.fail_commits.store(true, Ordering::SeqCst);
        let err = engine
            .apply_order_status_change(order_id, OrderStatus::Cancelled, None, &operator())
            .unwrap_err();
        match err {
            SyncError::PersistenceFailure(_) => {}
            _ => panic!("Expected PersistenceFailure"),
        }
        store.fail_commits.store(false, Ordering::SeqCst);

        assert_eq!(timeline(&engine, order_id), before);
        assert_eq!(engine.get_order(order_id, &operator()).unwrap(), view_before);
    }

    #[test]
    fn override_pins_status_until_cleared() {
        let engine = engine();
        let (order_id, _, _) = place(&engine, 1);
        pay(&engine, order_id);

        match engine
            .override_order_status(order_id, OrderStatus::Disputed, "chargeback".into(), &operator())
            .unwrap_err()
        {
            SyncError::Forbidden(_) => {}
            _ => panic!("Expected Forbidden for operators"),
        }

        let pinned = engine
            .override_order_status(order_id, OrderStatus::Disputed, "chargeback".into(), &admin())
            .unwrap();
        assert_eq!(pinned.status(), OrderStatus::Disputed);
        assert_consistent(&engine, order_id);

        let cleared = engine.clear_order_override(order_id, &admin()).unwrap();
        assert_eq!(cleared.status(), OrderStatus::Processing);
        assert_consistent(&engine, order_id);
    }

    #[test]
    fn customers_see_only_their_own_orders() {
        let engine = engine();
        let (order_id, _, owner) = place(&engine, 1);
        engine.get_order(order_id, &customer(owner)).unwrap();
        match engine.get_order(order_id, &customer(UserId::new())).unwrap_err() {
            SyncError::Forbidden(_) => {}
            _ => panic!("Expected Forbidden"),
        }
    }

    #[test]
    fn overflowing_checkout_totals_are_rejected() {
        let engine = engine();
        let customer_id = UserId::new();
        let mut item = stock_item();
        item.unit_price = "79228162514264337593543950335".parse::<Money>().unwrap();

        let err = engine
            .create_order(new_order(customer_id, vec![item]), &customer(customer_id))
            .unwrap_err();
        match err {
            SyncError::Validation(msg) if msg.contains("out of range") => {}
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn committed_transitions_become_customer_notifications() {
        let sync = Arc::new(InMemorySyncStore::new());
        let engine = engine_on(sync.clone());
        let subscription = engine.bus().subscribe();
        let (order_id, jobs, owner) = place(&engine, 1);
        pay(&engine, order_id);
        move_job(&engine, jobs[0], JobStatus::Printing);
        engine
            .apply_job_status_change(
                jobs[0],
                JobStatus::Failed,
                None,
                Some("nozzle clog".to_string()),
                &operator(),
            )
            .unwrap();

        let notifications = Arc::new(InMemoryNotificationStore::new());
        let tokens = ProcessTokens::new(Arc::new(InMemoryProcessTokenStore::new()), Duration::hours(72));
        let job_token = tokens
            .issue(owner, Subject::PrintJob(jobs[0]), Utc::now())
            .unwrap();
        let dispatcher = NotificationDispatcher::new(
            notifications.clone(),
            notifications.clone(),
            tokens,
            sync,
            ApiKeyVerifier::new(None),
            Arc::new(HmacCsrfTokens::new("csrf", Duration::hours(1))),
            DispatcherConfig::default(),
        );

        let created: Vec<_> = subscription
            .drain()
            .iter()
            .filter_map(|event| dispatcher.handle_sync_event(event).unwrap())
            .collect();
        assert!(created.iter().all(|n| n.user_id == owner));

        let failed = created
            .iter()
            .find(|n| n.notification_type == NotificationType::ProcessFailed)
            .unwrap();
        assert_eq!(failed.message, "Your print job failed: nozzle clog");
        assert_eq!(failed.process_token.as_deref(), Some(job_token.token.as_str()));
        assert_eq!(notifications.notification_count(), created.len());
    }

    struct Polling {
        engine: SyncEngine<Bus>,
        gateway: AsyncStatusGateway,
        tokens: ProcessTokens,
    }

    fn polling() -> Polling {
        let sync: Arc<InMemorySyncStore> = Arc::new(InMemorySyncStore::new());
        let engine = engine_on(sync.clone());
        let tokens = ProcessTokens::new(Arc::new(InMemoryProcessTokenStore::new()), Duration::hours(72));
        let csrf = Arc::new(HmacCsrfTokens::new("csrf", Duration::hours(1)));
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            notifications.clone(),
            notifications,
            tokens.clone(),
            sync.clone(),
            ApiKeyVerifier::new(None),
            csrf.clone(),
            DispatcherConfig::default(),
        ));
        let gateway = AsyncStatusGateway::new(
            Arc::new(FixedWindowRateLimiter::new(RateLimitConfig {
                max: 10,
                window: std::time::Duration::from_secs(60),
            })),
            csrf,
            tokens.clone(),
            sync,
            UrlSigner::new("url-secret", Duration::seconds(900)),
            dispatcher,
        );
        Polling {
            engine,
            gateway,
            tokens,
        }
    }

    fn get<'a>(token: &'a str, client: &'a str) -> StatusRequest<'a> {
        StatusRequest {
            process_token: token,
            method: RequestMethod::Get,
            csrf_token: None,
            client_key: client,
        }
    }

    #[test]
    fn status_checks_are_rate_limited_per_client() {
        let p = polling();
        let (order_id, _, owner) = place(&p.engine, 1);
        let token = p.tokens.issue(owner, Subject::Order(order_id), Utc::now()).unwrap().token;
        let auth = customer(owner);

        for _ in 0..10 {
            p.gateway.check_status(get(&token, "203.0.113.7"), &auth).unwrap();
        }
        match p.gateway.check_status(get(&token, "203.0.113.7"), &auth).unwrap_err() {
            GatewayError::RateLimited(_) => {}
            _ => panic!("Expected RateLimited on the 11th call"),
        }
        p.gateway.check_status(get(&token, "198.51.100.2"), &auth).unwrap();
    }

    #[test]
    fn status_checks_enforce_format_and_ownership() {
        let p = polling();
        let (order_id, _, owner) = place(&p.engine, 1);
        let token = p.tokens.issue(owner, Subject::Order(order_id), Utc::now()).unwrap().token;

        assert_eq!(
            p.gateway.check_status(get("not-a-token", "c"), &customer(owner)).unwrap_err(),
            GatewayError::InvalidToken
        );
        assert_eq!(
            p.gateway.check_status(get(&token, "c"), &customer(UserId::new())).unwrap_err(),
            GatewayError::Forbidden
        );
        let unknown = "Q".repeat(32);
        assert_eq!(
            p.gateway.check_status(get(&unknown, "c"), &customer(owner)).unwrap_err(),
            GatewayError::Forbidden
        );

        let post = StatusRequest {
            method: RequestMethod::Post,
            ..get(&token, "c")
        };
        match p.gateway.check_status(post, &customer(owner)).unwrap_err() {
            GatewayError::Csrf(_) => {}
            _ => panic!("Expected Csrf for POST without a token"),
        }
    }

    #[test]
    fn completed_jobs_carry_a_signed_download_link() {
        let p = polling();
        let (order_id, jobs, owner) = place(&p.engine, 1);
        let token = p.tokens.issue(owner, Subject::PrintJob(jobs[0]), Utc::now()).unwrap().token;

        let pending = p.gateway.check_status(get(&token, "c"), &customer(owner)).unwrap();
        assert_eq!(pending.status, "pending");
        assert_eq!(pending.progress, Some(0));
        assert!(pending.download_url.is_none());

        pay(&p.engine, order_id);
        move_job(&p.engine, jobs[0], JobStatus::Printing);
        move_job(&p.engine, jobs[0], JobStatus::Completed);

        let done = p.gateway.check_status(get(&token, "c"), &customer(owner)).unwrap();
        assert_eq!(done.status, "completed");
        let url = done.download_url.as_deref().unwrap();
        assert!(url.starts_with(&format!("/downloads/{token}?expires=")));

        let body = serde_json::to_value(&done).unwrap();
        assert_eq!(body.as_object().unwrap().len(), 3);
    }
}
