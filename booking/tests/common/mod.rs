//! Shared harness: a coordinator wired to in-memory fakes.

#![allow(dead_code, clippy::unwrap_used)]

use chrono::{NaiveDate, NaiveTime, Weekday};
use fieldbook::config::{BookingConfig, PaymentConfig, SweeperConfig};
use fieldbook::{Collaborators, ReservationCoordinator, ReservationRequest};
use fieldbook_core::types::{
    BookingOwner, GuestContact, Money, Multiplier, OperatingHours, PaymentMethod, PricingRule,
    PricingRuleId, Principal, Resource, ResourceId, ResourceStatus, ResourceType, ResourceTypeId,
    Role, Slot, UserId,
};
use fieldbook_testing::{
    InMemoryBookingStore, ManualClock, RecordingNotifier, ScriptedGateway, SequentialCodes,
    StaticCatalog, StaticIdentity, test_clock,
};
use std::sync::Arc;

/// Wednesday; the test clock sits on the day before
pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

pub fn at(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn slot(start: (u32, u32), end: (u32, u32)) -> Slot {
    Slot::new(day(), at(start.0, start.1), at(end.0, end.1))
}

pub fn guest() -> BookingOwner {
    BookingOwner::Guest {
        contact: GuestContact {
            name: "Tran Minh".to_string(),
            phone: "0901234567".to_string(),
            email: None,
        },
    }
}

pub fn customer() -> Principal {
    Principal {
        user_id: UserId::new(),
        role: Role::Customer,
    }
}

pub fn staff() -> StaticIdentity {
    StaticIdentity::with_role(Role::Staff)
}

pub struct Harness {
    pub clock: ManualClock,
    pub store: Arc<InMemoryBookingStore>,
    pub catalog: Arc<StaticCatalog>,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: Arc<ScriptedGateway>,
    pub coordinator: Arc<ReservationCoordinator>,
    pub resource_id: ResourceId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_booking_config(BookingConfig::default())
    }

    pub fn with_booking_config(booking: BookingConfig) -> Self {
        fieldbook_testing::init_test_tracing();

        let clock = test_clock();
        let type_id = ResourceTypeId::new();
        let resource_id = ResourceId::new();
        let catalog = Arc::new(
            StaticCatalog::new()
                .with_type(ResourceType {
                    id: type_id,
                    name: "7-a-side pitch".to_string(),
                    base_price_per_hour: Money::from_minor(200_000),
                })
                .with_resource(Resource {
                    id: resource_id,
                    resource_type_id: type_id,
                    name: "Pitch A".to_string(),
                    hours: OperatingHours::new(at(6, 0), at(23, 0)),
                    status: ResourceStatus::Active,
                })
                .with_rule(PricingRule {
                    id: PricingRuleId::new(),
                    resource_type_id: type_id,
                    day_of_week: Weekday::Wed,
                    start: at(17, 0),
                    end: at(22, 0),
                    price_per_hour: Money::from_minor(300_000),
                    peak: true,
                    peak_multiplier: Multiplier::from_basis_points(15_000),
                    effective_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    effective_to: None,
                }),
        );
        let store = Arc::new(InMemoryBookingStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let gateway = Arc::new(ScriptedGateway::new());

        let payment = PaymentConfig {
            gateway_timeout_ms: 500,
            gateway_retries: 0,
            gateway_backoff_ms: 1,
            schedule_expiry_timers: false,
            ..PaymentConfig::default()
        };
        let coordinator = ReservationCoordinator::new(
            Collaborators {
                store: store.clone(),
                catalog: catalog.clone(),
                notifier: notifier.clone(),
                gateway: gateway.clone(),
                codes: Arc::new(SequentialCodes::new()),
                clock: Arc::new(clock.clone()),
            },
            booking,
            &payment,
            &SweeperConfig::default(),
        );

        Self {
            clock,
            store,
            catalog,
            notifier,
            gateway,
            coordinator: Arc::new(coordinator),
            resource_id,
        }
    }

    pub fn request(&self, slot: Slot, method: PaymentMethod) -> ReservationRequest {
        ReservationRequest {
            resource_id: self.resource_id,
            slot,
            owner: guest(),
            payment_method: method,
            note: None,
        }
    }

    pub fn request_for(&self, owner: &Principal, slot: Slot, method: PaymentMethod) -> ReservationRequest {
        ReservationRequest {
            owner: BookingOwner::Registered {
                user_id: owner.user_id,
            },
            ..self.request(slot, method)
        }
    }
}
