//! Builders shared by unit and integration tests.

use printforge_auth::{AuthContext, Role};
use printforge_core::{Money, UserId};
use printforge_orders::{NewOrderItem, OnDemandSpec};
use printforge_printing::{BuildVolume, Material, ModelValidationResult, NewPrinter, PrintSettings};

use crate::sync::engine::NewOrder;

pub fn customer(id: UserId) -> AuthContext {
    AuthContext::for_user(id, vec![Role::CUSTOMER])
}

pub fn operator() -> AuthContext {
    AuthContext::for_user(UserId::new(), vec![Role::OPERATOR])
}

pub fn admin() -> AuthContext {
    AuthContext::for_user(UserId::new(), vec![Role::ADMIN])
}

/// On-demand line with a valid 50mm cube model.
pub fn printed_item(material: Option<Material>) -> NewOrderItem {
    NewOrderItem {
        product_name: "Custom bracket".to_string(),
        quantity: 1,
        unit_price: Money::from_cents(2_500),
        on_demand: Some(OnDemandSpec {
            settings: PrintSettings {
                material,
                ..PrintSettings::default()
            },
            model: Some(ModelValidationResult::valid(
                "bracket.stl",
                Some(BuildVolume::new(50.0, 50.0, 50.0)),
            )),
            priority: None,
        }),
    }
}

pub fn stock_item() -> NewOrderItem {
    NewOrderItem {
        product_name: "Filament sample pack".to_string(),
        quantity: 2,
        unit_price: Money::from_cents(900),
        on_demand: None,
    }
}

pub fn new_order(customer_id: UserId, items: Vec<NewOrderItem>) -> NewOrder {
    NewOrder {
        customer_id,
        items,
        discount: Money::ZERO,
        shipping: Money::from_cents(500),
        payment_method: "card".to_string(),
        notes: None,
    }
}

pub fn new_printer(name: &str, materials: Vec<Material>) -> NewPrinter {
    NewPrinter {
        name: name.to_string(),
        model: "MK4".to_string(),
        materials,
        build_volume: BuildVolume::new(250.0, 210.0, 220.0),
    }
}
