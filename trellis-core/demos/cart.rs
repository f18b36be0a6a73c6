//! Shopping cart demo.
//!
//! A cart held in one cell, with item count, subtotal, a bulk discount and
//! the final total derived from it, and an effect that prints a summary
//! whenever any of those change.
//!
//! Run with `cargo run --example cart`.

use std::rc::Rc;

use trellis_core::{Cell, Derivation, Effect, Equality, EvalResult};

/// Carts with at least this many units get the discount.
const BULK_UNITS: u32 = 5;
/// Discount in percent.
const BULK_DISCOUNT: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
struct CartItem {
    id: u32,
    name: String,
    /// Unit price in cents.
    price: u64,
    quantity: u32,
}

type Items = Rc<[CartItem]>;

struct Cart {
    items: Cell<Items>,
    total_items: Derivation<u32>,
    total_price: Derivation<u64>,
    discount: Derivation<u64>,
    final_total: Derivation<u64>,
    next_id: std::cell::Cell<u32>,
}

impl Cart {
    fn new() -> Self {
        // The list is always replaced wholesale, so compare by allocation.
        let items: Cell<Items> =
            Cell::with_equality(Rc::from(Vec::new()), Equality::identity()).labeled("cart_items");

        let total_items = Derivation::new({
            let items = items.clone();
            move || Ok(items.with(|items| items.iter().map(|item| item.quantity).sum()))
        })
        .labeled("total_items");

        let total_price = Derivation::new({
            let items = items.clone();
            move || {
                Ok(items.with(|items| {
                    items
                        .iter()
                        .map(|item| item.price * u64::from(item.quantity))
                        .sum()
                }))
            }
        })
        .labeled("total_price");

        let discount = Derivation::new({
            let (total_items, total_price) = (total_items.clone(), total_price.clone());
            move || {
                let total = total_price.get()?;
                Ok(if total_items.get()? >= BULK_UNITS {
                    total * BULK_DISCOUNT / 100
                } else {
                    0
                })
            }
        })
        .labeled("discount");

        let final_total = Derivation::new({
            let (total_price, discount) = (total_price.clone(), discount.clone());
            move || Ok(total_price.get()? - discount.get()?)
        })
        .labeled("final_total");

        Self {
            items,
            total_items,
            total_price,
            discount,
            final_total,
            next_id: std::cell::Cell::new(1),
        }
    }

    fn add_item(&self, name: &str, price: u64) -> EvalResult<u32> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(0);
        }
        let id = self.next_id.replace(self.next_id.get() + 1);
        let item = CartItem {
            id,
            name: name.to_owned(),
            price,
            quantity: 1,
        };
        self.items.update(|items| items.iter().cloned().chain([item]).collect())?;
        Ok(id)
    }

    fn update_quantity(&self, id: u32, quantity: u32) -> EvalResult<()> {
        if quantity < 1 {
            return Ok(());
        }
        self.items.update(|items| {
            items
                .iter()
                .map(|item| {
                    if item.id == id {
                        CartItem {
                            quantity,
                            ..item.clone()
                        }
                    } else {
                        item.clone()
                    }
                })
                .collect()
        })
    }

    fn remove_item(&self, id: u32) -> EvalResult<()> {
        self.items
            .update(|items| items.iter().filter(|item| item.id != id).cloned().collect())
    }
}

fn dollars(cents: u64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}

fn main() -> EvalResult<()> {
    let cart = Cart::new();

    let _summary = Effect::labeled("cart_summary", {
        let items = cart.items.clone();
        let total_items = cart.total_items.clone();
        let final_total = cart.final_total.clone();
        move || {
            let names: Vec<String> = items.with(|items| {
                items
                    .iter()
                    .map(|item| format!("{} x{}", item.name, item.quantity))
                    .collect()
            });
            println!(
                "cart updated: {} items, total {} [{}]",
                total_items.get()?,
                dollars(final_total.get()?),
                names.join(", ")
            );
            Ok(())
        }
    })?;

    let coffee = cart.add_item("Coffee beans", 1499)?;
    let mug = cart.add_item("Mug", 899)?;
    cart.add_item("   ", 100)?;
    cart.update_quantity(coffee, 4)?;

    println!(
        "subtotal {}, discount {}",
        dollars(cart.total_price.get()?),
        dollars(cart.discount.get()?)
    );

    cart.remove_item(coffee)?;
    cart.update_quantity(mug, 0)?;

    Ok(())
}
