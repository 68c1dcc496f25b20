// Grocery store: catalogue items and a shopping cart

use crate::document::{Document, OnDelete, Relation};
use crate::error::{Refusal, Result, ValidationError};
use crate::record::Amount;
use crate::store::{Removal, Store};
use crate::views;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const STORAGE_KEY: &str = "grocery_app";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    pub name: String,
    /// Entered as free text; stored values may be strings
    #[serde(default)]
    pub price: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    pub item_id: String,
    /// Stored values may be strings or junk; those read as 0
    #[serde(default, deserialize_with = "crate::record::coerce_count")]
    pub quantity: u32,
}

crate::impl_record!(Item, "items", append);
crate::impl_record!(CartLine, "cart", append);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroceryDocument {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub cart: Vec<CartLine>,
}

crate::impl_holds!(GroceryDocument { Item => items, CartLine => cart });

impl Document for GroceryDocument {
    fn storage_key() -> &'static str {
        STORAGE_KEY
    }

    fn collections() -> &'static [&'static str] {
        &["items", "cart"]
    }

    fn seed() -> Self {
        Self::default()
    }

    fn relations() -> Vec<Relation<Self>> {
        vec![Relation::new::<Item, CartLine>(OnDelete::Cascade, |l| l.item_id.as_str())]
    }
}

pub type GroceryStore = Store<GroceryDocument>;

pub fn add_item(store: &mut GroceryStore, name: &str, price: f64) -> Result<Item> {
    let name = super::required("item name", name)?;
    let price = Amount::new(price);
    if price.value() < 0.0 {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            expected: "zero or more".to_string(),
        }
        .into());
    }
    let item = Item {
        id: String::new(),
        created_at: DateTime::default(),
        name,
        price,
    };
    store.insert_checked(item, &views::unique_name::<Item>(|i| i.name.as_str()))
}

/// Put `quantity` of an item in the cart, topping up an existing line
pub fn add_to_cart(store: &mut GroceryStore, item_id: &str, quantity: u32) -> Result<CartLine> {
    if quantity == 0 {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            expected: "at least 1".to_string(),
        }
        .into());
    }
    if store.get::<Item>(item_id).is_none() {
        return Err(Refusal::Unavailable {
            collection: "items".to_string(),
            id: item_id.to_string(),
            reason: "not found".to_string(),
        }
        .into());
    }

    let existing = store.find::<CartLine>(|l| l.item_id == item_id).map(|l| l.id.clone());
    if let Some(line_id) = existing
        && let Some(line) = store.update_with::<CartLine>(&line_id, |l| l.quantity = l.quantity.saturating_add(quantity))?
    {
        return Ok(line);
    }

    store.insert(CartLine {
        id: String::new(),
        created_at: DateTime::default(),
        item_id: item_id.to_string(),
        quantity,
    })
}

/// Set a cart line's quantity; zero removes the line
pub fn set_quantity(store: &mut GroceryStore, line_id: &str, quantity: u32) -> Result<Option<CartLine>> {
    if quantity == 0 {
        let removed = store.remove::<CartLine>(line_id, None)?;
        return Ok(removed.map(|r| r.record));
    }
    store.update_with::<CartLine>(line_id, |l| l.quantity = quantity)
}

/// Delete an item; its cart lines go with it
pub fn delete_item(store: &mut GroceryStore, id: &str) -> Result<Option<Removal<Item>>> {
    store.remove::<Item>(id, None)
}

/// Empty the cart, keeping the catalogue
pub fn clear_cart(store: &mut GroceryStore) -> Result<usize> {
    store.transact(|doc| {
        let cleared = doc.cart.len();
        doc.cart.clear();
        Ok(cleared)
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartRow {
    pub line_id: String,
    pub item: String,
    pub unit_price: f64,
    pub quantity: u32,
    pub line_total: f64,
}

/// Cart lines with item names and prices; removed items show as "Unknown"
/// with no price
pub fn cart_lines(doc: &GroceryDocument) -> Vec<CartRow> {
    doc.cart
        .iter()
        .map(|line| {
            let item = views::resolve(&doc.items, &line.item_id);
            let unit_price = item.map_or(0.0, |i| i.price.value());
            CartRow {
                line_id: line.id.clone(),
                item: item.map_or(views::UNKNOWN, |i| i.name.as_str()).to_string(),
                unit_price,
                quantity: line.quantity,
                line_total: unit_price * f64::from(line.quantity),
            }
        })
        .collect()
}

pub fn cart_total(doc: &GroceryDocument) -> f64 {
    cart_lines(doc).iter().map(|r| r.line_total).sum()
}

pub fn search_items<'a>(doc: &'a GroceryDocument, query: &str) -> Vec<&'a Item> {
    views::search(&doc.items, query, |i| i.name.as_str())
}
