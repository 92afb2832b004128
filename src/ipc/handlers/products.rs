use super::transactions::checked_payment;
use crate::finance::{self, Category, FinanceError, TransactionKind};
use crate::ipc::error::err;
use crate::ipc::helpers::{
    bad_params, db_conn, db_err, finance_err, fmt_date, new_id, not_found, now_ts, opt_bool,
    opt_money, opt_str, required_date, required_money, required_str, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub cost: Option<Decimal>,
    pub stock: i64,
    pub active: bool,
}

fn product_from_row(r: &rusqlite::Row) -> rusqlite::Result<Product> {
    Ok(Product {
        id: r.get(0)?,
        name: r.get(1)?,
        price: finance::from_db(r.get(2)?),
        cost: r.get::<_, Option<f64>>(3)?.map(finance::from_db),
        stock: r.get(4)?,
        active: r.get::<_, i64>(5)? != 0,
    })
}

fn get_product(conn: &Connection, id: &str) -> rusqlite::Result<Option<Product>> {
    conn.query_row(
        "SELECT id, name, price, cost, stock, active FROM products WHERE id = ?",
        [id],
        product_from_row,
    )
    .optional()
}

struct ProductDraft {
    name: String,
    price: Decimal,
    cost: Option<Decimal>,
    stock: i64,
    active: bool,
}

fn parse_draft(req: &Request) -> Result<ProductDraft, serde_json::Value> {
    let stock = match req.params.get("stock") {
        None | Some(serde_json::Value::Null) => 0,
        Some(v) => v
            .as_i64()
            .filter(|n| *n >= 0)
            .ok_or_else(|| bad_params(req, "stock must be a non-negative integer"))?,
    };
    Ok(ProductDraft {
        name: required_str(req, "name")?,
        price: required_money(req, "price")?,
        cost: opt_money(req, "cost")?,
        stock,
        active: opt_bool(req, "active", true)?,
    })
}

fn handle_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let active_only = opt_bool(req, "activeOnly", false)?;
    let sql = if active_only {
        "SELECT id, name, price, cost, stock, active FROM products
         WHERE active = 1 ORDER BY name COLLATE NOCASE"
    } else {
        "SELECT id, name, price, cost, stock, active FROM products ORDER BY name COLLATE NOCASE"
    };
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    let rows = stmt
        .query_map([], product_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    Ok(json!({ "products": rows }))
}

fn handle_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let d = parse_draft(req)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO products(id, name, price, cost, stock, active) VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            &d.name,
            finance::to_db(d.price),
            d.cost.map(finance::to_db),
            d.stock,
            d.active as i64,
        ),
    )
    .map_err(|e| db_err(req, "db_insert_failed", e))?;
    Ok(json!({ "productId": id }))
}

fn handle_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let d = parse_draft(req)?;
    let n = conn
        .execute(
            "UPDATE products SET name = ?, price = ?, cost = ?, stock = ?, active = ? WHERE id = ?",
            (
                &d.name,
                finance::to_db(d.price),
                d.cost.map(finance::to_db),
                d.stock,
                d.active as i64,
                &id,
            ),
        )
        .map_err(|e| db_err(req, "db_update_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "product"));
    }
    Ok(json!({ "ok": true }))
}

/// Past sale lines keep the product id.
fn handle_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let n = conn
        .execute("DELETE FROM products WHERE id = ?", [&id])
        .map_err(|e| db_err(req, "db_delete_failed", e))?;
    if n == 0 {
        return Err(not_found(req, "product"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_adjust_stock(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let id = required_str(req, "id")?;
    let Some(delta) = req.params.get("delta").and_then(|v| v.as_i64()) else {
        return Err(bad_params(req, "delta must be an integer"));
    };
    let product = get_product(conn, &id)
        .map_err(|e| db_err(req, "db_query_failed", e))?
        .ok_or_else(|| not_found(req, "product"))?;
    let Some(stock) = product.stock.checked_add(delta) else {
        return Err(bad_params(req, "delta is out of range"));
    };
    if stock < 0 {
        return Err(err(
            &req.id,
            "insufficient_stock",
            format!("{} has only {} in stock", product.name, product.stock),
            Some(json!({ "productId": product.id, "stock": product.stock })),
        ));
    }
    conn.execute("UPDATE products SET stock = ? WHERE id = ?", (stock, &id))
        .map_err(|e| db_err(req, "db_update_failed", e))?;
    Ok(json!({ "stock": stock }))
}

struct SaleLine {
    product: Product,
    quantity: i64,
}

fn parse_sale_lines(conn: &Connection, req: &Request) -> Result<Vec<SaleLine>, serde_json::Value> {
    let Some(items) = req.params.get("items").and_then(|v| v.as_array()) else {
        return Err(bad_params(req, "items must be an array"));
    };
    if items.is_empty() {
        return Err(bad_params(req, "a sale needs at least one item"));
    }
    let mut lines: Vec<SaleLine> = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(product_id) = item.get("productId").and_then(|v| v.as_str()) else {
            return Err(bad_params(req, format!("items[{}].productId is required", i)));
        };
        let Some(quantity) = item.get("quantity").and_then(|v| v.as_i64()).filter(|q| *q > 0) else {
            return Err(bad_params(
                req,
                format!("items[{}].quantity must be a positive integer", i),
            ));
        };
        let product = get_product(conn, product_id)
            .map_err(|e| db_err(req, "db_query_failed", e))?
            .filter(|p| p.active)
            .ok_or_else(|| not_found(req, "product"))?;
        // The same product listed twice draws from one stock.
        if let Some(existing) = lines.iter_mut().find(|l| l.product.id == product.id) {
            existing.quantity = existing
                .quantity
                .checked_add(quantity)
                .ok_or_else(|| bad_params(req, format!("items[{}].quantity is out of range", i)))?;
        } else {
            lines.push(SaleLine { product, quantity });
        }
    }
    if let Some(short) = lines.iter().find(|l| l.quantity > l.product.stock) {
        return Err(err(
            &req.id,
            "insufficient_stock",
            format!(
                "{} has only {} in stock",
                short.product.name, short.product.stock
            ),
            Some(json!({
                "productId": short.product.id,
                "stock": short.product.stock,
                "requested": short.quantity,
            })),
        ));
    }
    Ok(lines)
}

/// Stock, the store income and the sale lines are written together or not at all.
fn handle_sell(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let lines = parse_sale_lines(conn, req)?;
    let date = required_date(req, "date")?;
    let student_id = opt_str(req, "studentId")?;
    let line_totals = lines
        .iter()
        .map(|l| l.product.price.checked_mul(Decimal::from(l.quantity)))
        .collect::<Option<Vec<Decimal>>>()
        .ok_or_else(|| finance_err(req, FinanceError::Overflow))?;
    let total = finance::checked_sum(line_totals)
        .map(finance::round_money)
        .map_err(|e| finance_err(req, e))?;
    if total > finance::money_ceiling() {
        return Err(finance_err(req, FinanceError::AmountTooLarge("sale total".to_string())));
    }
    let payment = checked_payment(conn, req, total)?;
    let description = lines
        .iter()
        .map(|l| format!("{}x {}", l.quantity, l.product.name))
        .collect::<Vec<_>>()
        .join(", ");

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| db_err(req, "db_insert_failed", e))?;
    let transaction_id = new_id();
    let payment_json = serde_json::to_string(&payment)
        .map_err(|e| db_err(req, "db_insert_failed", e))?;
    tx.execute(
        "INSERT INTO transactions(id, kind, amount, category, date, description, lesson_type_id,
                                  student_id, payment_json, created_at)
         VALUES(?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)",
        rusqlite::params![
            transaction_id,
            TransactionKind::Income.as_str(),
            finance::to_db(total),
            Category::Store.as_str(),
            fmt_date(date),
            description,
            student_id,
            payment_json,
            now_ts(),
        ],
    )
    .map_err(|e| db_err(req, "db_insert_failed", e))?;
    for line in &lines {
        // Guarded update: a concurrent change that drained the stock fails the sale.
        let n = tx
            .execute(
                "UPDATE products SET stock = stock - ?1 WHERE id = ?2 AND stock >= ?1",
                (line.quantity, &line.product.id),
            )
            .map_err(|e| db_err(req, "db_update_failed", e))?;
        if n == 0 {
            return Err(err(
                &req.id,
                "insufficient_stock",
                format!("{} is out of stock", line.product.name),
                Some(json!({ "productId": line.product.id })),
            ));
        }
        tx.execute(
            "INSERT INTO sale_items(id, transaction_id, product_id, quantity, unit_price)
             VALUES(?, ?, ?, ?, ?)",
            (
                new_id(),
                &transaction_id,
                &line.product.id,
                line.quantity,
                finance::to_db(line.product.price),
            ),
        )
        .map_err(|e| db_err(req, "db_insert_failed", e))?;
    }
    tx.commit()
        .map_err(|e| db_err(req, "db_insert_failed", e))?;
    tracing::info!(
        transaction_id = %transaction_id,
        items = lines.len(),
        total = %total,
        deferred = payment.is_deferred(),
        "sale recorded"
    );
    Ok(json!({ "transactionId": transaction_id, "total": total }))
}

fn handle_sale_items(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state, req)?;
    let transaction_id = required_str(req, "transactionId")?;
    let mut stmt = conn
        .prepare(
            "SELECT si.id, si.product_id, p.name, si.quantity, si.unit_price
             FROM sale_items si LEFT JOIN products p ON p.id = si.product_id
             WHERE si.transaction_id = ?
             ORDER BY p.name COLLATE NOCASE",
        )
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    let items = stmt
        .query_map([&transaction_id], |r| {
            let quantity: i64 = r.get(3)?;
            let unit_price = finance::from_db(r.get(4)?);
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "productId": r.get::<_, String>(1)?,
                "productName": r.get::<_, Option<String>>(2)?,
                "quantity": quantity,
                "unitPrice": unit_price,
                "lineTotal": unit_price.checked_mul(Decimal::from(quantity)),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_err(req, "db_query_failed", e))?;
    Ok(json!({ "items": items }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "products.list" => handle_list(state, req),
        "products.create" => handle_create(state, req),
        "products.update" => handle_update(state, req),
        "products.delete" => handle_delete(state, req),
        "products.adjustStock" => handle_adjust_stock(state, req),
        "pos.sell" => handle_sell(state, req),
        "pos.saleItems" => handle_sale_items(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
