//! SQLite implementation of the key-value store client.
//!
//! # Responsibility
//! - Persist items as one `kv_items` row plus one `kv_attributes` row per
//!   attribute.
//! - Run each `transact` call inside one IMMEDIATE SQLite transaction,
//!   evaluating preconditions against the state seen inside it.
//!
//! # Invariants
//! - Any failure before `COMMIT` rolls back every operation of the call.
//! - The key attribute is always stored and always matches `item_key`.
//! - Reads and preconditions only resolve a key whose attribute is the one
//!   stored for the item; any other attribute is an invalid request.
//! - Batched reads never issue more than `page_size` keys per query and
//!   never retry a page more than `max_attempts` times.

use crate::config::{BatchGetOptions, MAX_BATCH_PAGE_SIZE};
use crate::store::{
    AttributeValue, Item, Key, KeyValueStore, StoreError, StoreResult, UpdateAction, WriteOp,
    MAX_TRANSACTION_OPS,
};
use log::{debug, error, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

const REQUIRED_TABLES: [&str; 2] = ["kv_items", "kv_attributes"];

/// Key-value store backed by a migrated SQLite connection.
pub struct SqliteKvStore<'conn> {
    conn: &'conn Connection,
    batch: BatchGetOptions,
}

impl<'conn> SqliteKvStore<'conn> {
    /// Wraps a connection returned by `open_store_db*`.
    ///
    /// Fails when the store tables are missing, the page size is outside
    /// `1..=MAX_BATCH_PAGE_SIZE`, or no attempts are allowed.
    pub fn try_new(conn: &'conn Connection, batch: BatchGetOptions) -> StoreResult<Self> {
        if batch.page_size == 0 || batch.page_size > MAX_BATCH_PAGE_SIZE {
            return Err(StoreError::InvalidRequest(format!(
                "batch page size must be between 1 and {MAX_BATCH_PAGE_SIZE}, got {}",
                batch.page_size
            )));
        }
        if batch.max_attempts == 0 {
            return Err(StoreError::InvalidRequest(
                "batch max attempts must be positive".to_string(),
            ));
        }
        for table in REQUIRED_TABLES {
            if !table_exists(conn, table)? {
                return Err(StoreError::MissingRequiredTable(table));
            }
        }
        Ok(Self { conn, batch })
    }

    fn read_page_with_retry(
        &self,
        table: &str,
        page: &[Key],
        page_index: usize,
    ) -> StoreResult<Vec<Item>> {
        let mut attempt: u32 = 1;
        loop {
            match read_page(self.conn, table, page) {
                Err(StoreError::Db(err)) if err.is_busy() => {
                    if attempt >= self.batch.max_attempts {
                        error!(
                            "event=kv_batch_get module=store status=error page={page_index} attempts={attempt} error_code=throttled"
                        );
                        return Err(StoreError::Throttled { attempts: attempt });
                    }
                    warn!(
                        "event=kv_batch_get module=store status=retry page={page_index} attempt={attempt} error={err}"
                    );
                    std::thread::sleep(self.batch.backoff * attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn run_transaction(&self, ops: &[WriteOp]) -> StoreResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        for (index, op) in ops.iter().enumerate() {
            let current = load_item(&tx, op.table(), op.key())?;
            if let Some(condition) = op.condition() {
                if !condition.holds(current.as_ref()) {
                    return Err(StoreError::ConstraintViolation {
                        index,
                        table: op.table().to_string(),
                    });
                }
            }
            apply_op(&tx, op)?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl KeyValueStore for SqliteKvStore<'_> {
    fn get_item(&self, table: &str, key: &Key) -> StoreResult<Option<Item>> {
        load_item(self.conn, table, key)
    }

    fn batch_get_items(&self, table: &str, keys: &[Key]) -> StoreResult<Vec<Item>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut seen = BTreeSet::new();
        if !keys.iter().all(|key| seen.insert(key.value.as_str())) {
            return Err(StoreError::InvalidRequest(
                "batch get request contains duplicate keys".to_string(),
            ));
        }

        let started_at = Instant::now();
        let mut items = Vec::with_capacity(keys.len());
        let mut pages = 0usize;
        for (page_index, page) in keys.chunks(self.batch.page_size).enumerate() {
            items.extend(self.read_page_with_retry(table, page, page_index)?);
            pages += 1;
        }

        debug!(
            "event=kv_batch_get module=store status=ok keys={} found={} pages={pages} duration_ms={}",
            keys.len(),
            items.len(),
            started_at.elapsed().as_millis()
        );
        Ok(items)
    }

    fn transact(&self, ops: &[WriteOp]) -> StoreResult<()> {
        validate_request(ops)?;

        let started_at = Instant::now();
        let result = self.run_transaction(ops);
        match &result {
            Ok(()) => debug!(
                "event=kv_transact module=store status=ok ops={} duration_ms={}",
                ops.len(),
                started_at.elapsed().as_millis()
            ),
            Err(StoreError::ConstraintViolation { index, table }) => debug!(
                "event=kv_transact module=store status=condition_failed ops={} index={index} table={table}",
                ops.len()
            ),
            Err(err) => error!(
                "event=kv_transact module=store status=error ops={} duration_ms={} error={err}",
                ops.len(),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }
}

fn validate_request(ops: &[WriteOp]) -> StoreResult<()> {
    if ops.is_empty() {
        return Err(StoreError::InvalidRequest(
            "transaction has no operations".to_string(),
        ));
    }
    if ops.len() > MAX_TRANSACTION_OPS {
        return Err(StoreError::InvalidRequest(format!(
            "transaction has {} operations, limit is {MAX_TRANSACTION_OPS}",
            ops.len()
        )));
    }

    let mut targets = BTreeSet::new();
    for (index, op) in ops.iter().enumerate() {
        let key = op.key();
        if key.attribute.is_empty() || key.value.is_empty() {
            return Err(StoreError::InvalidRequest(format!(
                "operation {index} has an empty key"
            )));
        }
        if !targets.insert((op.table(), key.value.as_str())) {
            return Err(StoreError::InvalidRequest(format!(
                "operation {index} targets an item already used in this transaction"
            )));
        }

        match op {
            WriteOp::Put { item, .. } => {
                if let Some(value) = item.get(&key.attribute) {
                    if value.as_text() != Some(key.value.as_str()) {
                        return Err(StoreError::InvalidRequest(format!(
                            "operation {index} puts an item whose key attribute disagrees with its key"
                        )));
                    }
                }
            }
            WriteOp::Update { actions, .. } => {
                if actions.is_empty() {
                    return Err(StoreError::InvalidRequest(format!(
                        "operation {index} is an update without actions"
                    )));
                }
                let mut touched = BTreeSet::new();
                for action in actions {
                    if action.attribute() == key.attribute {
                        return Err(StoreError::InvalidRequest(format!(
                            "operation {index} updates key attribute `{}`",
                            key.attribute
                        )));
                    }
                    if !touched.insert(action.attribute()) {
                        return Err(StoreError::InvalidRequest(format!(
                            "operation {index} touches attribute `{}` twice",
                            action.attribute()
                        )));
                    }
                }
            }
            WriteOp::Delete { .. } => {}
        }
    }
    Ok(())
}

fn apply_op(conn: &Connection, op: &WriteOp) -> StoreResult<()> {
    match op {
        WriteOp::Put {
            table, key, item, ..
        } => {
            ensure_item_row(conn, table, key)?;
            conn.execute(
                "DELETE FROM kv_attributes WHERE table_name = ?1 AND item_key = ?2;",
                params![table, key.value],
            )?;
            write_attribute(
                conn,
                table,
                &key.value,
                &key.attribute,
                &AttributeValue::Text(key.value.clone()),
            )?;
            for (name, value) in item.iter().filter(|(name, _)| **name != key.attribute) {
                write_attribute(conn, table, &key.value, name, value)?;
            }
        }
        WriteOp::Update {
            table,
            key,
            actions,
            ..
        } => {
            ensure_item_row(conn, table, key)?;
            for action in actions {
                match action {
                    UpdateAction::Set(name, value) => {
                        write_attribute(conn, table, &key.value, name, value)?;
                    }
                    UpdateAction::Remove(name) => {
                        conn.execute(
                            "DELETE FROM kv_attributes
                             WHERE table_name = ?1 AND item_key = ?2 AND name = ?3;",
                            params![table, key.value, name],
                        )?;
                    }
                }
            }
        }
        WriteOp::Delete { table, key, .. } => {
            conn.execute(
                "DELETE FROM kv_items WHERE table_name = ?1 AND item_key = ?2;",
                params![table, key.value],
            )?;
        }
    }
    Ok(())
}

fn ensure_item_row(conn: &Connection, table: &str, key: &Key) -> StoreResult<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO kv_items (table_name, item_key) VALUES (?1, ?2);",
        params![table, key.value],
    )?;
    if inserted == 1 {
        write_attribute(
            conn,
            table,
            &key.value,
            &key.attribute,
            &AttributeValue::Text(key.value.clone()),
        )?;
    }
    Ok(())
}

fn write_attribute(
    conn: &Connection,
    table: &str,
    item_key: &str,
    name: &str,
    value: &AttributeValue,
) -> StoreResult<()> {
    let (kind, text_value, blob_value): (&str, Option<&str>, Option<&[u8]>) = match value {
        AttributeValue::Text(text) => ("S", Some(text.as_str()), None),
        AttributeValue::Bytes(bytes) => ("B", None, Some(bytes.as_slice())),
    };
    conn.execute(
        "INSERT INTO kv_attributes (table_name, item_key, name, kind, text_value, blob_value)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (table_name, item_key, name) DO UPDATE SET
            kind = excluded.kind,
            text_value = excluded.text_value,
            blob_value = excluded.blob_value;",
        params![table, item_key, name, kind, text_value, blob_value],
    )?;
    Ok(())
}

fn load_item(conn: &Connection, table: &str, key: &Key) -> StoreResult<Option<Item>> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM kv_items WHERE table_name = ?1 AND item_key = ?2
        );",
        params![table, key.value],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Ok(None);
    }

    let mut stmt = conn.prepare(
        "SELECT name, kind, text_value, blob_value
         FROM kv_attributes
         WHERE table_name = ?1 AND item_key = ?2;",
    )?;
    let mut rows = stmt.query(params![table, key.value])?;
    let mut item = Item::new();
    while let Some(row) = rows.next()? {
        let (name, value) = parse_attribute_row(row)?;
        item.insert(name, value);
    }
    ensure_key_attribute(table, key, &item)?;
    Ok(Some(item))
}

fn read_page(conn: &Connection, table: &str, page: &[Key]) -> StoreResult<Vec<Item>> {
    let placeholders = vec!["?"; page.len()].join(", ");
    let sql = format!(
        "SELECT item_key, name, kind, text_value, blob_value
         FROM kv_attributes
         WHERE table_name = ? AND item_key IN ({placeholders});"
    );
    let mut bind_values = Vec::with_capacity(page.len() + 1);
    bind_values.push(Value::Text(table.to_string()));
    bind_values.extend(page.iter().map(|key| Value::Text(key.value.clone())));

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut grouped: BTreeMap<String, Item> = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let item_key: String = row.get("item_key")?;
        let (name, value) = parse_attribute_row(row)?;
        grouped.entry(item_key).or_default().insert(name, value);
    }
    for key in page {
        if let Some(item) = grouped.get(&key.value) {
            ensure_key_attribute(table, key, item)?;
        }
    }
    Ok(grouped.into_values().collect())
}

/// Rejects a key whose attribute is not the one identifying items of `table`.
fn ensure_key_attribute(table: &str, key: &Key, item: &Item) -> StoreResult<()> {
    match item.get(&key.attribute).and_then(AttributeValue::as_text) {
        Some(value) if value == key.value => Ok(()),
        _ => Err(StoreError::InvalidRequest(format!(
            "key attribute `{}` does not identify items of table `{table}`",
            key.attribute
        ))),
    }
}

fn parse_attribute_row(row: &Row<'_>) -> StoreResult<(String, AttributeValue)> {
    let name: String = row.get("name")?;
    let kind: String = row.get("kind")?;
    let value = match kind.as_str() {
        "S" => row
            .get::<_, Option<String>>("text_value")?
            .map(AttributeValue::Text),
        "B" => row
            .get::<_, Option<Vec<u8>>>("blob_value")?
            .map(AttributeValue::Bytes),
        other => {
            return Err(StoreError::InvalidItem(format!(
                "attribute `{name}` has unknown kind `{other}`"
            )));
        }
    };
    let value = value.ok_or_else(|| {
        StoreError::InvalidItem(format!("attribute `{name}` of kind `{kind}` has no value"))
    })?;
    Ok((name, value))
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

#[cfg(test)]
mod tests {
    use super::validate_request;
    use crate::store::{AttributeValue, Item, Key, StoreError, UpdateAction, WriteOp};

    fn update(actions: Vec<UpdateAction>) -> WriteOp {
        WriteOp::Update {
            table: "users".to_string(),
            key: Key::new("Username", "jake"),
            actions,
            condition: None,
        }
    }

    #[test]
    fn rejects_empty_and_keyless_requests() {
        assert!(matches!(
            validate_request(&[]),
            Err(StoreError::InvalidRequest(_))
        ));

        let keyless = WriteOp::Delete {
            table: "users".to_string(),
            key: Key::new("Username", ""),
            condition: None,
        };
        assert!(matches!(
            validate_request(&[keyless]),
            Err(StoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rejects_updates_without_actions_or_touching_the_key() {
        assert!(validate_request(&[update(Vec::new())]).is_err());
        assert!(validate_request(&[update(vec![UpdateAction::Remove(
            "Username".to_string()
        )])])
        .is_err());
        assert!(validate_request(&[update(vec![
            UpdateAction::Remove("Bio".to_string()),
            UpdateAction::Set("Bio".to_string(), AttributeValue::Text("x".to_string())),
        ])])
        .is_err());
        assert!(validate_request(&[update(vec![UpdateAction::Remove("Bio".to_string())])]).is_ok());
    }

    #[test]
    fn rejects_two_operations_on_one_item() {
        let delete = WriteOp::Delete {
            table: "users".to_string(),
            key: Key::new("Username", "jake"),
            condition: None,
        };
        let set_bio = update(vec![UpdateAction::Set(
            "Bio".to_string(),
            AttributeValue::Text("x".to_string()),
        )]);
        assert!(validate_request(&[set_bio, delete]).is_err());
    }

    #[test]
    fn rejects_put_with_mismatched_key_attribute() {
        let mut item = Item::new();
        item.insert(
            "Username".to_string(),
            AttributeValue::Text("someone-else".to_string()),
        );
        let put = WriteOp::Put {
            table: "users".to_string(),
            key: Key::new("Username", "jake"),
            item,
            condition: None,
        };
        assert!(validate_request(&[put]).is_err());
    }
}
