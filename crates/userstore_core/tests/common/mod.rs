#![allow(dead_code)]

use rusqlite::Connection;
use std::cell::Cell;
use userstore_core::{
    BatchGetOptions, Item, Key, KeyValueStore, KvUserRepository, SqliteKvStore, StoreResult,
    TableNames, User, WriteOp,
};

/// Store wrapper recording how often each client call was made.
pub struct CountingStore<S> {
    inner: S,
    gets: Cell<usize>,
    batch_gets: Cell<usize>,
    transactions: Cell<usize>,
    write_ops: Cell<usize>,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            gets: Cell::new(0),
            batch_gets: Cell::new(0),
            transactions: Cell::new(0),
            write_ops: Cell::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.get()
    }

    pub fn batch_gets(&self) -> usize {
        self.batch_gets.get()
    }

    pub fn transactions(&self) -> usize {
        self.transactions.get()
    }

    pub fn write_ops(&self) -> usize {
        self.write_ops.get()
    }
}

impl<S: KeyValueStore> KeyValueStore for CountingStore<S> {
    fn get_item(&self, table: &str, key: &Key) -> StoreResult<Option<Item>> {
        self.gets.set(self.gets.get() + 1);
        self.inner.get_item(table, key)
    }

    fn batch_get_items(&self, table: &str, keys: &[Key]) -> StoreResult<Vec<Item>> {
        self.batch_gets.set(self.batch_gets.get() + 1);
        self.inner.batch_get_items(table, keys)
    }

    fn transact(&self, ops: &[WriteOp]) -> StoreResult<()> {
        self.transactions.set(self.transactions.get() + 1);
        self.write_ops.set(self.write_ops.get() + ops.len());
        self.inner.transact(ops)
    }
}

pub type TestRepo<'conn> = KvUserRepository<CountingStore<SqliteKvStore<'conn>>>;

pub fn store(conn: &Connection) -> SqliteKvStore<'_> {
    SqliteKvStore::try_new(conn, BatchGetOptions::default()).unwrap()
}

pub fn repo(conn: &Connection) -> TestRepo<'_> {
    KvUserRepository::new(CountingStore::new(store(conn)), TableNames::default())
}

pub fn user(username: &str, email: &str) -> User {
    User::new(username, email, format!("hash:{username}").into_bytes())
}

pub fn jake() -> User {
    let mut jake = user("jake", "jake@jake.jake");
    jake.image = Some("https://i.stack.imgur.com/xHWG8.jpg".to_string());
    jake.bio = Some("I work at statefarm".to_string());
    jake
}
