use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{error::AppResult, models::Fruit};

const SEED_FRUITS: [&str; 3] = ["Cherry", "Apple", "Banana"];

#[async_trait]
pub trait FruitRepository: Send + Sync {
    /// All fruits, ordered by name.
    async fn list(&self) -> AppResult<Vec<Fruit>>;
    async fn get_by_id(&self, id: i64) -> AppResult<Option<Fruit>>;
    async fn create(&self, name: String) -> AppResult<Fruit>;
    async fn rename(&self, id: i64, name: String) -> AppResult<Option<Fruit>>;
    async fn delete(&self, id: i64) -> AppResult<bool>;
}

#[derive(Debug, Default)]
struct FruitTable {
    rows: BTreeMap<i64, Fruit>,
    last_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryFruitRepository {
    table: RwLock<FruitTable>,
}

impl InMemoryFruitRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository pre-filled with `1 Cherry`, `2 Apple`, `3 Banana`.
    pub fn seeded() -> Self {
        let mut table = FruitTable::default();
        for name in SEED_FRUITS {
            table.insert(name.to_string());
        }
        Self {
            table: RwLock::new(table),
        }
    }
}

impl FruitTable {
    fn insert(&mut self, name: String) -> Fruit {
        self.last_id += 1;
        let fruit = Fruit {
            id: self.last_id,
            name,
        };
        self.rows.insert(fruit.id, fruit.clone());
        fruit
    }
}

#[async_trait]
impl FruitRepository for InMemoryFruitRepository {
    async fn list(&self) -> AppResult<Vec<Fruit>> {
        let mut fruits = self
            .table
            .read()
            .await
            .rows
            .values()
            .cloned()
            .collect::<Vec<_>>();
        fruits.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(fruits)
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Option<Fruit>> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn create(&self, name: String) -> AppResult<Fruit> {
        Ok(self.table.write().await.insert(name))
    }

    async fn rename(&self, id: i64, name: String) -> AppResult<Option<Fruit>> {
        let mut table = self.table.write().await;
        Ok(table.rows.get_mut(&id).map(|fruit| {
            fruit.name = name;
            fruit.clone()
        }))
    }

    async fn delete(&self, id: i64) -> AppResult<bool> {
        Ok(self.table.write().await.rows.remove(&id).is_some())
    }
}
