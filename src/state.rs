use std::sync::Arc;

use crate::{fruits::FruitRepository, greeting::GreetingService};

#[derive(Clone)]
pub struct AppState {
    pub greeting: Arc<dyn GreetingService>,
    pub fruits: Arc<dyn FruitRepository>,
}

impl AppState {
    pub fn new(greeting: Arc<dyn GreetingService>, fruits: Arc<dyn FruitRepository>) -> Self {
        Self { greeting, fruits }
    }
}
