//! Action -> destination routing for typed sends.

use crate::domain::dispatch::RpcCommand;
use crate::error::ConfigError;
use std::collections::HashMap;

/// Immutable map from action name to the destination serving it.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, String>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    pub fn destination_for(&self, action: &str) -> Option<&str> {
        self.routes.get(action).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Distinct destinations, sorted.
    pub fn destinations(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.routes.values().map(String::as_str).collect();
        all.sort_unstable();
        all.dedup();
        all
    }
}

#[derive(Debug, Default)]
pub struct RouteTableBuilder {
    routes: HashMap<String, String>,
    error: Option<ConfigError>,
}

impl RouteTableBuilder {
    /// Route `C::ACTION` to `destination`.
    #[must_use]
    pub fn route<C: RpcCommand>(self, destination: impl Into<String>) -> Self {
        self.route_action(C::ACTION, destination)
    }

    #[must_use]
    pub fn route_action(
        mut self,
        action: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        let action = action.into();
        let destination = destination.into();

        if self.error.is_some() {
            return self;
        }
        if destination.is_empty() {
            self.error = Some(ConfigError::EmptyRouteDestination(action));
            return self;
        }
        if self.routes.contains_key(&action) {
            self.error = Some(ConfigError::DuplicateRoute(action));
            return self;
        }
        self.routes.insert(action, destination);
        self
    }

    pub fn build(self) -> Result<RouteTable, ConfigError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(RouteTable {
                routes: self.routes,
            }),
        }
    }
}
