use serde::{Deserialize, Serialize};

use crate::HashMap;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Security {
    #[serde(default)]
    pub constraints: HashMap<String, SecurityConstraint>,
}

impl Security {
    #[inline]
    pub fn constraint(&self, id: &str) -> Option<&SecurityConstraint> {
        self.constraints.get(id)
    }

    pub(crate) fn init(&mut self) {
        for (id, c) in self.constraints.iter_mut() {
            c.id.clone_from(id);
        }
    }
}

/// How the transport authenticates principals for a constraint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Custom,
    Basic,
}

/// Named role requirement referenced by destinations.
///
/// An empty role list admits any authenticated principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecurityConstraint {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub method: AuthMethod,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SecurityConstraint {
    pub fn new<S: Into<String>>(id: S, roles: Vec<String>) -> Self {
        Self { id: id.into(), method: AuthMethod::default(), roles }
    }
}
